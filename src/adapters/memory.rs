use crate::domain::model::{
    ChainConfirmation, NoticePayload, NoticeStatus, NoticeView, ProcessServer, ServedNotice,
    StagedNotice, SyncCursor, TransactionRecord,
};
use crate::domain::ports::{NoticeStore, ProcessServerUpsert, UNASSIGNED_AGENCY};
use crate::utils::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct MemoryState {
    servers: HashMap<String, ProcessServer>,
    staged: BTreeMap<i64, StagedNotice>,
    next_staged_id: i64,
    served: HashMap<String, ServedNotice>,
    views: Vec<NoticeView>,
    transactions: HashMap<String, TransactionRecord>,
    cursor: Option<SyncCursor>,
}

fn confirmable(notice: &StagedNotice, tx_hash: &str) -> bool {
    let hash = notice.transaction_hash.as_deref();
    match notice.status {
        NoticeStatus::Pending => hash.map_or(true, |h| h == tx_hash),
        NoticeStatus::Confirmed => hash == Some(tx_hash),
        _ => false,
    }
}

/// Process-local store used by tests and `--dry-run`.
#[derive(Clone, Default)]
pub struct InMemoryNoticeStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryNoticeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn views_for(&self, alert_id: &str) -> Vec<NoticeView> {
        let state = self.state.lock().await;
        state
            .views
            .iter()
            .filter(|v| v.alert_id == alert_id)
            .cloned()
            .collect()
    }

    /// Rewrites a staged row's creation time; lets tests age rows.
    pub async fn backdate_staged(&self, id: i64, created_at: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        if let Some(notice) = state.staged.get_mut(&id) {
            notice.created_at = created_at;
        }
    }
}

#[async_trait]
impl NoticeStore for InMemoryNoticeStore {
    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert_process_server(&self, server: &ProcessServerUpsert) -> Result<ProcessServer> {
        let mut state = self.state.lock().await;
        let entry = state
            .servers
            .entry(server.wallet_address.clone())
            .or_insert_with(|| ProcessServer {
                wallet_address: server.wallet_address.clone(),
                agency: UNASSIGNED_AGENCY.to_string(),
                display_name: None,
                active: server.active,
                registered_at: Utc::now(),
            });

        if let Some(agency) = &server.agency {
            entry.agency = agency.clone();
        }
        if server.display_name.is_some() {
            entry.display_name = server.display_name.clone();
        }
        entry.active = server.active;
        Ok(entry.clone())
    }

    async fn get_process_server(&self, wallet_address: &str) -> Result<Option<ProcessServer>> {
        let state = self.state.lock().await;
        Ok(state.servers.get(wallet_address).cloned())
    }

    async fn insert_staged(&self, payload: &NoticePayload) -> Result<StagedNotice> {
        let mut state = self.state.lock().await;
        state.next_staged_id += 1;
        let notice = StagedNotice {
            id: state.next_staged_id,
            payload: payload.clone(),
            status: NoticeStatus::Pending,
            transaction_hash: None,
            alert_id: None,
            document_id: None,
            block_number: None,
            created_at: Utc::now(),
            confirmed_at: None,
        };
        state.staged.insert(notice.id, notice.clone());
        Ok(notice)
    }

    async fn get_staged(&self, id: i64) -> Result<Option<StagedNotice>> {
        let state = self.state.lock().await;
        Ok(state.staged.get(&id).cloned())
    }

    async fn find_staged_by_tx(&self, tx_hash: &str) -> Result<Option<StagedNotice>> {
        let state = self.state.lock().await;
        Ok(state
            .staged
            .values()
            .find(|n| n.transaction_hash.as_deref() == Some(tx_hash))
            .cloned())
    }

    async fn find_pending_unsubmitted(
        &self,
        server_address: &str,
        recipient_address: &str,
    ) -> Result<Vec<StagedNotice>> {
        let state = self.state.lock().await;
        Ok(state
            .staged
            .values()
            .filter(|n| {
                n.status == NoticeStatus::Pending
                    && n.transaction_hash.is_none()
                    && n.payload.server_address == server_address
                    && n.payload.recipient_address == recipient_address
            })
            .cloned()
            .collect())
    }

    async fn list_pending_with_tx(&self) -> Result<Vec<StagedNotice>> {
        let state = self.state.lock().await;
        Ok(state
            .staged
            .values()
            .filter(|n| n.status == NoticeStatus::Pending && n.transaction_hash.is_some())
            .cloned()
            .collect())
    }

    async fn attach_transaction(&self, id: i64, tx_hash: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let owned_elsewhere = state
            .staged
            .values()
            .any(|n| n.id != id && n.transaction_hash.as_deref() == Some(tx_hash));
        if owned_elsewhere {
            return Ok(false);
        }
        match state.staged.get_mut(&id) {
            Some(n)
                if n.status == NoticeStatus::Pending
                    && n.transaction_hash.as_deref().map_or(true, |h| h == tx_hash) =>
            {
                n.transaction_hash = Some(tx_hash.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_confirmed(&self, id: i64, confirmation: &ChainConfirmation) -> Result<bool> {
        let mut state = self.state.lock().await;
        let tx_hash = confirmation.transaction_hash.as_str();
        match state.staged.get_mut(&id) {
            Some(n) if confirmable(n, tx_hash) => {
                n.status = NoticeStatus::Confirmed;
                n.transaction_hash = Some(confirmation.transaction_hash.clone());
                if confirmation.alert_id.is_some() {
                    n.alert_id = confirmation.alert_id.clone();
                }
                if confirmation.document_id.is_some() {
                    n.document_id = confirmation.document_id.clone();
                }
                if confirmation.block_number.is_some() {
                    n.block_number = confirmation.block_number;
                }
                n.confirmed_at.get_or_insert_with(Utc::now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn transition_status(
        &self,
        id: i64,
        from: NoticeStatus,
        to: NoticeStatus,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.staged.get_mut(&id) {
            Some(n) if n.status == from => {
                n.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_stale(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock().await;
        let mut expired = 0;
        for notice in state.staged.values_mut() {
            if notice.status == NoticeStatus::Pending
                && notice.transaction_hash.is_none()
                && notice.created_at < cutoff
            {
                notice.status = NoticeStatus::Expired;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn upsert_served(&self, served: &ServedNotice) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.served.get_mut(&served.alert_id) {
            Some(existing) => {
                if existing.document_id.is_none() {
                    existing.document_id = served.document_id.clone();
                }
                if existing.staged_id.is_none() {
                    existing.staged_id = served.staged_id;
                }
                if existing.case_number.is_none() {
                    existing.case_number = served.case_number.clone();
                }
                if existing.block_number.is_none() {
                    existing.block_number = served.block_number;
                }
                Ok(false)
            }
            None => {
                state.served.insert(served.alert_id.clone(), served.clone());
                Ok(true)
            }
        }
    }

    async fn get_served(&self, alert_id: &str) -> Result<Option<ServedNotice>> {
        let state = self.state.lock().await;
        Ok(state.served.get(alert_id).cloned())
    }

    async fn recent_served(
        &self,
        limit: usize,
        server_address: Option<&str>,
    ) -> Result<Vec<ServedNotice>> {
        let state = self.state.lock().await;
        let mut rows: Vec<ServedNotice> = state
            .served
            .values()
            .filter(|s| server_address.map_or(true, |addr| s.server_address == addr))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.served_at
                .cmp(&a.served_at)
                .then_with(|| b.alert_id.cmp(&a.alert_id))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn mark_acknowledged(&self, alert_id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.served.get_mut(alert_id) {
            Some(served) => {
                served.acknowledged = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_view(
        &self,
        alert_id: &str,
        viewer_address: &str,
        acknowledged: bool,
        tx_hash: Option<&str>,
    ) -> Result<Option<NoticeView>> {
        let mut state = self.state.lock().await;
        let duplicate = tx_hash.is_some()
            && state.views.iter().any(|v| {
                v.alert_id == alert_id
                    && v.viewer_address == viewer_address
                    && v.transaction_hash.as_deref() == tx_hash
            });
        if duplicate {
            return Ok(None);
        }

        let view = NoticeView {
            id: state.views.len() as i64 + 1,
            alert_id: alert_id.to_string(),
            viewer_address: viewer_address.to_string(),
            acknowledged,
            transaction_hash: tx_hash.map(str::to_string),
            viewed_at: Utc::now(),
        };
        state.views.push(view.clone());
        Ok(Some(view))
    }

    async fn upsert_transaction(&self, record: &TransactionRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.transactions.get_mut(&record.tx_hash) {
            Some(existing) => {
                existing.status = record.status;
                if record.block_number.is_some() {
                    existing.block_number = record.block_number;
                }
                if existing.staged_id.is_none() {
                    existing.staged_id = record.staged_id;
                }
            }
            None => {
                state
                    .transactions
                    .insert(record.tx_hash.clone(), record.clone());
            }
        }
        Ok(())
    }

    async fn get_transaction(&self, tx_hash: &str) -> Result<Option<TransactionRecord>> {
        let state = self.state.lock().await;
        Ok(state.transactions.get(tx_hash).cloned())
    }

    async fn load_cursor(&self) -> Result<Option<SyncCursor>> {
        let state = self.state.lock().await;
        Ok(state.cursor)
    }

    async fn save_cursor(&self, cursor: &SyncCursor) -> Result<()> {
        let mut state = self.state.lock().await;
        state.cursor = Some(*cursor);
        Ok(())
    }
}
