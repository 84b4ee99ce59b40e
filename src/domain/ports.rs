use crate::domain::model::{
    ChainConfirmation, ChainEvent, NoticePayload, NoticeStatus, NoticeView, ProcessServer,
    ServedNotice, StagedNotice, SyncCursor, TransactionInfo, TransactionRecord,
};
use crate::utils::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessServerUpsert {
    pub wallet_address: String,
    /// `None` keeps the stored agency of an existing row.
    pub agency: Option<String>,
    pub display_name: Option<String>,
    pub active: bool,
}

/// Agency assigned to servers first seen through a chain event.
pub const UNASSIGNED_AGENCY: &str = "unassigned";

/// Persistence for staged and served notices.
///
/// Status transitions are compare-and-set: methods that move a staged row
/// out of `pending` return `false` when the row was no longer pending.
#[async_trait]
pub trait NoticeStore: Send + Sync {
    async fn init_schema(&self) -> Result<()>;

    async fn upsert_process_server(&self, server: &ProcessServerUpsert) -> Result<ProcessServer>;
    async fn get_process_server(&self, wallet_address: &str) -> Result<Option<ProcessServer>>;

    async fn insert_staged(&self, payload: &NoticePayload) -> Result<StagedNotice>;
    async fn get_staged(&self, id: i64) -> Result<Option<StagedNotice>>;
    async fn find_staged_by_tx(&self, tx_hash: &str) -> Result<Option<StagedNotice>>;
    /// Pending rows for the pair that have not reported a transaction yet.
    async fn find_pending_unsubmitted(
        &self,
        server_address: &str,
        recipient_address: &str,
    ) -> Result<Vec<StagedNotice>>;
    async fn list_pending_with_tx(&self) -> Result<Vec<StagedNotice>>;
    /// Sets the transaction hash on a pending row whose hash is unset or equal.
    async fn attach_transaction(&self, id: i64, tx_hash: &str) -> Result<bool>;
    /// Confirms a row that is pending with an unset or equal transaction hash,
    /// or re-applies chain ids to a row already confirmed with the same hash.
    async fn mark_confirmed(&self, id: i64, confirmation: &ChainConfirmation) -> Result<bool>;
    async fn transition_status(&self, id: i64, from: NoticeStatus, to: NoticeStatus)
        -> Result<bool>;
    /// Expires pending rows without a transaction created before `cutoff`.
    async fn expire_stale(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Returns `true` when the alert id was not present before.
    async fn upsert_served(&self, served: &ServedNotice) -> Result<bool>;
    async fn get_served(&self, alert_id: &str) -> Result<Option<ServedNotice>>;
    async fn recent_served(
        &self,
        limit: usize,
        server_address: Option<&str>,
    ) -> Result<Vec<ServedNotice>>;
    async fn mark_acknowledged(&self, alert_id: &str) -> Result<bool>;

    /// Returns `None` when the same view was already recorded.
    async fn record_view(
        &self,
        alert_id: &str,
        viewer_address: &str,
        acknowledged: bool,
        tx_hash: Option<&str>,
    ) -> Result<Option<NoticeView>>;

    async fn upsert_transaction(&self, record: &TransactionRecord) -> Result<()>;
    async fn get_transaction(&self, tx_hash: &str) -> Result<Option<TransactionRecord>>;

    async fn load_cursor(&self) -> Result<Option<SyncCursor>>;
    async fn save_cursor(&self, cursor: &SyncCursor) -> Result<()>;
}

/// Read access to the chain the notice contract lives on.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn current_block(&self) -> Result<u64>;
    /// Contract events at or after the timestamp, oldest first.
    async fn events_since(&self, min_block_timestamp_ms: i64) -> Result<Vec<ChainEvent>>;
    /// `None` while the transaction is not yet in a block.
    async fn transaction_info(&self, tx_hash: &str) -> Result<Option<TransactionInfo>>;
}

#[async_trait]
impl<T: ChainClient + ?Sized> ChainClient for Arc<T> {
    async fn current_block(&self) -> Result<u64> {
        (**self).current_block().await
    }

    async fn events_since(&self, min_block_timestamp_ms: i64) -> Result<Vec<ChainEvent>> {
        (**self).events_since(min_block_timestamp_ms).await
    }

    async fn transaction_info(&self, tx_hash: &str) -> Result<Option<TransactionInfo>> {
        (**self).transaction_info(tx_hash).await
    }
}
