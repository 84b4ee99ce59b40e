//! Blockchain-to-database synchronization.
//!
//! `BlockchainSync` polls the chain on a fixed interval, pulls contract
//! events newer than its cursor and reconciles each one into the store.
//! Every reconciliation step is idempotent, so a tick that fails halfway is
//! simply replayed on the next one (the cursor only advances after a full
//! pass).

use crate::core::staging::{served_from_staged, TX_KIND_ACKNOWLEDGE, TX_KIND_NOTICE, TX_KIND_SERVER};
use crate::domain::model::{
    ChainConfirmation, ChainEvent, ChainEventKind, NoticeStatus, StagedNotice, SyncCursor,
    TransactionRecord, TxStatus,
};
use crate::domain::ports::{ChainClient, NoticeStore, ProcessServerUpsert};
use crate::utils::error::Result;
use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub poll_interval: Duration,
    pub max_backoff: Duration,
    /// Where to start when no cursor has been persisted yet.
    pub start_block_timestamp_ms: Option<i64>,
    pub recheck_pending: bool,
    pub stale_after: Option<chrono::Duration>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(3000),
            max_backoff: Duration::from_secs(60),
            start_block_timestamp_ms: None,
            recheck_pending: true,
            stale_after: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    TransactionHash,
    UniquePending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Matched { staged_id: i64, by: MatchKind },
    /// Served on chain with no staging row to attach it to.
    Orphaned,
    /// Several pending rows fit the event; none was touched.
    Ambiguous { candidates: Vec<i64> },
    AlreadyApplied,
    Acknowledged { alert_id: String, new_view: bool },
    ServerRegistered { server: String },
    Ignored { name: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub current_block: u64,
    pub idle: bool,
    pub events: usize,
    pub matched: usize,
    pub orphaned: usize,
    pub ambiguous: usize,
    pub already_applied: usize,
    pub acknowledged: usize,
    pub servers: usize,
    pub ignored: usize,
    pub failed_transactions: usize,
    pub expired: u64,
}

impl TickReport {
    fn record(&mut self, outcome: &ReconcileOutcome) {
        self.events += 1;
        match outcome {
            ReconcileOutcome::Matched { .. } => self.matched += 1,
            ReconcileOutcome::Orphaned => self.orphaned += 1,
            ReconcileOutcome::Ambiguous { .. } => self.ambiguous += 1,
            ReconcileOutcome::AlreadyApplied => self.already_applied += 1,
            ReconcileOutcome::Acknowledged { .. } => self.acknowledged += 1,
            ReconcileOutcome::ServerRegistered { .. } => self.servers += 1,
            ReconcileOutcome::Ignored { .. } => self.ignored += 1,
        }
    }
}

/// `interval * 2^failures`, capped at `max`.
pub fn backoff_delay(interval: Duration, consecutive_failures: u32, max: Duration) -> Duration {
    let factor = 1u32 << consecutive_failures.min(16);
    interval.saturating_mul(factor).min(max)
}

pub struct BlockchainSync<S: NoticeStore, C: ChainClient> {
    store: S,
    chain: C,
    settings: SyncSettings,
    cursor: Option<SyncCursor>,
}

impl<S: NoticeStore, C: ChainClient> BlockchainSync<S, C> {
    pub fn new(store: S, chain: C, settings: SyncSettings) -> Self {
        Self {
            store,
            chain,
            settings,
            cursor: None,
        }
    }

    pub fn cursor(&self) -> Option<SyncCursor> {
        self.cursor
    }

    async fn load_cursor(&mut self) -> Result<SyncCursor> {
        if let Some(cursor) = self.cursor {
            return Ok(cursor);
        }
        let cursor = match self.store.load_cursor().await? {
            Some(saved) => saved,
            None => SyncCursor {
                block_number: 0,
                block_timestamp_ms: self
                    .settings
                    .start_block_timestamp_ms
                    .unwrap_or_else(|| Utc::now().timestamp_millis()),
            },
        };
        tracing::info!(
            "🔗 Sync cursor at block {} / timestamp {}",
            cursor.block_number,
            cursor.block_timestamp_ms
        );
        self.cursor = Some(cursor);
        Ok(cursor)
    }

    /// One polling pass.
    pub async fn tick(&mut self) -> Result<TickReport> {
        let cursor = self.load_cursor().await?;
        let current_block = self.chain.current_block().await?;
        let mut report = TickReport {
            current_block,
            ..Default::default()
        };

        if current_block <= cursor.block_number {
            report.idle = true;
            return Ok(report);
        }

        let events = self.chain.events_since(cursor.block_timestamp_ms).await?;
        let mut next = SyncCursor {
            block_number: current_block,
            block_timestamp_ms: cursor.block_timestamp_ms,
        };

        for event in &events {
            let outcome = self.reconcile(event).await?;
            tracing::debug!(
                "{} in tx {} (block {}) -> {:?}",
                event.name(),
                event.transaction_hash,
                event.block_number,
                outcome
            );
            report.record(&outcome);
            // inclusive lower bound; the boundary events are replayed as AlreadyApplied
            next.block_timestamp_ms = next.block_timestamp_ms.max(event.block_timestamp_ms);
        }

        if self.settings.recheck_pending {
            report.failed_transactions = self.recheck_pending().await?;
        }

        if let Some(max_age) = self.settings.stale_after {
            report.expired = self.store.expire_stale(Utc::now() - max_age).await?;
        }

        self.store.save_cursor(&next).await?;
        self.cursor = Some(next);
        Ok(report)
    }

    /// Applies a single contract event to the store.
    pub async fn reconcile(&self, event: &ChainEvent) -> Result<ReconcileOutcome> {
        match &event.kind {
            ChainEventKind::NoticeServed {
                alert_id,
                document_id,
                server,
                recipient,
            } => {
                self.reconcile_served(event, alert_id, document_id.clone(), server, recipient)
                    .await
            }
            ChainEventKind::NoticeAcknowledged {
                alert_id,
                recipient,
            } => {
                let view = self
                    .store
                    .record_view(alert_id, recipient, true, Some(&event.transaction_hash))
                    .await?;
                if !self.store.mark_acknowledged(alert_id).await? {
                    tracing::warn!("Acknowledgement for unknown alert {}", alert_id);
                }
                self.record_event_tx(event, TX_KIND_ACKNOWLEDGE, None).await?;
                Ok(ReconcileOutcome::Acknowledged {
                    alert_id: alert_id.clone(),
                    new_view: view.is_some(),
                })
            }
            ChainEventKind::ServerRegistered { server } => {
                self.store
                    .upsert_process_server(&ProcessServerUpsert {
                        wallet_address: server.clone(),
                        agency: None,
                        display_name: None,
                        active: true,
                    })
                    .await?;
                self.record_event_tx(event, TX_KIND_SERVER, None).await?;
                Ok(ReconcileOutcome::ServerRegistered {
                    server: server.clone(),
                })
            }
            ChainEventKind::Other { name } => Ok(ReconcileOutcome::Ignored { name: name.clone() }),
        }
    }

    async fn reconcile_served(
        &self,
        event: &ChainEvent,
        alert_id: &str,
        document_id: Option<String>,
        server: &str,
        recipient: &str,
    ) -> Result<ReconcileOutcome> {
        let tx_hash = event.transaction_hash.as_str();
        let block_number = Some(event.block_number as i64);

        // a recorded alert may only re-apply chain ids to the row owning its tx
        let already_served = self.store.get_served(alert_id).await?.is_some();

        let mut candidates: Vec<i64> = Vec::new();
        let matched: Option<(StagedNotice, MatchKind)> =
            match self.store.find_staged_by_tx(tx_hash).await? {
                Some(staged) => Some((staged, MatchKind::TransactionHash)),
                None if already_served => None,
                None => {
                    let mut pending = self
                        .store
                        .find_pending_unsubmitted(server, recipient)
                        .await?;
                    if pending.len() == 1 {
                        pending.pop().map(|s| (s, MatchKind::UniquePending))
                    } else {
                        candidates = pending.iter().map(|s| s.id).collect();
                        None
                    }
                }
            };

        let confirmed = match &matched {
            Some((staged, _)) => {
                let ok = self
                    .store
                    .mark_confirmed(
                        staged.id,
                        &ChainConfirmation {
                            transaction_hash: tx_hash.to_string(),
                            alert_id: Some(alert_id.to_string()),
                            document_id: document_id.clone(),
                            block_number,
                        },
                    )
                    .await?;
                if !ok {
                    tracing::warn!(
                        "Staged notice {} is {} and was not confirmed by tx {}",
                        staged.id,
                        staged.status,
                        tx_hash
                    );
                }
                ok
            }
            None => false,
        };

        let staged_ref = matched.as_ref().filter(|_| confirmed).map(|(s, _)| s);
        let inserted = self
            .store
            .upsert_served(&served_from_staged(
                staged_ref,
                alert_id,
                document_id,
                server,
                recipient,
                tx_hash,
                block_number,
            ))
            .await?;
        self.record_event_tx(event, TX_KIND_NOTICE, staged_ref.map(|s| s.id))
            .await?;

        if !inserted {
            return Ok(ReconcileOutcome::AlreadyApplied);
        }

        let outcome = match (matched, confirmed) {
            (Some((staged, by)), true) => {
                tracing::info!(
                    "✅ Alert {} reconciled with staged notice {} ({:?})",
                    alert_id,
                    staged.id,
                    by
                );
                ReconcileOutcome::Matched {
                    staged_id: staged.id,
                    by,
                }
            }
            _ if candidates.len() > 1 => {
                tracing::warn!(
                    "⚠️ Alert {} fits {} pending notices ({:?}); left unmatched",
                    alert_id,
                    candidates.len(),
                    candidates
                );
                ReconcileOutcome::Ambiguous { candidates }
            }
            _ => {
                tracing::warn!(
                    "⚠️ Alert {} (tx {}) has no staging row; recorded as orphan",
                    alert_id,
                    tx_hash
                );
                ReconcileOutcome::Orphaned
            }
        };
        Ok(outcome)
    }

    async fn record_event_tx(
        &self,
        event: &ChainEvent,
        kind: &str,
        staged_id: Option<i64>,
    ) -> Result<()> {
        self.store
            .upsert_transaction(&TransactionRecord {
                tx_hash: event.transaction_hash.clone(),
                staged_id,
                kind: kind.to_string(),
                status: TxStatus::Success,
                block_number: Some(event.block_number as i64),
                recorded_at: Utc::now(),
            })
            .await
    }

    /// Looks up receipts for pending rows that already carry a transaction
    /// hash; reverted transactions move their row to `failed`.
    async fn recheck_pending(&self) -> Result<usize> {
        let mut failed = 0;
        for staged in self.store.list_pending_with_tx().await? {
            let Some(tx_hash) = staged.transaction_hash.as_deref() else {
                continue;
            };

            let info = match self.chain.transaction_info(tx_hash).await {
                Ok(Some(info)) => info,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("Receipt lookup for {} failed: {}", tx_hash, e);
                    continue;
                }
            };

            let status = if info.success {
                TxStatus::Success
            } else {
                TxStatus::Failed
            };
            self.store
                .upsert_transaction(&TransactionRecord {
                    tx_hash: tx_hash.to_string(),
                    staged_id: Some(staged.id),
                    kind: TX_KIND_NOTICE.to_string(),
                    status,
                    block_number: Some(info.block_number as i64),
                    recorded_at: Utc::now(),
                })
                .await?;

            if !info.success
                && self
                    .store
                    .transition_status(staged.id, NoticeStatus::Pending, NoticeStatus::Failed)
                    .await?
            {
                tracing::warn!(
                    "❌ Notice {} failed on chain ({}): {}",
                    staged.id,
                    tx_hash,
                    info.result
                );
                failed += 1;
            }
        }
        Ok(failed)
    }

    /// Polls until `shutdown` resolves. Tick errors are logged and retried
    /// with exponential backoff.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut failures: u32 = 0;
        tracing::info!(
            "🚀 Blockchain sync started (interval {:?})",
            self.settings.poll_interval
        );

        loop {
            let result = tokio::select! {
                _ = &mut shutdown => break,
                result = self.tick() => result,
            };

            let delay = match result {
                Ok(report) => {
                    failures = 0;
                    if report.idle {
                        tracing::debug!("No new block past {}", report.current_block);
                    } else if report.events > 0 || report.failed_transactions > 0 {
                        tracing::info!(
                            matched = report.matched,
                            orphaned = report.orphaned,
                            ambiguous = report.ambiguous,
                            replayed = report.already_applied,
                            failed_txs = report.failed_transactions,
                            "🔄 Block {}: {} events",
                            report.current_block,
                            report.events
                        );
                    }
                    self.settings.poll_interval
                }
                Err(e) => {
                    let delay = backoff_delay(
                        self.settings.poll_interval,
                        failures,
                        self.settings.max_backoff,
                    );
                    failures = failures.saturating_add(1);
                    if e.is_transient() {
                        tracing::warn!("Sync tick failed: {} (retrying in {:?})", e, delay);
                    } else {
                        tracing::error!(
                            "Sync tick failed: {} ({:?}); retrying in {:?}",
                            e,
                            e.category(),
                            delay
                        );
                    }
                    delay
                }
            };

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!("🛑 Blockchain sync stopped");
        Ok(())
    }
}
