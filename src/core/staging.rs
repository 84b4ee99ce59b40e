//! Off-chain staging of legal notices.
//!
//! A notice is staged as `pending` before its transaction is sent. The
//! client later reports the transaction hash through [`NoticeService::confirm`];
//! the sync loop finishes whatever the confirm call could not.

use crate::domain::model::{
    ChainConfirmation, NoticePayload, NoticeStatus, ProcessServer, ServedNotice, StagedNotice,
    TransactionRecord, TxStatus,
};
use crate::domain::ports::{ChainClient, NoticeStore, ProcessServerUpsert};
use crate::utils::address;
use crate::utils::error::{NoticeError, Result};
use crate::utils::validation::{
    validate_ipfs_hash, validate_max_chars, validate_non_empty_string, validate_tx_hash,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

pub const DEFAULT_RECENT_LIMIT: usize = 20;
pub const MAX_RECENT_LIMIT: usize = 100;

/// Transaction kinds recorded in `transaction_hashes`.
pub const TX_KIND_NOTICE: &str = "notice";
pub const TX_KIND_ACKNOWLEDGE: &str = "acknowledge";
pub const TX_KIND_SERVER: &str = "server";

#[derive(Debug, Clone)]
pub struct StagingRules {
    pub max_public_text_chars: usize,
    pub max_batch_size: usize,
    pub require_ipfs_hash: bool,
}

impl Default for StagingRules {
    fn default() -> Self {
        Self {
            max_public_text_chars: 1000,
            max_batch_size: 50,
            require_ipfs_hash: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageNoticeRequest {
    pub server_address: String,
    pub recipient_address: String,
    pub case_number: String,
    pub agency: String,
    pub notice_type: String,
    pub public_text: String,
    #[serde(default)]
    pub ipfs_hash: Option<String>,
    #[serde(default)]
    pub jurisdiction: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmNoticeRequest {
    pub staged_id: i64,
    pub transaction_hash: String,
    #[serde(default)]
    pub alert_id: Option<String>,
    #[serde(default)]
    pub document_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchNoticeItem {
    pub recipient_address: String,
    pub case_number: String,
    pub notice_type: String,
    pub public_text: String,
    #[serde(default)]
    pub ipfs_hash: Option<String>,
    #[serde(default)]
    pub jurisdiction: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStageRequest {
    #[serde(default)]
    pub batch_id: Option<String>,
    pub server_address: String,
    pub agency: String,
    pub notices: Vec<BatchNoticeItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFailure {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStageResult {
    pub batch_id: String,
    pub staged: Vec<StagedNotice>,
    pub failures: Vec<BatchFailure>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<usize>,
    pub server_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterServerRequest {
    pub wallet_address: String,
    pub agency: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgencyValidation {
    pub valid: bool,
    pub registered_agency: Option<String>,
    pub reason: Option<String>,
}

impl AgencyValidation {
    fn rejected(registered_agency: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            registered_agency,
            reason: Some(reason.into()),
        }
    }
}

/// Case- and whitespace-insensitive form used to compare agency names.
pub fn normalize_agency(agency: &str) -> String {
    agency
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Lower-case hex without a `0x` prefix.
pub fn normalize_tx_hash(tx_hash: &str) -> String {
    let trimmed = tx_hash.trim();
    trimmed
        .strip_prefix("0x")
        .unwrap_or(trimmed)
        .to_ascii_lowercase()
}

fn clamp_recent_limit(limit: Option<usize>) -> usize {
    limit
        .unwrap_or(DEFAULT_RECENT_LIMIT)
        .clamp(1, MAX_RECENT_LIMIT)
}

fn optional_trimmed(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Builds the served-notice row written once a notice's alert id is known.
pub(crate) fn served_from_staged(
    staged: Option<&StagedNotice>,
    alert_id: &str,
    document_id: Option<String>,
    server_address: &str,
    recipient_address: &str,
    tx_hash: &str,
    block_number: Option<i64>,
) -> ServedNotice {
    ServedNotice {
        alert_id: alert_id.to_string(),
        document_id,
        server_address: server_address.to_string(),
        recipient_address: recipient_address.to_string(),
        staged_id: staged.map(|s| s.id),
        case_number: staged.map(|s| s.payload.case_number.clone()),
        transaction_hash: tx_hash.to_string(),
        block_number,
        acknowledged: false,
        served_at: Utc::now(),
    }
}

pub struct NoticeService<S: NoticeStore, C: ChainClient> {
    store: S,
    chain: C,
    rules: StagingRules,
}

impl<S: NoticeStore, C: ChainClient> NoticeService<S, C> {
    pub fn new(store: S, chain: C) -> Self {
        Self::with_rules(store, chain, StagingRules::default())
    }

    pub fn with_rules(store: S, chain: C, rules: StagingRules) -> Self {
        Self {
            store,
            chain,
            rules,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn check_payload(&self, payload: NoticePayload) -> Result<NoticePayload> {
        let server_address = address::normalize_address(&payload.server_address)
            .map_err(|_| NoticeError::validation("server_address", "invalid TRON address"))?;
        let recipient_address = address::normalize_address(&payload.recipient_address)
            .map_err(|_| NoticeError::validation("recipient_address", "invalid TRON address"))?;

        validate_non_empty_string("case_number", &payload.case_number)?;
        validate_non_empty_string("agency", &payload.agency)?;
        validate_non_empty_string("notice_type", &payload.notice_type)?;
        validate_non_empty_string("public_text", &payload.public_text)?;
        validate_max_chars(
            "public_text",
            payload.public_text.trim(),
            self.rules.max_public_text_chars,
        )?;

        let ipfs_hash = optional_trimmed(&payload.ipfs_hash);
        match &ipfs_hash {
            Some(hash) => validate_ipfs_hash("ipfs_hash", hash)?,
            None if self.rules.require_ipfs_hash => {
                return Err(NoticeError::validation("ipfs_hash", "document hash is required"))
            }
            None => {}
        }

        Ok(NoticePayload {
            server_address,
            recipient_address,
            case_number: payload.case_number.trim().to_string(),
            agency: payload.agency.trim().to_string(),
            notice_type: payload.notice_type.trim().to_string(),
            public_text: payload.public_text.trim().to_string(),
            ipfs_hash,
            jurisdiction: optional_trimmed(&payload.jurisdiction),
            batch_id: payload.batch_id,
        })
    }

    /// Checks that `server_address` is an active process server registered
    /// under `agency`.
    pub async fn validate_agency(
        &self,
        server_address: &str,
        agency: &str,
    ) -> Result<AgencyValidation> {
        let server_address = address::normalize_address(server_address)
            .map_err(|_| NoticeError::validation("server_address", "invalid TRON address"))?;
        validate_non_empty_string("agency", agency)?;

        let Some(server) = self.store.get_process_server(&server_address).await? else {
            return Ok(AgencyValidation::rejected(None, "process server is not registered"));
        };

        if !server.active {
            return Ok(AgencyValidation::rejected(
                Some(server.agency),
                "process server is inactive",
            ));
        }

        if normalize_agency(&server.agency) != normalize_agency(agency) {
            return Ok(AgencyValidation::rejected(
                Some(server.agency),
                "agency does not match the registered agency",
            ));
        }

        Ok(AgencyValidation {
            valid: true,
            registered_agency: Some(server.agency),
            reason: None,
        })
    }

    async fn require_agency(&self, server_address: &str, agency: &str) -> Result<()> {
        let validation = self.validate_agency(server_address, agency).await?;
        if !validation.valid {
            return Err(NoticeError::AgencyMismatch {
                server: server_address.to_string(),
                reason: validation.reason.unwrap_or_default(),
            });
        }
        Ok(())
    }

    pub async fn stage(&self, request: &StageNoticeRequest) -> Result<StagedNotice> {
        let payload = self.check_payload(NoticePayload {
            server_address: request.server_address.clone(),
            recipient_address: request.recipient_address.clone(),
            case_number: request.case_number.clone(),
            agency: request.agency.clone(),
            notice_type: request.notice_type.clone(),
            public_text: request.public_text.clone(),
            ipfs_hash: request.ipfs_hash.clone(),
            jurisdiction: request.jurisdiction.clone(),
            batch_id: None,
        })?;
        self.require_agency(&payload.server_address, &payload.agency).await?;

        let staged = self.store.insert_staged(&payload).await?;
        tracing::info!(
            "📝 Staged notice {} (case {}) for {}",
            staged.id,
            staged.payload.case_number,
            staged.payload.recipient_address
        );
        Ok(staged)
    }

    pub async fn status(&self, id: i64) -> Result<StagedNotice> {
        self.store
            .get_staged(id)
            .await?
            .ok_or_else(|| NoticeError::NotFound {
                entity: "staged notice",
                key: id.to_string(),
            })
    }

    pub async fn confirm(&self, request: &ConfirmNoticeRequest) -> Result<StagedNotice> {
        validate_tx_hash("transaction_hash", request.transaction_hash.trim())?;
        let tx_hash = normalize_tx_hash(&request.transaction_hash);
        let staged = self.status(request.staged_id).await?;

        match staged.status {
            NoticeStatus::Pending => {}
            NoticeStatus::Confirmed
                if staged.transaction_hash.as_deref() == Some(tx_hash.as_str()) =>
            {
                tracing::debug!("Notice {} already confirmed with {}", staged.id, tx_hash);
                return Ok(staged);
            }
            other => {
                return Err(NoticeError::Conflict {
                    message: format!("notice {} is {} and cannot be confirmed", staged.id, other),
                })
            }
        }

        if let Some(owner) = self.store.find_staged_by_tx(&tx_hash).await? {
            if owner.id != staged.id {
                return Err(NoticeError::Conflict {
                    message: format!(
                        "transaction {} already belongs to notice {}",
                        tx_hash, owner.id
                    ),
                });
            }
        }

        if !self.store.attach_transaction(staged.id, &tx_hash).await? {
            return Err(NoticeError::Conflict {
                message: format!(
                    "notice {} already carries transaction {}",
                    staged.id,
                    staged.transaction_hash.as_deref().unwrap_or("<unknown>")
                ),
            });
        }

        self.store
            .upsert_transaction(&TransactionRecord {
                tx_hash: tx_hash.clone(),
                staged_id: Some(staged.id),
                kind: TX_KIND_NOTICE.to_string(),
                status: TxStatus::Pending,
                block_number: None,
                recorded_at: Utc::now(),
            })
            .await?;

        match self.chain.transaction_info(&tx_hash).await {
            Ok(Some(info)) if info.success => {
                let block_number = Some(info.block_number as i64);
                let alert_id = optional_trimmed(&request.alert_id);
                let document_id = optional_trimmed(&request.document_id);

                let confirmed = self
                    .store
                    .mark_confirmed(
                        staged.id,
                        &ChainConfirmation {
                            transaction_hash: tx_hash.clone(),
                            alert_id: alert_id.clone(),
                            document_id: document_id.clone(),
                            block_number,
                        },
                    )
                    .await?;
                self.record_tx_outcome(&tx_hash, staged.id, TxStatus::Success, block_number)
                    .await?;

                if !confirmed {
                    tracing::warn!(
                        "Notice {} changed state before tx {} could confirm it",
                        staged.id,
                        tx_hash
                    );
                    return self.status(staged.id).await;
                }

                if let Some(alert_id) = alert_id {
                    self.store
                        .upsert_served(&served_from_staged(
                            Some(&staged),
                            &alert_id,
                            document_id,
                            &staged.payload.server_address,
                            &staged.payload.recipient_address,
                            &tx_hash,
                            block_number,
                        ))
                        .await?;
                }
                tracing::info!("✅ Notice {} confirmed in block {}", staged.id, info.block_number);
            }
            Ok(Some(info)) => {
                self.store
                    .transition_status(staged.id, NoticeStatus::Pending, NoticeStatus::Failed)
                    .await?;
                self.record_tx_outcome(
                    &tx_hash,
                    staged.id,
                    TxStatus::Failed,
                    Some(info.block_number as i64),
                )
                .await?;
                tracing::warn!(
                    "❌ Transaction {} for notice {} failed on chain: {}",
                    tx_hash,
                    staged.id,
                    info.result
                );
            }
            Ok(None) => {
                tracing::debug!(
                    "Transaction {} not yet in a block; notice {} left pending",
                    tx_hash,
                    staged.id
                );
            }
            Err(e) => {
                tracing::warn!(
                    "Could not look up transaction {} for notice {}: {}",
                    tx_hash,
                    staged.id,
                    e
                );
            }
        }

        self.status(staged.id).await
    }

    async fn record_tx_outcome(
        &self,
        tx_hash: &str,
        staged_id: i64,
        status: TxStatus,
        block_number: Option<i64>,
    ) -> Result<()> {
        self.store
            .upsert_transaction(&TransactionRecord {
                tx_hash: tx_hash.to_string(),
                staged_id: Some(staged_id),
                kind: TX_KIND_NOTICE.to_string(),
                status,
                block_number,
                recorded_at: Utc::now(),
            })
            .await
    }

    pub async fn batch_stage(&self, request: &BatchStageRequest) -> Result<BatchStageResult> {
        if request.notices.is_empty() || request.notices.len() > self.rules.max_batch_size {
            return Err(NoticeError::validation(
                "notices",
                format!(
                    "batch must contain between 1 and {} notices, got {}",
                    self.rules.max_batch_size,
                    request.notices.len()
                ),
            ));
        }

        let server_address = address::normalize_address(&request.server_address)
            .map_err(|_| NoticeError::validation("server_address", "invalid TRON address"))?;
        self.require_agency(&server_address, &request.agency).await?;

        let batch_id = optional_trimmed(&request.batch_id).unwrap_or_else(|| {
            format!("batch_{}", Utc::now().format("%Y%m%d_%H%M%S_%3f"))
        });

        let mut staged = Vec::with_capacity(request.notices.len());
        let mut failures = Vec::new();

        for (index, item) in request.notices.iter().enumerate() {
            let checked = self.check_payload(NoticePayload {
                server_address: server_address.clone(),
                recipient_address: item.recipient_address.clone(),
                case_number: item.case_number.clone(),
                agency: request.agency.clone(),
                notice_type: item.notice_type.clone(),
                public_text: item.public_text.clone(),
                ipfs_hash: item.ipfs_hash.clone(),
                jurisdiction: item.jurisdiction.clone(),
                batch_id: Some(batch_id.clone()),
            });

            let outcome = match checked {
                Ok(payload) => self.store.insert_staged(&payload).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(notice) => staged.push(notice),
                Err(e @ NoticeError::ValidationError { .. }) => {
                    tracing::warn!("Batch {} item {} rejected: {}", batch_id, index, e);
                    failures.push(BatchFailure {
                        index,
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            "📦 Batch {}: staged {} notices, {} rejected",
            batch_id,
            staged.len(),
            failures.len()
        );

        Ok(BatchStageResult {
            batch_id,
            staged,
            failures,
        })
    }

    pub async fn recent(&self, query: &RecentQuery) -> Result<Vec<ServedNotice>> {
        let server = match query.server_address.as_deref().map(str::trim) {
            Some(addr) if !addr.is_empty() => Some(address::normalize_address(addr).map_err(
                |_| NoticeError::validation("server_address", "invalid TRON address"),
            )?),
            _ => None,
        };
        self.store
            .recent_served(clamp_recent_limit(query.limit), server.as_deref())
            .await
    }

    pub async fn register_server(&self, request: &RegisterServerRequest) -> Result<ProcessServer> {
        let wallet_address = address::normalize_address(&request.wallet_address)
            .map_err(|_| NoticeError::validation("wallet_address", "invalid TRON address"))?;
        validate_non_empty_string("agency", &request.agency)?;

        let server = self
            .store
            .upsert_process_server(&ProcessServerUpsert {
                wallet_address,
                agency: Some(request.agency.trim().to_string()),
                display_name: optional_trimmed(&request.display_name),
                active: request.active,
            })
            .await?;
        tracing::info!(
            "👤 Process server {} registered for {}",
            server.wallet_address,
            server.agency
        );
        Ok(server)
    }

    /// Moves pending rows that never reported a transaction to `expired`.
    pub async fn expire_stale(&self, max_age: chrono::Duration) -> Result<u64> {
        let expired = self.store.expire_stale(Utc::now() - max_age).await?;
        if expired > 0 {
            tracing::info!("⌛ Expired {} stale staged notices", expired);
        }
        Ok(expired)
    }
}
