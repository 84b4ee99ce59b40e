use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeStatus {
    Pending,
    Confirmed,
    Failed,
    Expired,
}

impl NoticeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoticeStatus::Pending => "pending",
            NoticeStatus::Confirmed => "confirmed",
            NoticeStatus::Failed => "failed",
            NoticeStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for NoticeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NoticeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(NoticeStatus::Pending),
            "confirmed" => Ok(NoticeStatus::Confirmed),
            "failed" => Ok(NoticeStatus::Failed),
            "expired" => Ok(NoticeStatus::Expired),
            other => Err(format!("unknown notice status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessServer {
    pub wallet_address: String,
    pub agency: String,
    pub display_name: Option<String>,
    pub active: bool,
    pub registered_at: DateTime<Utc>,
}

/// Off-chain payload of a notice, as submitted before its transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoticePayload {
    pub server_address: String,
    pub recipient_address: String,
    pub case_number: String,
    pub agency: String,
    pub notice_type: String,
    pub public_text: String,
    pub ipfs_hash: Option<String>,
    pub jurisdiction: Option<String>,
    pub batch_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedNotice {
    pub id: i64,
    #[serde(flatten)]
    pub payload: NoticePayload,
    pub status: NoticeStatus,
    pub transaction_hash: Option<String>,
    pub alert_id: Option<String>,
    pub document_id: Option<String>,
    pub block_number: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

/// Chain identifiers written onto a staged row when it becomes confirmed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainConfirmation {
    pub transaction_hash: String,
    pub alert_id: Option<String>,
    pub document_id: Option<String>,
    pub block_number: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServedNotice {
    pub alert_id: String,
    pub document_id: Option<String>,
    pub server_address: String,
    pub recipient_address: String,
    pub staged_id: Option<i64>,
    pub case_number: Option<String>,
    pub transaction_hash: String,
    pub block_number: Option<i64>,
    pub acknowledged: bool,
    pub served_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoticeView {
    pub id: i64,
    pub alert_id: String,
    pub viewer_address: String,
    pub acknowledged: bool,
    pub transaction_hash: Option<String>,
    pub viewed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Success,
    Failed,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Success => "success",
            TxStatus::Failed => "failed",
        }
    }
}

impl FromStr for TxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TxStatus::Pending),
            "success" => Ok(TxStatus::Success),
            "failed" => Ok(TxStatus::Failed),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub tx_hash: String,
    pub staged_id: Option<i64>,
    pub kind: String,
    pub status: TxStatus,
    pub block_number: Option<i64>,
    pub recorded_at: DateTime<Utc>,
}

/// Position of the sync loop in the chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub block_number: u64,
    pub block_timestamp_ms: i64,
}

/// Receipt summary for a transaction that has been included in a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    pub tx_hash: String,
    pub block_number: u64,
    pub success: bool,
    pub result: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChainEventKind {
    NoticeServed {
        alert_id: String,
        document_id: Option<String>,
        server: String,
        recipient: String,
    },
    NoticeAcknowledged {
        alert_id: String,
        recipient: String,
    },
    ServerRegistered {
        server: String,
    },
    Other {
        name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub transaction_hash: String,
    pub block_number: u64,
    pub block_timestamp_ms: i64,
    #[serde(flatten)]
    pub kind: ChainEventKind,
}

impl ChainEvent {
    pub fn name(&self) -> &str {
        match &self.kind {
            ChainEventKind::NoticeServed { .. } => "NoticeServed",
            ChainEventKind::NoticeAcknowledged { .. } => "NoticeAcknowledged",
            ChainEventKind::ServerRegistered { .. } => "ServerRegistered",
            ChainEventKind::Other { name } => name,
        }
    }
}
