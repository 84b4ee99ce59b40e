pub mod staging;
pub mod sync;

pub use crate::domain::ports::{ChainClient, NoticeStore};
pub use crate::utils::error::Result;
pub use staging::{NoticeService, StagingRules};
pub use sync::{BlockchainSync, ReconcileOutcome, SyncSettings, TickReport};
