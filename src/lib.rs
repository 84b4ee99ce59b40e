pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::{cli::Command, CliConfig};

pub use adapters::{InMemoryNoticeStore, PgNoticeStore, TronGridClient, TronGridSettings};
pub use config::toml_config::NoticeSyncConfig;
pub use crate::core::{BlockchainSync, NoticeService, StagingRules, SyncSettings};
pub use utils::error::{NoticeError, Result};
