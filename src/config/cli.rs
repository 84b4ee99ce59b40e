use crate::utils::error::{NoticeError, Result};
use clap::Subcommand;
use serde::de::DeserializeOwned;
use std::io::Read;

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Poll the chain and reconcile contract events into the database
    Sync {
        /// Run a single polling pass and print its report
        #[arg(long)]
        once: bool,
    },

    /// Create tables and indexes if they do not exist
    InitSchema,

    /// Stage a notice (JSON payload, `@file` or `-` for stdin)
    Stage { payload: String },

    /// Show a staged notice
    Status { id: i64 },

    /// Attach a transaction to a staged notice (JSON payload)
    Confirm { payload: String },

    /// Check that a process server is registered for an agency
    ValidateAgency {
        #[arg(long)]
        server: String,
        #[arg(long)]
        agency: String,
    },

    /// Stage up to 50 notices for one server (JSON payload)
    BatchStage { payload: String },

    /// List recently served notices, newest first
    Recent {
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        server: Option<String>,
    },

    /// Register or update a process server
    RegisterServer {
        #[arg(long)]
        wallet: String,
        #[arg(long)]
        agency: String,
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long)]
        inactive: bool,
    },

    /// Expire pending notices that never reported a transaction
    ExpireStale {
        #[arg(long, default_value = "72")]
        older_than_hours: u64,
    },
}

/// Reads a JSON argument given inline, as `@path`, or as `-` for stdin.
pub fn read_json_arg<T: DeserializeOwned>(arg: &str) -> Result<T> {
    let raw = match arg {
        "-" => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
        path if path.starts_with('@') => std::fs::read_to_string(&path[1..])?,
        inline => inline.to_string(),
    };
    serde_json::from_str(&raw).map_err(|e| NoticeError::validation("payload", e.to_string()))
}
