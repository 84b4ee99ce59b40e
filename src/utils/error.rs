use thiserror::Error;

#[derive(Error, Debug)]
pub enum NoticeError {
    #[error("Chain API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value for {field} ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Validation error on {field}: {message}")]
    ValidationError { field: String, message: String },

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Agency mismatch for server {server}: {reason}")]
    AgencyMismatch { server: String, reason: String },

    #[error("Chain error: {message}")]
    ChainError { message: String },
}

pub type Result<T> = std::result::Result<T, NoticeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Storage,
    Configuration,
    Input,
    Chain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl NoticeError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        NoticeError::ValidationError {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            NoticeError::ApiError(_) => ErrorCategory::Network,
            NoticeError::DatabaseError(_) | NoticeError::IoError(_) => ErrorCategory::Storage,
            NoticeError::ConfigError { .. }
            | NoticeError::MissingConfigError { .. }
            | NoticeError::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            NoticeError::SerializationError(_)
            | NoticeError::ValidationError { .. }
            | NoticeError::NotFound { .. }
            | NoticeError::Conflict { .. }
            | NoticeError::AgencyMismatch { .. } => ErrorCategory::Input,
            NoticeError::ChainError { .. } => ErrorCategory::Chain,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Input => ErrorSeverity::High,
            ErrorCategory::Network | ErrorCategory::Chain => ErrorSeverity::Medium,
            ErrorCategory::Storage | ErrorCategory::Configuration => ErrorSeverity::Critical,
        }
    }

    /// Whether retrying the same call later can succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            NoticeError::ApiError(e) => {
                e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
            }
            NoticeError::DatabaseError(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            NoticeError::ChainError { .. } => true,
            _ => false,
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            NoticeError::ApiError(_) => "Could not reach the blockchain API".to_string(),
            NoticeError::DatabaseError(_) => "The notice database is unavailable".to_string(),
            NoticeError::NotFound { entity, key } => format!("No {} with key {}", entity, key),
            NoticeError::AgencyMismatch { server, .. } => {
                format!("Process server {} is not authorized for this agency", server)
            }
            other => other.to_string(),
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Network => "Check the chain endpoint and API key, then retry",
            ErrorCategory::Storage => "Check DATABASE_URL and that PostgreSQL is reachable",
            ErrorCategory::Configuration => "Fix the configuration file or command-line flags",
            ErrorCategory::Input => "Correct the request payload and submit it again",
            ErrorCategory::Chain => "Wait for the next block and retry",
        }
    }
}
