use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Failure taxonomy for handler errors, declared in classification priority order.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Timeout,
    AiService,
    Database,
    Storage,
    Auth,
    Validation,
    Unknown,
}

impl ErrorCategory {
    /// Every category, highest classification priority first.
    pub const PRIORITY: [ErrorCategory; 7] = [
        ErrorCategory::Timeout,
        ErrorCategory::AiService,
        ErrorCategory::Database,
        ErrorCategory::Storage,
        ErrorCategory::Auth,
        ErrorCategory::Validation,
        ErrorCategory::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::AiService => "ai_service",
            ErrorCategory::Database => "database",
            ErrorCategory::Storage => "storage",
            ErrorCategory::Auth => "auth",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Validation, auth and timeout failures are always terminal.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ErrorCategory::Validation | ErrorCategory::Auth | ErrorCategory::Timeout
        )
    }
}

impl Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure reported by a generation collaborator or by the dispatch path.
///
/// `category` is optional metadata; when absent the classifier falls back
/// to message heuristics.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct GenerationError {
    pub category: Option<ErrorCategory>,
    pub message: String,
    /// Provider-specific code, e.g. an HTTP status or SDK error code.
    pub code: Option<String>,
    /// Name of the collaborator that raised the error, if known.
    pub collaborator: Option<String>,
}

impl GenerationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            category: None,
            message: message.into(),
            code: None,
            collaborator: None,
        }
    }

    pub fn categorized(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category: Some(category),
            ..Self::new(message)
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::categorized(ErrorCategory::Timeout, message)
    }

    pub fn ai_service(message: impl Into<String>) -> Self {
        Self::categorized(ErrorCategory::AiService, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::categorized(ErrorCategory::Storage, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::categorized(ErrorCategory::Auth, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::categorized(ErrorCategory::Validation, message)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_collaborator(mut self, collaborator: impl Into<String>) -> Self {
        self.collaborator = Some(collaborator.into());
        self
    }
}

/// Errors raised below the store boundary.
///
/// None of these escape [`crate::store::JobStore`]; they are logged there
/// and surface as `false` or not-found.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("failed to decode row {id} from {table}: {reason}")]
    Decode {
        table: &'static str,
        id: String,
        reason: String,
    },
}

impl StoreError {
    pub fn decode(
        table: &'static str,
        id: impl Display,
        reason: impl Display,
    ) -> Self {
        StoreError::Decode {
            table,
            id: id.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Transient errors are worth retrying on the next scan; malformed rows are not.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StoreError::Decode { .. })
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StoreError::Unavailable(err.to_string())
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}
