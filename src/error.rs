//! Error types for CRM data operations
//!
//! Errors are classified by how the caller should react:
//! - Retryable: the transport to the record store failed
//! - NonRetryable: remote rejections, not-found lookups, misconfiguration
//! - RequiresUserAction: input that has to be corrected before resubmitting

use thiserror::Error;

/// Error types for record store and entity service operations
#[derive(Debug, Error)]
pub enum CrmError {
    // Caught before any request is sent
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Record {id} not found in {table}")]
    NotFound { table: String, id: i64 },

    // Reported by the record store
    #[error("{message}")]
    RemoteFailure {
        message: String,
        /// Records in the same batch that the store accepted before the failure.
        succeeded: usize,
    },

    // The call itself failed
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type CrmResult<T> = Result<T, CrmError>;

impl CrmError {
    pub fn remote(message: impl Into<String>) -> Self {
        CrmError::RemoteFailure {
            message: message.into(),
            succeeded: 0,
        }
    }

    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, CrmError::Transport(_))
    }

    /// Returns true if this error requires user action to resolve
    pub fn requires_user_action(&self) -> bool {
        matches!(self, CrmError::Validation(_))
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            CrmError::Validation(_) => "Check the highlighted fields and try again.",
            CrmError::NotFound { .. } => "The record may have been deleted. Refresh the list.",
            CrmError::RemoteFailure { .. } => "The server rejected the request. Review the message.",
            CrmError::Transport(_) => "Check your internet connection and try again.",
            CrmError::Config(_) => "Check your configuration in ~/.crmdesk/config.json",
        }
    }
}

impl From<reqwest::Error> for CrmError {
    fn from(err: reqwest::Error) -> Self {
        CrmError::Transport(err.to_string())
    }
}

/// Serializable error representation for the view layer
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceError {
    pub message: String,
    pub error_type: ErrorType,
    pub can_retry: bool,
    pub recovery_suggestion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorType {
    Retryable,
    NonRetryable,
    RequiresUserAction,
}

impl From<&CrmError> for ServiceError {
    fn from(err: &CrmError) -> Self {
        let error_type = if err.requires_user_action() {
            ErrorType::RequiresUserAction
        } else if err.is_retryable() {
            ErrorType::Retryable
        } else {
            ErrorType::NonRetryable
        };

        ServiceError {
            message: err.to_string(),
            error_type,
            can_retry: err.is_retryable(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
        }
    }
}
