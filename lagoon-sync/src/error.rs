//! Error types and the caller-supplied error handler seam.
//!
//! Every failure is classified locally before anything else happens:
//! retryable classes are absorbed by backoff or auth-mode fallback and only
//! reach the external handler once retries are exhausted; non-retryable
//! classes reach the handler exactly once before their owning pipeline is
//! marked failed. No per-model or per-subscription failure crosses the
//! engine's public start/stop boundary.

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Guidance attached to every error event handed to the external handler.
pub const RECOVERY_SUGGESTION: &str = "Ensure the deployed schema and authorization rules match \
     the client build, and that the signed-in user has access to this model.";

/// Errors that can occur while synchronizing with the backend.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport-level failure; retried indefinitely with backoff.
    #[error("network error: {0}")]
    Network(String),

    /// The backend rejected the request's authorization; retried by
    /// advancing to the next configured auth mode.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// No usable credentials on this side of the wire; non-retryable.
    #[error("no valid credentials: {0}")]
    ClientSideAuth(String),

    /// The backend refused the request outright; non-retryable.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Malformed or impossible payload; terminal for the owning pipeline.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The processor was stopped while the operation was in flight.
    #[error("operation stopped")]
    Stopped,

    /// Local persistence failed.
    #[error("storage error: {0}")]
    Storage(#[from] lagoon_storage::StorageError),

    /// A record or model did not line up with the loaded schema.
    #[error("schema error: {0}")]
    Schema(#[from] lagoon_types::Error),
}

impl SyncError {
    /// Whether the same request may be retried under the same auth mode.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Whether exhausting all auth modes on this error degrades the model
    /// to an empty result instead of failing it.
    pub fn degrades_gracefully(&self) -> bool {
        matches!(self, Self::ClientSideAuth(_) | Self::Forbidden(_))
    }
}

/// Coarse classification surfaced to the external error handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    BadModel,
    BadRecord,
    ConfigError,
    Transient,
    Unauthorized,
    Unknown,
}

/// Classifies a backend error message for reporting purposes.
pub fn categorize_message(message: &str) -> ErrorCategory {
    if message.contains("Unauthorized") || message.contains("Not Authorized") {
        ErrorCategory::Unauthorized
    } else if message.contains("Connection failed")
        || message.contains("Connection closed")
        || message.contains("Network")
        || message.contains("Timeout")
    {
        ErrorCategory::Transient
    } else if message.contains("Validation error") || message.contains("Variable") {
        ErrorCategory::BadRecord
    } else if message.contains("Cannot query field") || message.contains("Unknown type") {
        ErrorCategory::BadModel
    } else {
        ErrorCategory::Unknown
    }
}

impl From<&SyncError> for ErrorCategory {
    fn from(err: &SyncError) -> Self {
        match err {
            SyncError::Network(_) | SyncError::Stopped => Self::Transient,
            SyncError::Unauthorized(_)
            | SyncError::ClientSideAuth(_)
            | SyncError::Forbidden(_) => Self::Unauthorized,
            SyncError::Protocol(_) => Self::BadRecord,
            SyncError::Schema(_) => Self::BadModel,
            SyncError::Storage(_) => Self::Unknown,
        }
    }
}

/// Which engine process produced an error event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    Sync,
    Subscribe,
}

/// The payload delivered to the external error handler.
#[derive(Debug, Clone)]
pub struct SyncErrorEvent {
    pub recovery_suggestion: String,
    pub message: String,
    /// The model whose pipeline hit the error, when attributable.
    pub model: Option<String>,
    /// The operation (query or mutation name) in flight, when known.
    pub operation: Option<String>,
    pub error_type: ErrorCategory,
    pub process: ProcessKind,
    /// Debug rendering of the underlying cause, when one exists.
    pub cause: Option<String>,
}

impl SyncErrorEvent {
    pub fn new(process: ProcessKind, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            recovery_suggestion: RECOVERY_SUGGESTION.to_string(),
            error_type: categorize_message(&message),
            message,
            model: None,
            operation: None,
            process,
            cause: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.error_type = category;
        self
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

/// Caller-supplied sink for unrecoverable and partial-data errors.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle(&self, event: SyncErrorEvent);
}

/// Delivers an event to the handler, containing any panic it raises.
/// Handler failures are logged and never propagate into the engine.
pub async fn report_error(handler: &Arc<dyn ErrorHandler>, event: SyncErrorEvent) {
    let outcome = AssertUnwindSafe(handler.handle(event)).catch_unwind().await;
    if outcome.is_err() {
        error!("error handler panicked while processing an error event");
    }
}
