//! Remote synchronization engine for Lagoon.
//!
//! Keeps the local store consistent with a remote GraphQL-style backend:
//!
//! 1. **Bulk sync** — [`SyncProcessor`] pages every syncable model down from
//!    the backend in dependency order and emits normalized pages
//! 2. **Live feed** — [`SubscriptionProcessor`] holds one subscription per
//!    (model, mutation) pair and funnels validated records into the same
//!    merge path
//! 3. **Merge** — [`PageMerger`] applies both flows to the local store under
//!    the engine's own writer id so observers and the mutation outbox can
//!    tell sync-originated writes from local ones
//!
//! Both processors negotiate authorization per model by walking the model's
//! configured auth modes, absorb transient network failures with jittered
//! backoff, and degrade a single unauthorized model or subscription without
//! taking down the rest of the engine.

mod auth;
mod config;
mod error;
mod merger;
mod processor;
mod queries;
mod retry;
mod rtf;
mod session;
pub mod transport;

pub use auth::{resolve_authorization, resolve_read_auth_modes, AuthorizationInfo};
pub use config::SyncConfig;
pub use error::{
    report_error, ErrorCategory, ErrorHandler, ProcessKind, SyncError, SyncErrorEvent,
    SyncResult, RECOVERY_SUGGESTION,
};
pub use merger::{EmptyOutbox, MutationOutbox, PageMerger};
pub use processor::page_sync::{ModelSyncPosition, SyncModelPage, SyncProcessor};
pub use processor::subscription::{
    ControlEvent, DataStream, MutationKind, SubscriptionProcessor, SubscriptionRecord,
};
pub use retry::{backoff_delay, retry_with_backoff, AuthModeCursor, MAX_RETRY_DELAY};
pub use rtf::{classify_filter_error, filter_error_remediation, FilterErrorKind};
pub use session::{AuthSession, FixedTokenProvider, TokenProvider};
pub use transport::{
    GraphQlClient, GraphQlFieldError, GraphQlRequest, GraphQlResponse, SubscriptionEvent,
    SubscriptionFailure, SubscriptionHandle, TransportError, CONNECTION_FAILED,
    SUBSCRIPTION_INIT_ERROR,
};
