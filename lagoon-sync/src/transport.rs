//! GraphQL transport abstraction.
//!
//! The wire-level client is an external collaborator; the engine consumes
//! it through [`GraphQlClient`] only. Queries return a response envelope in
//! which data and field-level errors can coexist; subscriptions deliver an
//! event stream with out-of-band cancellation.

use async_trait::async_trait;
use lagoon_types::{AuthMode, JsonObject};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Backend message fragment signaling a dropped realtime connection.
pub const CONNECTION_FAILED: &str = "Connection failed";
/// Backend message fragment signaling a failed subscription handshake.
pub const SUBSCRIPTION_INIT_ERROR: &str = "Realtime subscription init error";

/// A single GraphQL request.
#[derive(Debug, Clone)]
pub struct GraphQlRequest {
    /// The operation document.
    pub query: String,
    /// Operation variables.
    pub variables: JsonObject,
    pub auth_mode: AuthMode,
    /// Token for function-based authorization, when configured.
    pub auth_token: Option<String>,
}

/// A field-level error returned alongside (or instead of) data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphQlFieldError {
    pub message: String,
    pub error_type: Option<String>,
}

impl GraphQlFieldError {
    pub fn new(message: impl Into<String>, error_type: Option<&str>) -> Self {
        Self {
            message: message.into(),
            error_type: error_type.map(String::from),
        }
    }
}

/// The response envelope: data and errors can coexist.
#[derive(Debug, Clone, Default)]
pub struct GraphQlResponse {
    pub data: Option<Value>,
    pub errors: Vec<GraphQlFieldError>,
}

impl GraphQlResponse {
    pub fn with_data(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
        }
    }
}

/// Failures raised by the transport itself, before any response envelope
/// exists.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The request never completed; retryable.
    #[error("network error: {0}")]
    Network(String),

    /// The client could not attach credentials (no signed-in user, expired
    /// session); not retryable under the same auth mode.
    #[error("no valid credentials: {0}")]
    ClientAuth(String),
}

/// A subscription-level failure delivered on the event stream.
#[derive(Debug, Clone)]
pub struct SubscriptionFailure {
    pub message: String,
}

impl SubscriptionFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Events delivered on an open subscription.
#[derive(Debug, Clone)]
pub enum SubscriptionEvent {
    /// The backend acknowledged the subscription; live coverage has begun.
    Acknowledged,
    /// An inbound record envelope.
    Data(GraphQlResponse),
    /// A subscription-level error. The stream is dead after this.
    Error(SubscriptionFailure),
}

/// A live subscription: an event stream plus out-of-band cancellation.
pub struct SubscriptionHandle {
    events: mpsc::UnboundedReceiver<SubscriptionEvent>,
    cancel: Option<oneshot::Sender<()>>,
}

impl SubscriptionHandle {
    pub fn new(
        events: mpsc::UnboundedReceiver<SubscriptionEvent>,
        cancel: oneshot::Sender<()>,
    ) -> Self {
        Self {
            events,
            cancel: Some(cancel),
        }
    }

    /// The next event, or `None` once the transport closes the stream.
    pub async fn next(&mut self) -> Option<SubscriptionEvent> {
        self.events.recv().await
    }

    /// Cancels the subscription. Safe to call more than once; dropping the
    /// handle cancels implicitly.
    pub fn unsubscribe(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// The wire-level GraphQL client the engine drives.
#[async_trait]
pub trait GraphQlClient: Send + Sync {
    /// Executes a query or mutation.
    async fn execute(&self, request: GraphQlRequest) -> Result<GraphQlResponse, TransportError>;

    /// Opens a subscription.
    async fn subscribe(&self, request: GraphQlRequest) -> Result<SubscriptionHandle, TransportError>;
}

/// A scriptable client for tests.
pub mod mock {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    /// One recorded `execute` call.
    #[derive(Debug, Clone)]
    pub struct RecordedCall {
        pub operation: String,
        pub auth_mode: AuthMode,
        pub variables: JsonObject,
    }

    /// Test-side controller for one opened subscription.
    pub struct SubscriptionController {
        pub operation: String,
        pub auth_mode: AuthMode,
        pub variables: JsonObject,
        events: mpsc::UnboundedSender<SubscriptionEvent>,
        cancel: Mutex<Option<oneshot::Receiver<()>>>,
    }

    impl SubscriptionController {
        /// Whether the request carried a server-side filter variable.
        pub fn has_filter(&self) -> bool {
            self.variables.contains_key("filter")
        }

        pub fn send_ack(&self) {
            let _ = self.events.send(SubscriptionEvent::Acknowledged);
        }

        pub fn send_data(&self, response: GraphQlResponse) {
            let _ = self.events.send(SubscriptionEvent::Data(response));
        }

        pub fn send_error(&self, message: impl Into<String>) {
            let _ = self
                .events
                .send(SubscriptionEvent::Error(SubscriptionFailure::new(message)));
        }

        /// Whether the engine cancelled (or dropped) this subscription.
        pub fn is_unsubscribed(&self) -> bool {
            let mut cancel = self.cancel.lock().unwrap();
            match cancel.as_mut() {
                Some(rx) => match rx.try_recv() {
                    Ok(()) => true,
                    Err(oneshot::error::TryRecvError::Closed) => true,
                    Err(oneshot::error::TryRecvError::Empty) => false,
                },
                None => true,
            }
        }
    }

    /// A GraphQL client whose responses are queued by the test.
    #[derive(Default)]
    pub struct MockGraphQlClient {
        responses: Mutex<HashMap<String, VecDeque<Result<GraphQlResponse, TransportError>>>>,
        calls: Mutex<Vec<RecordedCall>>,
        subscriptions: Mutex<Vec<Arc<SubscriptionController>>>,
    }

    impl MockGraphQlClient {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queues a response for the named operation. Responses pop in FIFO
        /// order; an exhausted queue yields a network error.
        pub fn enqueue(
            &self,
            operation: impl Into<String>,
            response: Result<GraphQlResponse, TransportError>,
        ) {
            self.responses
                .lock()
                .unwrap()
                .entry(operation.into())
                .or_default()
                .push_back(response);
        }

        /// All recorded `execute` calls in arrival order.
        pub fn calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().unwrap().clone()
        }

        /// Controllers for every subscription opened so far, in open order.
        pub fn subscriptions(&self) -> Vec<Arc<SubscriptionController>> {
            self.subscriptions.lock().unwrap().clone()
        }

        /// How many opened subscriptions have been cancelled.
        pub fn unsubscribe_count(&self) -> usize {
            self.subscriptions()
                .iter()
                .filter(|s| s.is_unsubscribed())
                .count()
        }
    }

    /// Extracts the operation name from a request document, e.g.
    /// `query SyncPosts(...) { syncPosts(...) { ... } }` -> `syncPosts`.
    fn operation_of(request: &GraphQlRequest) -> String {
        request
            .query
            .split('{')
            .nth(1)
            .and_then(|body| body.split(['(', ' ', '\n']).find(|s| !s.is_empty()))
            .unwrap_or_default()
            .trim()
            .to_string()
    }

    #[async_trait]
    impl GraphQlClient for MockGraphQlClient {
        async fn execute(
            &self,
            request: GraphQlRequest,
        ) -> Result<GraphQlResponse, TransportError> {
            let operation = operation_of(&request);
            self.calls.lock().unwrap().push(RecordedCall {
                operation: operation.clone(),
                auth_mode: request.auth_mode,
                variables: request.variables.clone(),
            });
            self.responses
                .lock()
                .unwrap()
                .get_mut(&operation)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| {
                    Err(TransportError::Network(format!(
                        "no scripted response for {operation}"
                    )))
                })
        }

        async fn subscribe(
            &self,
            request: GraphQlRequest,
        ) -> Result<SubscriptionHandle, TransportError> {
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let (cancel_tx, cancel_rx) = oneshot::channel();
            let controller = Arc::new(SubscriptionController {
                operation: operation_of(&request),
                auth_mode: request.auth_mode,
                variables: request.variables.clone(),
                events: events_tx,
                cancel: Mutex::new(Some(cancel_rx)),
            });
            self.subscriptions.lock().unwrap().push(controller);
            Ok(SubscriptionHandle::new(events_rx, cancel_tx))
        }
    }
}
