//! Live subscription feed.
//!
//! Three independent logical subscriptions per syncable model — one per
//! mutation kind — so auth-mode negotiation and filter fallback retry
//! per-operation without tearing down siblings. Inbound records are
//! validated against the model's sync expression and buffered until a data
//! observer attaches; the buffer then drains in arrival order.

use crate::auth;
use crate::config::SyncConfig;
use crate::error::{
    report_error, ErrorCategory, ErrorHandler, ProcessKind, SyncErrorEvent,
};
use crate::queries;
use crate::retry::AuthModeCursor;
use crate::rtf;
use crate::session::TokenProvider;
use crate::transport::{
    GraphQlClient, GraphQlRequest, SubscriptionEvent, CONNECTION_FAILED,
    SUBSCRIPTION_INIT_ERROR,
};
use lagoon_types::{
    IdentityClaims, JsonObject, ModelDefinition, ModelSchema, PredicateGroup,
    UserCredentialState,
};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// The kind of remote mutation a subscription listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl MutationKind {
    pub const ALL: [MutationKind; 3] = [Self::Create, Self::Update, Self::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
        }
    }
}

/// A validated inbound record.
#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    pub model: String,
    pub kind: MutationKind,
    pub record: JsonObject,
}

/// Control-plane signals.
#[derive(Debug, Clone)]
pub enum ControlEvent {
    /// Every (model, operation) subscription finished its readiness
    /// handshake; live coverage has begun.
    Connected,
    /// One (model, operation) pair failed terminally. Siblings continue.
    Error {
        model: String,
        operation: MutationKind,
        message: String,
    },
}

/// Buffers records until an observer attaches, then forwards. Draining is a
/// pure function of (queue, observer-presence).
struct RecordBuffer {
    queue: VecDeque<SubscriptionRecord>,
    observer: Option<mpsc::UnboundedSender<SubscriptionRecord>>,
}

impl RecordBuffer {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            observer: None,
        }
    }

    fn push(&mut self, record: SubscriptionRecord) {
        self.queue.push_back(record);
        self.drain();
    }

    fn drain(&mut self) {
        let Some(observer) = &self.observer else {
            return;
        };
        while let Some(record) = self.queue.pop_front() {
            if let Err(undelivered) = observer.send(record) {
                // Observer went away; keep the record for the next one.
                self.queue.push_front(undelivered.0);
                self.observer = None;
                return;
            }
        }
    }

    fn attach(&mut self) -> mpsc::UnboundedReceiver<SubscriptionRecord> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observer = Some(tx);
        self.drain();
        rx
    }
}

/// The data half of `start()`: call [`DataStream::attach`] to begin
/// receiving records. Records arriving before the first attach are held in
/// arrival order.
#[derive(Clone)]
pub struct DataStream {
    buffer: Arc<StdMutex<RecordBuffer>>,
}

impl DataStream {
    /// Attaches an observer, draining anything buffered so far in FIFO
    /// order. A second attach replaces the first.
    pub fn attach(&self) -> mpsc::UnboundedReceiver<SubscriptionRecord> {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner()).attach()
    }
}

struct ProcessorRun {
    stop_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// Maintains one live subscription per (model, mutation kind) pair.
pub struct SubscriptionProcessor {
    schema: Arc<ModelSchema>,
    sync_predicates: Arc<BTreeMap<String, PredicateGroup>>,
    config: SyncConfig,
    client: Arc<dyn GraphQlClient>,
    tokens: Arc<dyn TokenProvider>,
    error_handler: Arc<dyn ErrorHandler>,
    run: Mutex<Option<ProcessorRun>>,
}

impl SubscriptionProcessor {
    pub fn new(
        schema: Arc<ModelSchema>,
        sync_predicates: Arc<BTreeMap<String, PredicateGroup>>,
        config: SyncConfig,
        client: Arc<dyn GraphQlClient>,
        tokens: Arc<dyn TokenProvider>,
        error_handler: Arc<dyn ErrorHandler>,
    ) -> Self {
        Self {
            schema,
            sync_predicates,
            config,
            client,
            tokens,
            error_handler,
            run: Mutex::new(None),
        }
    }

    /// Opens every (model, mutation) subscription and returns the control
    /// stream and the data stream. Starting while running restarts.
    pub async fn start(&self) -> (mpsc::UnboundedReceiver<ControlEvent>, DataStream) {
        self.stop().await;

        let (stop_tx, stop_rx) = watch::channel(false);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let buffer = Arc::new(StdMutex::new(RecordBuffer::new()));

        // Credentials are fetched once, best effort: a failed lookup means
        // guest access, not an engine error.
        let (credentials, claims) = match self.tokens.current_session().await {
            Ok(session) => (session.credential_state(), session.id_token_claims),
            Err(_) => (UserCredentialState::None, None),
        };

        let context = Arc::new(SubscriptionContext {
            sync_predicates: self.sync_predicates.clone(),
            config: self.config.clone(),
            client: self.client.clone(),
            error_handler: self.error_handler.clone(),
            control_tx: control_tx.clone(),
            buffer: buffer.clone(),
            credentials,
            claims,
        });

        let models: Vec<ModelDefinition> =
            self.schema.syncable_models().cloned().collect();
        let total = models.len() * MutationKind::ALL.len();

        // Each pair settles exactly once (acknowledged, terminally failed,
        // or abandoned); the collector emits Connected when all have.
        let (settle_tx, mut settle_rx) = mpsc::unbounded_channel::<()>();
        let mut tasks = Vec::new();
        let collector_stop = stop_rx.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..total {
                if settle_rx.recv().await.is_none() {
                    return;
                }
            }
            // A teardown settles every pair too; that is not readiness.
            if !*collector_stop.borrow() {
                let _ = control_tx.send(ControlEvent::Connected);
            }
        }));

        for model in models {
            for kind in MutationKind::ALL {
                tasks.push(tokio::spawn(run_subscription(
                    context.clone(),
                    model.clone(),
                    kind,
                    stop_rx.clone(),
                    settle_tx.clone(),
                )));
            }
        }
        drop(settle_tx);

        *self.run.lock().await = Some(ProcessorRun { stop_tx, tasks });
        (control_rx, DataStream { buffer })
    }

    /// Tears down every subscription and joins the pipeline tasks.
    /// Idempotent; the processor can be started again afterwards.
    pub async fn stop(&self) {
        let Some(run) = self.run.lock().await.take() else {
            return;
        };
        debug!("stopping subscription processor");
        let _ = run.stop_tx.send(true);
        for task in run.tasks {
            let _ = task.await;
        }
        debug!("subscription processor stopped");
    }
}

struct SubscriptionContext {
    sync_predicates: Arc<BTreeMap<String, PredicateGroup>>,
    config: SyncConfig,
    client: Arc<dyn GraphQlClient>,
    error_handler: Arc<dyn ErrorHandler>,
    control_tx: mpsc::UnboundedSender<ControlEvent>,
    buffer: Arc<StdMutex<RecordBuffer>>,
    credentials: UserCredentialState,
    claims: Option<IdentityClaims>,
}

impl SubscriptionContext {
    fn buffer(&self) -> std::sync::MutexGuard<'_, RecordBuffer> {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn control_error(&self, model: &str, operation: MutationKind, message: impl Into<String>) {
        let _ = self.control_tx.send(ControlEvent::Error {
            model: model.to_string(),
            operation,
            message: message.into(),
        });
    }
}

/// What the select step observed.
enum Step {
    Stop,
    Event(Option<SubscriptionEvent>),
}

/// The retry loop for one (model, mutation kind) pair.
///
/// State machine: connect, then consume events until the pair is
/// acknowledged, degraded (filter dropped), retried under the next auth
/// mode, or terminally failed. Failures here never affect sibling pairs.
async fn run_subscription(
    context: Arc<SubscriptionContext>,
    model: ModelDefinition,
    kind: MutationKind,
    mut stop: watch::Receiver<bool>,
    settle_tx: mpsc::UnboundedSender<()>,
) {
    let predicate = context.sync_predicates.get(&model.name).cloned();
    let mut with_filter = predicate.is_some();

    let session_signed_in = context.credentials == UserCredentialState::Authenticated;
    let modes = auth::resolve_read_auth_modes(
        &model,
        session_signed_in,
        context.config.default_auth_mode,
    );
    let mut cursor = AuthModeCursor::new(modes, context.config.default_auth_mode);

    let mut settled = false;
    let mut settle = {
        let settle_tx = settle_tx.clone();
        move |settled: &mut bool| {
            if !*settled {
                *settled = true;
                let _ = settle_tx.send(());
            }
        }
    };

    'connect: loop {
        if *stop.borrow() {
            break;
        }

        let info = match auth::resolve_authorization(
            &model,
            context.credentials,
            context.config.default_auth_mode,
            context.claims.as_ref(),
            Some(cursor.current()),
        ) {
            Some(info) => info,
            None => {
                // No authorization possible under this mode; skip it.
                if cursor.advance() {
                    continue;
                }
                settle(&mut settled);
                context.control_error(
                    &model.name,
                    kind,
                    "no usable authorization mode for subscription",
                );
                break;
            }
        };

        if info.is_owner && info.owner_value.is_none() {
            settle(&mut settled);
            context.control_error(
                &model.name,
                kind,
                "Owner field required; sign-in is needed to subscribe to this model",
            );
            break;
        }

        let owner_field = info
            .is_owner
            .then(|| info.owner_field.clone())
            .flatten();
        let (operation, document) =
            queries::subscription_operation(&model, kind, owner_field.as_deref(), with_filter);

        let mut variables = JsonObject::new();
        if with_filter {
            if let Some(predicate) = &predicate {
                variables.insert("filter".into(), predicate.to_filter());
            }
        }
        if let (Some(field), Some(value)) = (&owner_field, &info.owner_value) {
            variables.insert(field.clone(), Value::from(value.clone()));
        }

        debug!(
            model = %model.name,
            operation = kind.as_str(),
            auth_mode = %info.auth_mode,
            "attempting subscription"
        );

        let mut handle = match context
            .client
            .subscribe(GraphQlRequest {
                query: document,
                variables,
                auth_mode: info.auth_mode,
                auth_token: None,
            })
            .await
        {
            Ok(handle) => handle,
            Err(err) => {
                // Failure before any stream exists counts as an init error.
                if cursor.advance() {
                    continue;
                }
                settle(&mut settled);
                report_error(
                    &context.error_handler,
                    SyncErrorEvent::new(ProcessKind::Subscribe, err.to_string())
                        .with_model(model.name.clone())
                        .with_operation(kind.as_str())
                        .with_category(ErrorCategory::Transient),
                )
                .await;
                context.control_error(&model.name, kind, err.to_string());
                break;
            }
        };

        loop {
            let step = tokio::select! {
                changed = stop.changed() => {
                    let _ = changed;
                    Step::Stop
                }
                event = handle.next() => Step::Event(event),
            };

            match step {
                Step::Stop => {
                    handle.unsubscribe();
                    break 'connect;
                }
                Step::Event(Some(SubscriptionEvent::Acknowledged)) => {
                    debug!(
                        model = %model.name,
                        operation = kind.as_str(),
                        "subscription acknowledged"
                    );
                    settle(&mut settled);
                }
                Step::Event(Some(SubscriptionEvent::Data(response))) => {
                    if !response.errors.is_empty() {
                        let messages: Vec<&str> = response
                            .errors
                            .iter()
                            .map(|e| e.message.as_str())
                            .collect();
                        warn!(
                            model = %model.name,
                            "skipping inbound subscription record: {}",
                            messages.join("; ")
                        );
                        context.buffer().drain();
                        continue;
                    }

                    let record = response
                        .data
                        .as_ref()
                        .and_then(|data| data.get(&operation))
                        .and_then(Value::as_object)
                        .cloned();

                    match record {
                        Some(record) => {
                            // Validated against the sync expression on
                            // arrival; non-matching records drop silently.
                            let matches = predicate
                                .as_ref()
                                .is_none_or(|p| p.matches(&record));
                            if matches {
                                context.buffer().push(SubscriptionRecord {
                                    model: model.name.clone(),
                                    kind,
                                    record,
                                });
                            } else {
                                debug!(
                                    model = %model.name,
                                    "inbound record outside sync expression, dropped"
                                );
                            }
                            context.buffer().drain();
                        }
                        None => {
                            // Malformed payload: terminal for this pair.
                            handle.unsubscribe();
                            settle(&mut settled);
                            let message = format!(
                                "subscription payload for {operation} carried no record"
                            );
                            report_error(
                                &context.error_handler,
                                SyncErrorEvent::new(ProcessKind::Subscribe, message.clone())
                                    .with_model(model.name.clone())
                                    .with_operation(kind.as_str())
                                    .with_category(ErrorCategory::BadRecord),
                            )
                            .await;
                            context.control_error(&model.name, kind, message);
                            break 'connect;
                        }
                    }
                }
                Step::Event(Some(SubscriptionEvent::Error(failure))) => {
                    let message = failure.message;

                    // 1. Server-side filter rejection: reopen unfiltered,
                    //    permanently. Client-side evaluation takes over.
                    if with_filter {
                        if let Some(filter_error) = rtf::classify_filter_error(&message) {
                            warn!(
                                model = %model.name,
                                operation = kind.as_str(),
                                "backend subscription filtering rejected the filter; \
                                 filtering will be applied client-side.\n{}\n{}",
                                message,
                                rtf::filter_error_remediation(
                                    filter_error,
                                    &model,
                                    predicate.as_ref()
                                )
                            );
                            handle.unsubscribe();
                            with_filter = false;
                            continue 'connect;
                        }
                    }

                    // 2. Connection/init failure: advance the auth mode.
                    if message.contains(CONNECTION_FAILED)
                        || message.contains(SUBSCRIPTION_INIT_ERROR)
                    {
                        handle.unsubscribe();
                        if cursor.advance() {
                            debug!(
                                model = %model.name,
                                operation = kind.as_str(),
                                next_mode = %cursor.current(),
                                "subscription failed, retrying with next auth mode"
                            );
                            continue 'connect;
                        }
                        debug!(
                            model = %model.name,
                            operation = kind.as_str(),
                            "subscription failed with final auth mode"
                        );
                    }

                    // 3. Everything else: forward once, then either absorb
                    //    (expected authorization noise) or surface.
                    warn!(
                        model = %model.name,
                        operation = kind.as_str(),
                        error = %message,
                        "subscription error"
                    );
                    report_error(
                        &context.error_handler,
                        SyncErrorEvent::new(ProcessKind::Subscribe, message.clone())
                            .with_model(model.name.clone())
                            .with_operation(kind.as_str()),
                    )
                    .await;
                    settle(&mut settled);

                    let absorbed = message.contains("\"errorType\":\"Unauthorized\"")
                        || message.contains("\"errorType\":\"OperationDisabled\"");
                    if !absorbed {
                        context.control_error(&model.name, kind, message);
                    }
                    break 'connect;
                }
                Step::Event(None) => {
                    // Transport closed the stream without an error event.
                    debug!(
                        model = %model.name,
                        operation = kind.as_str(),
                        "subscription stream ended"
                    );
                    break 'connect;
                }
            }
        }
    }

    settle(&mut settled);
}
