//! Paginated bulk synchronization.
//!
//! One pipeline per syncable model, gated on the model's topological
//! parents: a model requests no pages until every parent has finished its
//! own pass. Within a model the page loop is strictly sequential; across
//! models pipelines run concurrently. A model that cannot be synchronized
//! (exhausted auth modes on a forbidden/client-side error) degrades to a
//! final empty page so sibling models continue unaffected.

use crate::auth;
use crate::config::SyncConfig;
use crate::error::{
    report_error, ErrorCategory, ErrorHandler, ProcessKind, SyncError, SyncErrorEvent,
    SyncResult,
};
use crate::queries;
use crate::retry::{retry_with_backoff, AuthModeCursor};
use crate::session::TokenProvider;
use crate::transport::{GraphQlClient, GraphQlRequest, TransportError};
use lagoon_types::{JsonObject, ModelDefinition, ModelSchema, PredicateGroup};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Where a model's previous sync pass left off.
#[derive(Debug, Clone)]
pub struct ModelSyncPosition {
    pub namespace: String,
    /// Server watermark of the last completed pass; `None` forces a full
    /// sync.
    pub last_sync: Option<i64>,
}

/// One page of bulk sync results for a model.
#[derive(Debug, Clone)]
pub struct SyncModelPage {
    pub namespace: String,
    pub model: String,
    pub items: Vec<JsonObject>,
    /// Server-reported start watermark for this pass.
    pub started_at: Option<i64>,
    /// Terminates the model's page loop when set.
    pub done: bool,
    pub is_full_sync: bool,
}

/// A retrieved page before packaging.
struct PageResult {
    items: Vec<JsonObject>,
    next_token: Option<String>,
    started_at: Option<i64>,
}

impl PageResult {
    fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_token: None,
            started_at: None,
        }
    }
}

struct ProcessorRun {
    stop_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// Drives paginated bulk retrieval for every syncable model.
pub struct SyncProcessor {
    schema: Arc<ModelSchema>,
    /// Per-model sync expressions, applied server-side where supported.
    sync_predicates: Arc<BTreeMap<String, PredicateGroup>>,
    config: SyncConfig,
    client: Arc<dyn GraphQlClient>,
    tokens: Arc<dyn TokenProvider>,
    error_handler: Arc<dyn ErrorHandler>,
    run: Mutex<Option<ProcessorRun>>,
}

impl SyncProcessor {
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

    /// Starts a sync pass and returns the page stream. The stream closes
    /// once every syncable model is done. Starting while a pass is running
    /// stops the previous pass first.
    pub async fn start(
        &self,
        last_sync: BTreeMap<String, ModelSyncPosition>,
    ) -> mpsc::UnboundedReceiver<SyncModelPage> {
        self.stop().await;

        let (stop_tx, stop_rx) = watch::channel(false);
        let (page_tx, page_rx) = mpsc::unbounded_channel();

        // Completion signal per model, so dependents can await their
        // parents without polling.
        let mut done_txs: BTreeMap<String, watch::Sender<bool>> = BTreeMap::new();
        let mut done_rxs: BTreeMap<String, watch::Receiver<bool>> = BTreeMap::new();
        for model in self.schema.syncable_models() {
            let (tx, rx) = watch::channel(false);
            done_txs.insert(model.name.clone(), tx);
            done_rxs.insert(model.name.clone(), rx);
        }

        let context = Arc::new(ModelSyncContext {
            schema: self.schema.clone(),
            sync_predicates: self.sync_predicates.clone(),
            config: self.config.clone(),
            client: self.client.clone(),
            tokens: self.tokens.clone(),
            error_handler: self.error_handler.clone(),
        });

        let mut tasks = Vec::new();
        for model in self.schema.syncable_models() {
            let parents: Vec<watch::Receiver<bool>> = self
                .schema
                .parents_of(&model.name)
                .iter()
                .filter(|parent| parent.as_str() != model.name)
                .filter_map(|parent| done_rxs.get(parent).cloned())
                .collect();
            let done_tx = match done_txs.remove(&model.name) {
                Some(tx) => tx,
                None => continue,
            };
            let position = last_sync.get(&model.name).cloned().unwrap_or_else(|| {
                ModelSyncPosition {
                    namespace: self.schema.namespace.clone(),
                    last_sync: None,
                }
            });
            tasks.push(tokio::spawn(sync_model(
                context.clone(),
                model.clone(),
                position,
                parents,
                done_tx,
                page_tx.clone(),
                stop_rx.clone(),
            )));
        }

        *self.run.lock().await = Some(ProcessorRun { stop_tx, tasks });
        page_rx
    }

    /// Stops the running pass: no new retries are admitted, in-flight waits
    /// cancel, and every pipeline task is joined. Idempotent, and leaves
    /// the processor restartable.
    pub async fn stop(&self) {
        let Some(run) = self.run.lock().await.take() else {
            return;
        };
        debug!("stopping sync processor");
        let _ = run.stop_tx.send(true);
        for task in run.tasks {
            let _ = task.await;
        }
        debug!("sync processor stopped");
    }
}

/// Shared state for the per-model pipeline tasks.
struct ModelSyncContext {
    schema: Arc<ModelSchema>,
    sync_predicates: Arc<BTreeMap<String, PredicateGroup>>,
    config: SyncConfig,
    client: Arc<dyn GraphQlClient>,
    tokens: Arc<dyn TokenProvider>,
    error_handler: Arc<dyn ErrorHandler>,
}

async fn sync_model(
    context: Arc<ModelSyncContext>,
    model: ModelDefinition,
    position: ModelSyncPosition,
    parents: Vec<watch::Receiver<bool>>,
    done_tx: watch::Sender<bool>,
    page_tx: mpsc::UnboundedSender<SyncModelPage>,
    mut stop: watch::Receiver<bool>,
) {
    // Parents first: a child never requests page one before every parent
    // finishes its pass.
    for mut parent in parents {
        loop {
            if *parent.borrow() || *stop.borrow() {
                break;
            }
            let outcome = tokio::select! {
                changed = parent.changed() => changed.is_err(),
                _ = stop.changed() => true,
            };
            if outcome {
                break;
            }
        }
    }

    if !*stop.borrow() {
        let filter = context
            .sync_predicates
            .get(&model.name)
            .map(PredicateGroup::to_filter);

        let mut next_token: Option<String> = None;
        let mut started_at: Option<i64> = None;
        let mut records_received = 0usize;

        loop {
            if *stop.borrow() {
                break;
            }
            let limit = context
                .config
                .max_records_per_model
                .saturating_sub(records_received)
                .min(context.config.page_size);

            let mut failed = false;
            let page = match retrieve_page(
                &context,
                &model,
                position.last_sync,
                next_token.clone(),
                limit,
                filter.clone(),
                &mut stop,
            )
            .await
            {
                Ok(page) => page,
                Err(SyncError::Stopped) => break,
                Err(err) => {
                    // This model fails, the rest of the sync continues. It
                    // is marked done with no items so anything waiting on
                    // its completion proceeds normally.
                    report_error(
                        &context.error_handler,
                        SyncErrorEvent::new(ProcessKind::Sync, err.to_string())
                            .with_model(model.name.clone())
                            .with_category(ErrorCategory::from(&err)),
                    )
                    .await;
                    failed = true;
                    PageResult::empty()
                }
            };

            records_received += page.items.len();
            next_token = page.next_token;
            if page.started_at.is_some() {
                started_at = page.started_at;
            }

            let done = failed
                || next_token.is_none()
                || records_received >= context.config.max_records_per_model;

            let _ = page_tx.send(SyncModelPage {
                namespace: position.namespace.clone(),
                model: model.name.clone(),
                items: page.items,
                started_at,
                done,
                is_full_sync: position.last_sync.is_none(),
            });

            if done {
                break;
            }
        }
    }

    let _ = done_tx.send(true);
}

/// Retrieves one page, walking the model's read auth modes. Network errors
/// retry the same mode with backoff; anything else advances the mode. When
/// every mode is exhausted on a client-side or forbidden error the model
/// degrades to an empty final page instead of failing.
async fn retrieve_page(
    context: &ModelSyncContext,
    model: &ModelDefinition,
    last_sync: Option<i64>,
    next_token: Option<String>,
    limit: usize,
    filter: Option<Value>,
    stop: &mut watch::Receiver<bool>,
) -> SyncResult<PageResult> {
    let session = context.tokens.current_session().await.unwrap_or_default();
    let modes = auth::resolve_read_auth_modes(
        model,
        session.access_token_present,
        context.config.default_auth_mode,
    );
    let mut cursor = AuthModeCursor::new(modes, context.config.default_auth_mode);

    let (operation, document) = queries::sync_operation(model);
    let mut variables = JsonObject::new();
    variables.insert("limit".into(), Value::from(limit as u64));
    variables.insert(
        "nextToken".into(),
        next_token.map(Value::from).unwrap_or(Value::Null),
    );
    variables.insert(
        "lastSync".into(),
        last_sync.map(Value::from).unwrap_or(Value::Null),
    );
    variables.insert("filter".into(), filter.unwrap_or(Value::Null));

    loop {
        let mode = cursor.current();
        debug!(model = %model.name, auth_mode = %mode, "attempting sync page");
        let outcome = retry_with_backoff(
            || execute_page(context, model, &operation, &document, &variables, mode),
            stop,
        )
        .await;

        match outcome {
            Ok(page) => {
                debug!(model = %model.name, auth_mode = %mode, "sync page retrieved");
                return Ok(page);
            }
            Err(SyncError::Stopped) => return Err(SyncError::Stopped),
            Err(err) => {
                if cursor.advance() {
                    debug!(
                        model = %model.name,
                        failed_mode = %mode,
                        next_mode = %cursor.current(),
                        "sync page failed, retrying with next auth mode"
                    );
                    continue;
                }
                debug!(model = %model.name, auth_mode = %mode, error = %err, "sync page failed");
                if err.degrades_gracefully() {
                    warn!(
                        model = %model.name,
                        auth_mode = %mode,
                        "not authorized to run {operation}; no data will be returned"
                    );
                    return Ok(PageResult::empty());
                }
                return Err(err);
            }
        }
    }
}

/// One wire attempt. Partial data (items alongside field-level errors) is
/// accepted: nulls are dropped, the errors are forwarded once each, and
/// paging continues.
async fn execute_page(
    context: &ModelSyncContext,
    model: &ModelDefinition,
    operation: &str,
    document: &str,
    variables: &JsonObject,
    mode: lagoon_types::AuthMode,
) -> SyncResult<PageResult> {
    let request = GraphQlRequest {
        query: document.to_string(),
        variables: variables.clone(),
        auth_mode: mode,
        auth_token: None,
    };

    let response = match context.client.execute(request).await {
        Ok(response) => response,
        Err(TransportError::Network(message)) => return Err(SyncError::Network(message)),
        Err(TransportError::ClientAuth(message)) => {
            return Err(SyncError::ClientSideAuth(message));
        }
    };

    let payload = response
        .data
        .as_ref()
        .and_then(|data| data.get(operation))
        .filter(|payload| !payload.is_null());

    let items: Vec<JsonObject> = payload
        .and_then(|p| p.get("items"))
        .and_then(Value::as_array)
        .map(|array| {
            array
                .iter()
                .filter_map(|item| item.as_object().cloned())
                .collect()
        })
        .unwrap_or_default();

    if !response.errors.is_empty() {
        let unauthorized = response
            .errors
            .iter()
            .any(|e| e.error_type.as_deref() == Some("Unauthorized"));

        // Partial success: usable items arrived alongside field errors.
        // Forward the non-authorization errors and keep the page.
        if !items.is_empty() {
            for field_error in response
                .errors
                .iter()
                .filter(|e| e.error_type.as_deref() != Some("Unauthorized"))
            {
                report_error(
                    &context.error_handler,
                    SyncErrorEvent::new(ProcessKind::Sync, field_error.message.clone())
                        .with_model(model.name.clone())
                        .with_operation(operation)
                        .with_category(ErrorCategory::BadRecord),
                )
                .await;
            }
            return Ok(parse_page(payload, items));
        }

        if unauthorized {
            let message = response
                .errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            report_error(
                &context.error_handler,
                SyncErrorEvent::new(ProcessKind::Sync, message.clone())
                    .with_model(model.name.clone())
                    .with_operation(operation)
                    .with_category(ErrorCategory::Unauthorized),
            )
            .await;
            return Err(SyncError::Unauthorized(message));
        }

        if let Some(forbidden) = response.errors.iter().find(|e| {
            e.error_type.as_deref() == Some("Forbidden")
                || e.message.contains("status code 401")
                || e.message.contains("status code 403")
        }) {
            return Err(SyncError::Forbidden(forbidden.message.clone()));
        }

        // Anything else is treated as transient and retried under backoff.
        let message = response
            .errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(SyncError::Network(message));
    }

    match payload {
        Some(_) => Ok(parse_page(payload, items)),
        None => Err(SyncError::Protocol(format!(
            "response for {operation} carried no sync payload"
        ))),
    }
}

fn parse_page(payload: Option<&Value>, items: Vec<JsonObject>) -> PageResult {
    PageResult {
        items,
        next_token: payload
            .and_then(|p| p.get("nextToken"))
            .and_then(Value::as_str)
            .map(String::from),
        started_at: payload
            .and_then(|p| p.get("startedAt"))
            .and_then(Value::as_i64),
    }
}
