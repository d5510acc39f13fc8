use async_trait::async_trait;
use lagoon_sync::transport::mock::{MockGraphQlClient, SubscriptionController};
use lagoon_sync::{
    ControlEvent, ErrorHandler, FixedTokenProvider, GraphQlResponse, SubscriptionProcessor,
    SyncConfig, SyncErrorEvent,
};
use lagoon_types::{
    AuthProvider, AuthStrategy, AuthorizationRule, FieldPredicate, FieldType, GroupType,
    IdentityClaims, JsonObject, ModelDefinition, ModelField, ModelSchema, Predicate,
    PredicateGroup, PredicateOperator,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct CollectingHandler {
    events: Mutex<Vec<SyncErrorEvent>>,
}

impl CollectingHandler {
    fn events(&self) -> Vec<SyncErrorEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl ErrorHandler for CollectingHandler {
    async fn handle(&self, event: SyncErrorEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn post_model() -> ModelDefinition {
    ModelDefinition::new(
        "Post",
        vec![
            ModelField::scalar("id", FieldType::Id),
            ModelField::scalar("title", FieldType::String),
            ModelField::optional("rating", FieldType::Int),
        ],
    )
}

fn post_schema() -> Arc<ModelSchema> {
    Arc::new(ModelSchema::new("blog", vec![post_model()]))
}

fn rating_above(threshold: i64) -> PredicateGroup {
    PredicateGroup::new(
        GroupType::And,
        vec![Predicate::Field(FieldPredicate {
            field: "rating".to_string(),
            operator: PredicateOperator::Gt,
            operand: json!(threshold),
        })],
    )
}

fn make_processor(
    schema: Arc<ModelSchema>,
    client: Arc<MockGraphQlClient>,
    predicates: BTreeMap<String, PredicateGroup>,
    signed_in: bool,
) -> (SubscriptionProcessor, Arc<CollectingHandler>) {
    let handler = Arc::new(CollectingHandler::default());
    let tokens = if signed_in {
        let mut claims = JsonObject::new();
        claims.insert("sub".to_string(), json!("user-1"));
        FixedTokenProvider::authenticated(IdentityClaims::new(claims))
    } else {
        FixedTokenProvider::unauthenticated()
    };
    let processor = SubscriptionProcessor::new(
        schema,
        Arc::new(predicates),
        SyncConfig::default(),
        client,
        Arc::new(tokens),
        handler.clone(),
    );
    (processor, handler)
}

async fn wait_for_subscriptions(client: &MockGraphQlClient, count: usize) {
    for _ in 0..400 {
        if client.subscriptions().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "expected {count} subscriptions, saw {}",
        client.subscriptions().len()
    );
}

fn controller_for(
    client: &MockGraphQlClient,
    operation: &str,
) -> Arc<SubscriptionController> {
    client
        .subscriptions()
        .into_iter()
        .find(|s| s.operation == operation)
        .unwrap_or_else(|| panic!("no subscription for {operation}"))
}

fn data_envelope(operation: &str, record: serde_json::Value) -> GraphQlResponse {
    GraphQlResponse::with_data(json!({ operation: record }))
}

async fn recv_control(
    rx: &mut mpsc::UnboundedReceiver<ControlEvent>,
) -> ControlEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for control event")
        .expect("control stream closed")
}

// ── Readiness ────────────────────────────────────────────────────

#[tokio::test]
async fn connected_fires_after_every_ack() {
    let client = Arc::new(MockGraphQlClient::new());
    let (processor, _) = make_processor(post_schema(), client.clone(), BTreeMap::new(), false);
    let (mut control, _data) = processor.start().await;

    wait_for_subscriptions(&client, 3).await;
    for controller in client.subscriptions() {
        controller.send_ack();
    }

    assert!(matches!(recv_control(&mut control).await, ControlEvent::Connected));
    processor.stop().await;
}

// ── Buffering ────────────────────────────────────────────────────

#[tokio::test]
async fn records_buffer_until_observer_attaches_then_drain_fifo() {
    let client = Arc::new(MockGraphQlClient::new());
    let (processor, _) = make_processor(post_schema(), client.clone(), BTreeMap::new(), false);
    let (mut control, data) = processor.start().await;

    wait_for_subscriptions(&client, 3).await;
    for controller in client.subscriptions() {
        controller.send_ack();
    }
    let _ = recv_control(&mut control).await;

    let creates = controller_for(&client, "onCreatePost");
    creates.send_data(data_envelope("onCreatePost", json!({"id": "p-1", "title": "first"})));
    creates.send_data(data_envelope("onCreatePost", json!({"id": "p-2", "title": "second"})));

    // Give the pipeline time to buffer before anyone listens.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut rx = data.attach();
    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    assert_eq!(first.record["id"], json!("p-1"));
    assert_eq!(second.record["id"], json!("p-2"));

    // Records arriving after attachment flow straight through.
    creates.send_data(data_envelope("onCreatePost", json!({"id": "p-3", "title": "third"})));
    let third = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(third.record["id"], json!("p-3"));

    processor.stop().await;
}

#[tokio::test]
async fn inbound_records_validate_against_sync_predicate() {
    let client = Arc::new(MockGraphQlClient::new());
    let mut predicates = BTreeMap::new();
    predicates.insert("Post".to_string(), rating_above(3));
    let (processor, _) = make_processor(post_schema(), client.clone(), predicates, false);
    let (_control, data) = processor.start().await;
    let mut rx = data.attach();

    wait_for_subscriptions(&client, 3).await;
    let creates = controller_for(&client, "onCreatePost");
    creates.send_data(data_envelope(
        "onCreatePost",
        json!({"id": "p-low", "title": "t", "rating": 1}),
    ));
    creates.send_data(data_envelope(
        "onCreatePost",
        json!({"id": "p-high", "title": "t", "rating": 5}),
    ));

    let delivered = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    // The non-matching record was dropped silently.
    assert_eq!(delivered.record["id"], json!("p-high"));

    processor.stop().await;
}

#[tokio::test]
async fn envelopes_with_errors_are_skipped() {
    let client = Arc::new(MockGraphQlClient::new());
    let (processor, _) = make_processor(post_schema(), client.clone(), BTreeMap::new(), false);
    let (_control, data) = processor.start().await;
    let mut rx = data.attach();

    wait_for_subscriptions(&client, 3).await;
    let creates = controller_for(&client, "onCreatePost");
    creates.send_data(GraphQlResponse {
        data: Some(json!({"onCreatePost": {"id": "bad"}})),
        errors: vec![lagoon_sync::GraphQlFieldError::new("partial failure", None)],
    });
    creates.send_data(data_envelope("onCreatePost", json!({"id": "good", "title": "t"})));

    let delivered = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivered.record["id"], json!("good"));

    processor.stop().await;
}

// ── Realtime filter fallback ─────────────────────────────────────

#[tokio::test]
async fn filter_rejection_reopens_without_filter_once() {
    let client = Arc::new(MockGraphQlClient::new());
    let mut predicates = BTreeMap::new();
    predicates.insert("Post".to_string(), rating_above(3));
    let (processor, _) = make_processor(post_schema(), client.clone(), predicates, false);
    let (_control, data) = processor.start().await;
    let mut rx = data.attach();

    wait_for_subscriptions(&client, 3).await;
    let first = controller_for(&client, "onCreatePost");
    assert!(first.has_filter());

    first.send_error("UnknownArgument: Unknown field argument filter @ 'onCreatePost'");

    // Exactly one replacement subscription, opened without the filter.
    wait_for_subscriptions(&client, 4).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(client.subscriptions().len(), 4);
    let reopened = client
        .subscriptions()
        .into_iter()
        .filter(|s| s.operation == "onCreatePost")
        .nth(1)
        .unwrap();
    assert!(!reopened.has_filter());
    assert!(first.is_unsubscribed());

    // Filtering now happens client-side on arrival.
    reopened.send_ack();
    reopened.send_data(data_envelope(
        "onCreatePost",
        json!({"id": "p-low", "rating": 1}),
    ));
    reopened.send_data(data_envelope(
        "onCreatePost",
        json!({"id": "p-high", "rating": 5}),
    ));
    let delivered = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivered.record["id"], json!("p-high"));

    processor.stop().await;
}

// ── Auth-mode negotiation ────────────────────────────────────────

#[tokio::test]
async fn connection_failure_advances_auth_mode_then_fails_terminally() {
    let note = ModelDefinition::new(
        "Note",
        vec![
            ModelField::scalar("id", FieldType::Id),
            ModelField::scalar("owner", FieldType::String),
        ],
    )
    .with_auth_rule(AuthorizationRule::new(
        AuthStrategy::Owner,
        Some(AuthProvider::UserPools),
    ))
    .with_auth_rule(AuthorizationRule::new(
        AuthStrategy::Public,
        Some(AuthProvider::ApiKey),
    ));
    let schema = Arc::new(ModelSchema::new("notes", vec![note]));

    let client = Arc::new(MockGraphQlClient::new());
    let (processor, handler) = make_processor(schema, client.clone(), BTreeMap::new(), true);
    let (mut control, _data) = processor.start().await;

    wait_for_subscriptions(&client, 3).await;
    let first = controller_for(&client, "onCreateNote");
    assert_eq!(first.auth_mode.to_string(), "userPool");
    // Owner-based auth parameterizes the subscription.
    assert_eq!(first.variables.get("owner"), Some(&json!("user-1")));

    first.send_error("Connection failed: {\"errors\":[{\"message\":\"unable to connect\"}]}");

    wait_for_subscriptions(&client, 4).await;
    let reopened = client
        .subscriptions()
        .into_iter()
        .filter(|s| s.operation == "onCreateNote")
        .nth(1)
        .unwrap();
    assert_eq!(reopened.auth_mode.to_string(), "apiKey");

    // Exhausting the final mode is terminal for this pair only.
    reopened.send_error("Connection failed: still unable to connect");
    let event = recv_control(&mut control).await;
    match event {
        ControlEvent::Error { model, message, .. } => {
            assert_eq!(model, "Note");
            assert!(message.contains("Connection failed"));
        }
        other => panic!("expected control error, got {other:?}"),
    }
    assert!(!handler.events().is_empty());

    // Siblings were not torn down by the failure.
    let update = controller_for(&client, "onUpdateNote");
    assert!(!update.is_unsubscribed());

    processor.stop().await;
}

#[tokio::test]
async fn unauthorized_subscription_errors_are_absorbed() {
    let client = Arc::new(MockGraphQlClient::new());
    let (processor, handler) = make_processor(post_schema(), client.clone(), BTreeMap::new(), false);
    let (mut control, _data) = processor.start().await;

    wait_for_subscriptions(&client, 3).await;
    let creates = controller_for(&client, "onCreatePost");
    creates.send_error("{\"errorType\":\"Unauthorized\",\"message\":\"Not authorized\"}");

    // The error reaches the handler but never the control stream.
    for _ in 0..100 {
        if !handler.events().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(!handler.events().is_empty());
    assert!(control.try_recv().is_err());

    processor.stop().await;
}

// ── Stop ─────────────────────────────────────────────────────────

#[tokio::test]
async fn stop_unsubscribes_everything_and_is_idempotent() {
    let client = Arc::new(MockGraphQlClient::new());
    let (processor, _) = make_processor(post_schema(), client.clone(), BTreeMap::new(), false);
    let (_control, _data) = processor.start().await;

    wait_for_subscriptions(&client, 3).await;
    processor.stop().await;
    processor.stop().await;

    // Every opened subscription was cancelled exactly as part of teardown.
    assert_eq!(client.unsubscribe_count(), 3);

    // The processor restarts cleanly.
    let (_control, _data) = processor.start().await;
    wait_for_subscriptions(&client, 6).await;
    processor.stop().await;
    assert_eq!(client.unsubscribe_count(), 6);
}
