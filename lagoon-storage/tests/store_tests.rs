use pretty_assertions::assert_eq;

use lagoon_storage::{InMemoryAdapter, LocalStore, Pagination, StorageError};
use lagoon_types::{
    FieldPredicate, FieldType, GroupType, JsonObject, ModelDefinition, ModelField, ModelSchema,
    MutatorId, OpType, Predicate, PredicateGroup, PredicateOperator,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn record(value: serde_json::Value) -> JsonObject {
    value.as_object().expect("record must be an object").clone()
}

fn post_model() -> ModelDefinition {
    ModelDefinition::new(
        "Post",
        vec![
            ModelField::scalar("id", FieldType::Id),
            ModelField::scalar("title", FieldType::String),
            ModelField::optional("rating", FieldType::Int),
            ModelField::belongs_to("author", "Author", vec!["authorId".to_string()]),
        ],
    )
}

fn author_model() -> ModelDefinition {
    ModelDefinition::new(
        "Author",
        vec![
            ModelField::scalar("id", FieldType::Id),
            ModelField::scalar("name", FieldType::String),
        ],
    )
}

fn make_store() -> LocalStore {
    let schema = Arc::new(ModelSchema::new(
        "blog",
        vec![author_model(), post_model()],
    ));
    LocalStore::new(schema, Arc::new(InMemoryAdapter::new()))
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

async fn next_event(
    stream: &mut lagoon_storage::ChangeStream,
) -> Option<lagoon_types::ChangeEvent> {
    tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("timed out waiting for change event")
}

// ── Save ─────────────────────────────────────────────────────────

#[tokio::test]
async fn save_new_record_emits_insert() {
    let store = make_store();
    let mut stream = store.observe(Some("Post"), None, None);

    let applied = store
        .save(
            "Post",
            record(json!({"id": "p-1", "title": "hello", "rating": 3})),
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].1, OpType::Insert);

    let event = next_event(&mut stream).await.unwrap();
    assert_eq!(event.op_type, OpType::Insert);
    assert_eq!(event.element.get("title"), Some(&json!("hello")));
}

#[tokio::test]
async fn update_event_carries_minimal_diff() {
    let store = make_store();
    store
        .save(
            "Post",
            record(json!({"id": "p-1", "title": "hello", "rating": 3})),
            None,
            None,
        )
        .await
        .unwrap();

    let mut stream = store.observe(Some("Post"), None, None);
    store
        .save(
            "Post",
            record(json!({"id": "p-1", "title": "updated", "rating": 3})),
            None,
            None,
        )
        .await
        .unwrap();

    let event = next_event(&mut stream).await.unwrap();
    assert_eq!(event.op_type, OpType::Update);
    assert_eq!(event.element.get("title"), Some(&json!("updated")));
    assert_eq!(event.element.get("id"), Some(&json!("p-1")));
    // Unchanged fields stay out of the mutation input.
    assert!(!event.element.contains_key("rating"));
    // The full stored record still rides along.
    let saved = event.saved_element.unwrap();
    assert_eq!(saved.get("rating"), Some(&json!(3)));
}

#[tokio::test]
async fn identical_update_emits_no_event() {
    let store = make_store();
    let original = record(json!({"id": "p-1", "title": "hello", "rating": 3}));
    store.save("Post", original.clone(), None, None).await.unwrap();

    let mut stream = store.observe(Some("Post"), None, None);
    store.save("Post", original, None, None).await.unwrap();

    // A marker write proves the no-op update published nothing before it.
    store
        .save(
            "Post",
            record(json!({"id": "p-2", "title": "marker"})),
            None,
            None,
        )
        .await
        .unwrap();

    let event = next_event(&mut stream).await.unwrap();
    assert_eq!(event.element.get("id"), Some(&json!("p-2")));
}

#[tokio::test]
async fn association_updates_diff_on_target_field() {
    let store = make_store();
    store
        .save(
            "Post",
            record(json!({"id": "p-1", "title": "t", "authorId": "a-1"})),
            None,
            None,
        )
        .await
        .unwrap();

    let mut stream = store.observe(Some("Post"), None, None);
    store
        .save(
            "Post",
            record(json!({"id": "p-1", "title": "t", "authorId": "a-2"})),
            None,
            None,
        )
        .await
        .unwrap();

    let event = next_event(&mut stream).await.unwrap();
    assert_eq!(event.element.get("authorId"), Some(&json!("a-2")));
    assert!(!event.element.contains_key("title"));
}

#[tokio::test]
async fn save_condition_mismatch_errors() {
    let store = make_store();
    store
        .save(
            "Post",
            record(json!({"id": "p-1", "title": "hello", "rating": 1})),
            None,
            None,
        )
        .await
        .unwrap();

    let result = store
        .save(
            "Post",
            record(json!({"id": "p-1", "title": "updated", "rating": 1})),
            Some(&rating_above(4)),
            None,
        )
        .await;
    assert!(matches!(
        result,
        Err(StorageError::SaveConditionNotMet { .. })
    ));
}

// ── Delete ───────────────────────────────────────────────────────

#[tokio::test]
async fn delete_by_predicate_emits_delete_per_record() {
    let store = make_store();
    for (id, rating) in [("p-1", 5), ("p-2", 2), ("p-3", 5)] {
        store
            .save(
                "Post",
                record(json!({"id": id, "title": "t", "rating": rating})),
                None,
                None,
            )
            .await
            .unwrap();
    }

    let mut stream = store.observe(Some("Post"), None, None);
    let (affected, deleted) = store
        .delete("Post", Some(&rating_above(4)), None)
        .await
        .unwrap();
    assert_eq!(affected.len(), 2);
    assert_eq!(deleted.len(), 2);

    for _ in 0..2 {
        let event = next_event(&mut stream).await.unwrap();
        assert_eq!(event.op_type, OpType::Delete);
    }

    let remaining = store.query("Post", None, None).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].get("id"), Some(&json!("p-2")));
}

#[tokio::test]
async fn delete_record_condition_not_met_errors() {
    let store = make_store();
    let rec = record(json!({"id": "p-1", "title": "t", "rating": 1}));
    store.save("Post", rec.clone(), None, None).await.unwrap();

    let result = store
        .delete_record("Post", &rec, Some(&rating_above(4)), None)
        .await;
    assert!(matches!(
        result,
        Err(StorageError::DeleteConditionNotMet { .. })
    ));
}

#[tokio::test]
async fn delete_missing_record_affects_nothing() {
    let store = make_store();
    let rec = record(json!({"id": "ghost", "title": "t"}));
    let (affected, deleted) = store.delete_record("Post", &rec, None, None).await.unwrap();
    assert!(affected.is_empty());
    assert!(deleted.is_empty());
}

// ── Batch save ───────────────────────────────────────────────────

#[tokio::test]
async fn batch_save_upserts_and_soft_deletes() {
    let store = make_store();
    store
        .save("Post", record(json!({"id": "p-1", "title": "old"})), None, None)
        .await
        .unwrap();

    let applied = store
        .batch_save(
            "Post",
            vec![
                record(json!({"id": "p-1", "title": "new", "_version": 2})),
                record(json!({"id": "p-2", "title": "fresh", "_version": 1})),
                record(json!({"id": "p-3", "title": "gone", "_deleted": true})),
            ],
            Some(MutatorId::new()),
        )
        .await
        .unwrap();

    let ops: Vec<OpType> = applied.iter().map(|(_, op)| *op).collect();
    assert_eq!(ops, [OpType::Update, OpType::Insert, OpType::Delete]);

    let rows = store.query("Post", None, None).await.unwrap();
    assert_eq!(rows.len(), 2);
}

// ── Observe ──────────────────────────────────────────────────────

#[tokio::test]
async fn observer_skips_own_mutator() {
    let store = make_store();
    let me = MutatorId::new();
    let mut stream = store.observe(Some("Post"), None, Some(me));

    store
        .save("Post", record(json!({"id": "p-1", "title": "mine"})), None, Some(me))
        .await
        .unwrap();
    store
        .save("Post", record(json!({"id": "p-2", "title": "theirs"})), None, None)
        .await
        .unwrap();

    let event = next_event(&mut stream).await.unwrap();
    assert_eq!(event.element.get("id"), Some(&json!("p-2")));
    // The mutator is stripped before delivery.
    assert!(event.mutator.is_none());
}

#[tokio::test]
async fn observer_predicate_is_fail_closed() {
    let store = make_store();
    let mut stream = store.observe(Some("Post"), Some(rating_above(3)), None);

    // No rating field at all: predicate evaluation fails, event is dropped.
    store
        .save("Post", record(json!({"id": "p-1", "title": "unrated"})), None, None)
        .await
        .unwrap();
    store
        .save(
            "Post",
            record(json!({"id": "p-2", "title": "good", "rating": 5})),
            None,
            None,
        )
        .await
        .unwrap();

    let event = next_event(&mut stream).await.unwrap();
    assert_eq!(event.element.get("id"), Some(&json!("p-2")));
}

#[tokio::test]
async fn observer_filters_by_model() {
    let store = make_store();
    let mut stream = store.observe(Some("Author"), None, None);

    store
        .save("Post", record(json!({"id": "p-1", "title": "t"})), None, None)
        .await
        .unwrap();
    store
        .save("Author", record(json!({"id": "a-1", "name": "Ada"})), None, None)
        .await
        .unwrap();

    let event = next_event(&mut stream).await.unwrap();
    assert_eq!(event.model, "Author");
}

#[tokio::test]
async fn clear_completes_streams_and_wipes_records() {
    let store = make_store();
    let mut stream = store.observe(None, None, None);

    store
        .save("Post", record(json!({"id": "p-1", "title": "t"})), None, None)
        .await
        .unwrap();
    let _ = next_event(&mut stream).await.unwrap();

    store.clear().await.unwrap();
    assert!(next_event(&mut stream).await.is_none());
    assert!(store.query("Post", None, None).await.unwrap().is_empty());
}

// ── Ordering under concurrency ───────────────────────────────────

#[tokio::test]
async fn concurrent_saves_serialize_without_loss() {
    let store = Arc::new(make_store());
    let mut stream = store.observe(Some("Post"), None, None);

    let mut handles = Vec::new();
    for i in 0..20 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .save(
                    "Post",
                    record(json!({"id": format!("p-{i}"), "title": format!("t-{i}")})),
                    None,
                    None,
                )
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let mut seen = Vec::new();
    for _ in 0..20 {
        let event = next_event(&mut stream).await.unwrap();
        assert_eq!(event.op_type, OpType::Insert);
        seen.push(event.element.get("id").unwrap().clone());
    }
    seen.sort_by_key(|v| v.as_str().unwrap().to_string());
    seen.dedup();
    assert_eq!(seen.len(), 20);
    assert_eq!(store.query("Post", None, None).await.unwrap().len(), 20);
}

// ── Query ────────────────────────────────────────────────────────

#[tokio::test]
async fn query_pagination_windows_in_identifier_order() {
    let store = make_store();
    for i in 0..5 {
        store
            .save(
                "Post",
                record(json!({"id": format!("p-{i}"), "title": "t"})),
                None,
                None,
            )
            .await
            .unwrap();
    }

    let page = store
        .query("Post", None, Some(Pagination { page: 1, limit: 2 }))
        .await
        .unwrap();
    let ids: Vec<&str> = page.iter().map(|r| r["id"].as_str().unwrap()).collect();
    assert_eq!(ids, ["p-2", "p-3"]);
}
