use pretty_assertions::assert_eq;
use lagoon_types::{
    Error, FieldType, JsonObject, ModelDefinition, ModelField, ModelSchema, PrimaryKey,
};
use serde_json::json;

fn record(value: serde_json::Value) -> JsonObject {
    value.as_object().expect("record must be an object").clone()
}

fn author() -> ModelDefinition {
    ModelDefinition::new(
        "Author",
        vec![
            ModelField::scalar("id", FieldType::Id),
            ModelField::scalar("name", FieldType::String),
        ],
    )
}

fn post() -> ModelDefinition {
    ModelDefinition::new(
        "Post",
        vec![
            ModelField::scalar("id", FieldType::Id),
            ModelField::scalar("title", FieldType::String),
            ModelField::belongs_to("author", "Author", vec!["authorId".to_string()]),
        ],
    )
}

// ── Identifiers ──────────────────────────────────────────────────

#[test]
fn simple_identifier() {
    let model = author();
    let rec = record(json!({"id": "a-1", "name": "Ada"}));
    assert_eq!(model.identifier_value(&rec).unwrap(), "a-1");
}

#[test]
fn composite_identifier_joins_with_separator() {
    let model = ModelDefinition::new(
        "Booking",
        vec![
            ModelField::scalar("roomId", FieldType::Id),
            ModelField::scalar("startsAt", FieldType::DateTime),
        ],
    )
    .with_primary_key(PrimaryKey::Composite(vec![
        "roomId".to_string(),
        "startsAt".to_string(),
    ]));
    let rec = record(json!({"roomId": "r-9", "startsAt": "2024-06-01T10:00:00Z"}));
    assert_eq!(
        model.identifier_value(&rec).unwrap(),
        "r-9#2024-06-01T10:00:00Z"
    );
}

#[test]
fn missing_identifier_field_errors() {
    let model = author();
    let rec = record(json!({"name": "Ada"}));
    match model.identifier_value(&rec) {
        Err(Error::MissingIdentifier { model, field }) => {
            assert_eq!(model, "Author");
            assert_eq!(field, "id");
        }
        other => panic!("expected MissingIdentifier, got {other:?}"),
    }
}

// ── Topological ordering ─────────────────────────────────────────

#[test]
fn parents_derived_from_associations() {
    let schema = ModelSchema::new("blog", vec![author(), post()]);
    assert_eq!(schema.parents_of("Post"), ["Author".to_string()]);
    assert!(schema.parents_of("Author").is_empty());
}

#[test]
fn parents_outside_schema_are_ignored() {
    let schema = ModelSchema::new("blog", vec![post()]);
    assert!(schema.parents_of("Post").is_empty());
}

#[test]
fn syncable_filter() {
    let local = ModelDefinition::new(
        "Draft",
        vec![ModelField::scalar("id", FieldType::Id)],
    )
    .local_only();
    let schema = ModelSchema::new("blog", vec![author(), local]);
    let syncable: Vec<&str> = schema.syncable_models().map(|m| m.name.as_str()).collect();
    assert_eq!(syncable, ["Author"]);
}

#[test]
fn unknown_model_lookup_errors() {
    let schema = ModelSchema::new("blog", vec![author()]);
    assert!(matches!(schema.model("Ghost"), Err(Error::UnknownModel(_))));
}
