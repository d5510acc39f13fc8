//! Schema-derived model definitions.
//!
//! A [`ModelSchema`] is loaded once from a compiled schema and is immutable
//! for the process lifetime. It carries every model's field map, primary-key
//! descriptor, and authorization rules, plus the topological ordering the
//! sync engine uses to hydrate parents before their dependents.

use crate::auth::AuthorizationRule;
use crate::{Error, JsonObject, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Server-managed version counter present on synced records.
pub const VERSION_FIELD: &str = "_version";
/// Server-managed soft-delete marker present on synced records.
pub const DELETED_FIELD: &str = "_deleted";
/// Server-managed last-change timestamp present on synced records.
pub const LAST_CHANGED_AT_FIELD: &str = "_lastChangedAt";

/// Separator used to join composite primary-key values into one identifier.
///
/// A model keyed on `(customId, createdAt)` produces identifiers like
/// `12-234-5#2022-09-28T00:00:00.000Z`.
pub const PRIMARY_KEY_VALUE_SEPARATOR: &str = "#";

/// The declared type of a model field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    Id,
    String,
    Int,
    Float,
    Boolean,
    DateTime,
    Json,
    /// A reference to another model in the same namespace.
    Model(String),
}

/// A relationship carried by a field, with the scalar column(s) that hold
/// the related record's key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    /// The related model's name.
    pub connected_model: String,
    /// The scalar field(s) on this model that store the related key.
    /// Multiple entries when the related model has a composite key.
    pub target_names: Vec<String>,
}

/// One field of a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelField {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub is_array: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub association: Option<Association>,
}

impl ModelField {
    /// A required scalar field.
    pub fn scalar(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
            is_array: false,
            association: None,
        }
    }

    /// An optional scalar field.
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            required: false,
            ..Self::scalar(name, field_type)
        }
    }

    /// A field holding a reference to a parent model.
    pub fn belongs_to(
        name: impl Into<String>,
        connected_model: impl Into<String>,
        target_names: Vec<String>,
    ) -> Self {
        let connected_model = connected_model.into();
        Self {
            name: name.into(),
            field_type: FieldType::Model(connected_model.clone()),
            required: false,
            is_array: false,
            association: Some(Association {
                connected_model,
                target_names,
            }),
        }
    }

    /// Marks the field as an array.
    pub fn array(mut self) -> Self {
        self.is_array = true;
        self
    }
}

/// Primary-key descriptor: a single field or an ordered composite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimaryKey {
    Simple(String),
    Composite(Vec<String>),
}

impl Default for PrimaryKey {
    fn default() -> Self {
        Self::Simple("id".to_string())
    }
}

impl PrimaryKey {
    /// The ordered key field names.
    pub fn fields(&self) -> &[String] {
        match self {
            Self::Simple(field) => std::slice::from_ref(field),
            Self::Composite(fields) => fields,
        }
    }

    /// Whether `field` participates in the key.
    pub fn contains(&self, field: &str) -> bool {
        self.fields().iter().any(|f| f == field)
    }
}

/// An immutable model definition loaded from the compiled schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub name: String,
    /// Field map keyed by field name.
    pub fields: BTreeMap<String, ModelField>,
    /// Whether the model participates in remote synchronization.
    pub syncable: bool,
    pub primary_key: PrimaryKey,
    /// Zero or more authorization rules attached to the model.
    pub auth_rules: Vec<AuthorizationRule>,
}

impl ModelDefinition {
    /// Creates a syncable model with a simple `id` key and no auth rules.
    pub fn new(name: impl Into<String>, fields: Vec<ModelField>) -> Self {
        Self {
            name: name.into(),
            fields: fields.into_iter().map(|f| (f.name.clone(), f)).collect(),
            syncable: true,
            primary_key: PrimaryKey::default(),
            auth_rules: Vec::new(),
        }
    }

    /// Replaces the primary key descriptor.
    pub fn with_primary_key(mut self, primary_key: PrimaryKey) -> Self {
        self.primary_key = primary_key;
        self
    }

    /// Attaches an authorization rule.
    pub fn with_auth_rule(mut self, rule: AuthorizationRule) -> Self {
        self.auth_rules.push(rule);
        self
    }

    /// Marks the model as excluded from remote synchronization.
    pub fn local_only(mut self) -> Self {
        self.syncable = false;
        self
    }

    /// Looks up a field by name.
    pub fn field(&self, name: &str) -> Option<&ModelField> {
        self.fields.get(name)
    }

    /// Extracts the record's identifier, joining composite key values with
    /// [`PRIMARY_KEY_VALUE_SEPARATOR`].
    pub fn identifier_value(&self, record: &JsonObject) -> Result<String> {
        let mut parts = Vec::with_capacity(self.primary_key.fields().len());
        for field in self.primary_key.fields() {
            let value = record
                .get(field)
                .and_then(scalar_to_string)
                .ok_or_else(|| Error::MissingIdentifier {
                    model: self.name.clone(),
                    field: field.clone(),
                })?;
            parts.push(value);
        }
        Ok(parts.join(PRIMARY_KEY_VALUE_SEPARATOR))
    }

    /// The names of the models this model references through associations.
    pub fn parent_models(&self) -> Vec<String> {
        let mut parents: Vec<String> = self
            .fields
            .values()
            .filter_map(|f| f.association.as_ref())
            .map(|a| a.connected_model.clone())
            .filter(|name| name != &self.name)
            .collect();
        parents.sort();
        parents.dedup();
        parents
    }
}

fn scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// All models of one namespace, with their dependency ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSchema {
    pub namespace: String,
    models: BTreeMap<String, ModelDefinition>,
    /// Model name -> names of models that must sync before it.
    ordering: BTreeMap<String, Vec<String>>,
}

impl ModelSchema {
    /// Builds a schema from model definitions, deriving the topological
    /// ordering from each model's associations.
    pub fn new(namespace: impl Into<String>, models: Vec<ModelDefinition>) -> Self {
        let models: BTreeMap<String, ModelDefinition> =
            models.into_iter().map(|m| (m.name.clone(), m)).collect();
        let ordering = models
            .values()
            .map(|m| {
                let parents = m
                    .parent_models()
                    .into_iter()
                    .filter(|p| models.contains_key(p))
                    .collect();
                (m.name.clone(), parents)
            })
            .collect();
        Self {
            namespace: namespace.into(),
            models,
            ordering,
        }
    }

    /// Looks up a model definition by name.
    pub fn model(&self, name: &str) -> Result<&ModelDefinition> {
        self.models
            .get(name)
            .ok_or_else(|| Error::UnknownModel(name.to_string()))
    }

    /// All model definitions.
    pub fn models(&self) -> impl Iterator<Item = &ModelDefinition> {
        self.models.values()
    }

    /// The syncable model definitions.
    pub fn syncable_models(&self) -> impl Iterator<Item = &ModelDefinition> {
        self.models.values().filter(|m| m.syncable)
    }

    /// The models that must complete their sync pass before `model` starts.
    pub fn parents_of(&self, model: &str) -> &[String] {
        self.ordering.get(model).map(Vec::as_slice).unwrap_or(&[])
    }
}
