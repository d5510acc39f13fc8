//! Core type definitions for Lagoon.
//!
//! This crate defines the fundamental, schema-derived types used throughout
//! the sync engine:
//! - Model definitions (field maps, primary keys, relationships)
//! - Authorization rules and decoded identity-token claims
//! - Filter predicates, evaluated both as server-side query variables and as
//!   client-side record filters
//! - Change events published on the local store's change stream
//!
//! Everything here is immutable once loaded from a compiled schema. Records
//! themselves are schema-typed JSON objects ([`JsonObject`]); the engine has
//! no knowledge of application field meanings beyond what the schema declares.

mod auth;
mod change;
mod predicate;
mod schema;

pub use auth::{
    AuthMode, AuthProvider, AuthStrategy, AuthorizationRule, IdentityClaims, UserCredentialState,
};
pub use change::{ChangeEvent, MutatorId, OpType};
pub use predicate::{
    FieldPredicate, GroupType, Predicate, PredicateGroup, PredicateOperator,
};
pub use schema::{
    Association, FieldType, ModelDefinition, ModelField, ModelSchema, PrimaryKey,
    DELETED_FIELD, LAST_CHANGED_AT_FIELD, PRIMARY_KEY_VALUE_SEPARATOR, VERSION_FIELD,
};

/// A record flowing through the engine: a schema-typed JSON object.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("record for model {model} is missing identifier field {field}")]
    MissingIdentifier { model: String, field: String },
}
