//! Change events published on the local store's change stream.

use crate::predicate::PredicateGroup;
use crate::JsonObject;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The kind of mutation a change event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OpType {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// Identifies the writer that originated a mutation, so a writer can
/// exclude its own echoes when observing the change stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutatorId(Uuid);

impl MutatorId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MutatorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MutatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The unit published on the local store's change stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Name of the mutated model.
    pub model: String,
    pub op_type: OpType,
    /// The mutation payload. For locally-originated updates this is the
    /// minimal changed-fields input, not the full record.
    pub element: JsonObject,
    /// The originating writer, if any. Stripped before delivery to
    /// observers; used only for echo suppression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutator: Option<MutatorId>,
    /// The condition under which the mutation was applied, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<PredicateGroup>,
    /// The full record as stored, when it differs from `element`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_element: Option<JsonObject>,
}
