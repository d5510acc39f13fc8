//! Filter predicates.
//!
//! A predicate tree is compiled once per model and used in two places with
//! identical semantics: serialized as a server-side query variable, and
//! evaluated client-side against records that arrive outside the
//! server-enforced scope. Evaluation is pure and side-effect free; a field
//! that is absent or not comparable to the operand fails the comparison
//! rather than erroring.

use crate::JsonObject;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::cmp::Ordering;

/// How the members of a [`PredicateGroup`] combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupType {
    And,
    Or,
    Not,
}

/// A single field comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldPredicate {
    pub field: String,
    pub operator: PredicateOperator,
    pub operand: Value,
}

/// Supported comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PredicateOperator {
    Eq,
    Ne,
    Le,
    Lt,
    Ge,
    Gt,
    Between,
    BeginsWith,
    Contains,
    NotContains,
}

impl PredicateOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Le => "le",
            Self::Lt => "lt",
            Self::Ge => "ge",
            Self::Gt => "gt",
            Self::Between => "between",
            Self::BeginsWith => "beginsWith",
            Self::Contains => "contains",
            Self::NotContains => "notContains",
        }
    }
}

/// A node of the predicate tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Predicate {
    Field(FieldPredicate),
    Group(PredicateGroup),
}

/// A boolean combination of predicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredicateGroup {
    pub group_type: GroupType,
    pub predicates: Vec<Predicate>,
}

impl PredicateGroup {
    pub fn new(group_type: GroupType, predicates: Vec<Predicate>) -> Self {
        Self {
            group_type,
            predicates,
        }
    }

    /// An `and` group over field comparisons.
    pub fn all(predicates: Vec<FieldPredicate>) -> Self {
        Self::new(
            GroupType::And,
            predicates.into_iter().map(Predicate::Field).collect(),
        )
    }

    /// Evaluates the group against a record. An empty group matches.
    pub fn matches(&self, record: &JsonObject) -> bool {
        if self.predicates.is_empty() {
            return true;
        }
        let result = match self.group_type {
            GroupType::And | GroupType::Not => self
                .predicates
                .iter()
                .all(|p| Self::matches_node(p, record)),
            GroupType::Or => self
                .predicates
                .iter()
                .any(|p| Self::matches_node(p, record)),
        };
        match self.group_type {
            GroupType::Not => !result,
            _ => result,
        }
    }

    fn matches_node(node: &Predicate, record: &JsonObject) -> bool {
        match node {
            Predicate::Field(field) => {
                let value = record.get(&field.field).unwrap_or(&Value::Null);
                evaluate_field(value, field.operator, &field.operand)
            }
            Predicate::Group(group) => group.matches(record),
        }
    }

    /// Serializes the tree into the wire filter variable shape:
    /// `{"and": [{"rating": {"gt": 4}}, ...]}`.
    pub fn to_filter(&self) -> Value {
        let children: Vec<Value> = self
            .predicates
            .iter()
            .map(|p| match p {
                Predicate::Field(f) => json!({ &f.field: { f.operator.as_str(): f.operand } }),
                Predicate::Group(g) => g.to_filter(),
            })
            .collect();
        match self.group_type {
            GroupType::And => json!({ "and": children }),
            GroupType::Or => json!({ "or": children }),
            // `not` negates a single filter object
            GroupType::Not => json!({ "not": children.into_iter().next().unwrap_or(json!({})) }),
        }
    }
}

fn evaluate_field(value: &Value, operator: PredicateOperator, operand: &Value) -> bool {
    match operator {
        PredicateOperator::Eq => values_equal(value, operand),
        PredicateOperator::Ne => !values_equal(value, operand),
        PredicateOperator::Le => {
            matches!(compare(value, operand), Some(Ordering::Less | Ordering::Equal))
        }
        PredicateOperator::Lt => matches!(compare(value, operand), Some(Ordering::Less)),
        PredicateOperator::Ge => matches!(
            compare(value, operand),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        PredicateOperator::Gt => matches!(compare(value, operand), Some(Ordering::Greater)),
        PredicateOperator::Between => match operand.as_array() {
            Some(bounds) if bounds.len() == 2 => {
                matches!(
                    compare(value, &bounds[0]),
                    Some(Ordering::Greater | Ordering::Equal)
                ) && matches!(
                    compare(value, &bounds[1]),
                    Some(Ordering::Less | Ordering::Equal)
                )
            }
            _ => false,
        },
        PredicateOperator::BeginsWith => match (value.as_str(), operand.as_str()) {
            (Some(v), Some(prefix)) => v.starts_with(prefix),
            _ => false,
        },
        PredicateOperator::Contains => contains(value, operand),
        PredicateOperator::NotContains => {
            value.is_null() || !contains(value, operand)
        }
    }
}

fn contains(value: &Value, operand: &Value) -> bool {
    match value {
        Value::String(v) => operand.as_str().is_some_and(|needle| v.contains(needle)),
        Value::Array(items) => items.iter().any(|item| values_equal(item, operand)),
        _ => false,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.as_str().cmp(y.as_str())),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
