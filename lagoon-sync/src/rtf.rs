//! Server-side realtime filter incompatibility detection.
//!
//! Not every predicate shape is supported by backend subscription
//! filtering. When the backend rejects a filter variable, the subscription
//! is reopened without it and filtering falls back to client-side predicate
//! evaluation — permanently for that (model, operation) pair.

use lagoon_types::{ModelDefinition, PredicateGroup};

/// The known classes of server-side filter rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterErrorKind {
    /// The subscription field takes no filter argument at all.
    UnknownField,
    /// The filter references more attributes than the backend allows.
    MaxAttributes,
    /// Too many and/or combinations.
    MaxCombinations,
    /// The same field name appears more than once.
    RepeatedFieldName,
    /// The backend rejects the reserved `not` group key.
    NotGroup,
    /// A filtered field is absent from the generated input type.
    FieldNotInType,
}

const MESSAGE_KIND_MAP: [(&str, FilterErrorKind); 6] = [
    (
        "UnknownArgument: Unknown field argument filter",
        FilterErrorKind::UnknownField,
    ),
    (
        "Filters exceed maximum attributes limit",
        FilterErrorKind::MaxAttributes,
    ),
    (
        "Filters combination exceed maximum limit",
        FilterErrorKind::MaxCombinations,
    ),
    (
        "filter uses same fieldName multiple time",
        FilterErrorKind::RepeatedFieldName,
    ),
    (
        "The variables input contains a field name 'not'",
        FilterErrorKind::NotGroup,
    ),
    (
        "The variables input contains a field that is not defined for input object type",
        FilterErrorKind::FieldNotInType,
    ),
];

/// Matches a subscription error message against the known filter-rejection
/// classes. `None` means the error is not filter-related.
pub fn classify_filter_error(message: &str) -> Option<FilterErrorKind> {
    MESSAGE_KIND_MAP
        .iter()
        .find(|(fragment, _)| message.contains(fragment))
        .map(|(_, kind)| *kind)
}

/// A remediation hint logged when falling back to client-side filtering.
pub fn filter_error_remediation(
    kind: FilterErrorKind,
    model: &ModelDefinition,
    predicate: Option<&PredicateGroup>,
) -> String {
    let field_count = predicate.map(count_fields).unwrap_or(0);
    match kind {
        FilterErrorKind::UnknownField => format!(
            "Backend subscriptions for {} do not accept a filter argument. \
             Update the deployed API to a version with subscription filtering enabled.",
            model.name
        ),
        FilterErrorKind::MaxAttributes => format!(
            "The sync expression for {} references {} fields, more than the backend \
             supports in a subscription filter. Reduce the number of distinct fields.",
            model.name, field_count
        ),
        FilterErrorKind::MaxCombinations => format!(
            "The sync expression for {} combines too many and/or groups for backend \
             subscription filtering. Flatten or simplify the expression.",
            model.name
        ),
        FilterErrorKind::RepeatedFieldName => format!(
            "The sync expression for {} repeats a field name, which backend \
             subscription filtering rejects. Merge the repeated comparisons.",
            model.name
        ),
        FilterErrorKind::NotGroup => format!(
            "The sync expression for {} uses a `not` group, which backend \
             subscription filtering rejects. Rewrite it with inverted operators.",
            model.name
        ),
        FilterErrorKind::FieldNotInType => format!(
            "The sync expression for {} filters on a field missing from the deployed \
             subscription filter input type. Redeploy the API or drop the field.",
            model.name
        ),
    }
}

fn count_fields(predicate: &PredicateGroup) -> usize {
    use lagoon_types::Predicate;
    predicate
        .predicates
        .iter()
        .map(|p| match p {
            Predicate::Field(_) => 1,
            Predicate::Group(g) => count_fields(g),
        })
        .sum()
}
