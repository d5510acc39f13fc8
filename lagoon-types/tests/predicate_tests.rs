use lagoon_types::{
    FieldPredicate, GroupType, JsonObject, Predicate, PredicateGroup, PredicateOperator,
};
use serde_json::json;

fn record(value: serde_json::Value) -> JsonObject {
    value.as_object().expect("record must be an object").clone()
}

fn field(name: &str, operator: PredicateOperator, operand: serde_json::Value) -> Predicate {
    Predicate::Field(FieldPredicate {
        field: name.to_string(),
        operator,
        operand,
    })
}

fn group_of(group_type: GroupType, predicates: Vec<Predicate>) -> PredicateGroup {
    PredicateGroup::new(group_type, predicates)
}

// ── Field operators ──────────────────────────────────────────────

#[test]
fn eq_and_ne() {
    let rec = record(json!({"title": "hello", "rating": 4}));
    let eq = group_of(
        GroupType::And,
        vec![field("title", PredicateOperator::Eq, json!("hello"))],
    );
    assert!(eq.matches(&rec));

    let ne = group_of(
        GroupType::And,
        vec![field("title", PredicateOperator::Ne, json!("other"))],
    );
    assert!(ne.matches(&rec));
}

#[test]
fn numeric_comparisons() {
    let rec = record(json!({"rating": 4}));
    let cases = [
        (PredicateOperator::Gt, json!(3), true),
        (PredicateOperator::Gt, json!(4), false),
        (PredicateOperator::Ge, json!(4), true),
        (PredicateOperator::Lt, json!(5), true),
        (PredicateOperator::Le, json!(3), false),
    ];
    for (operator, operand, expected) in cases {
        let group = group_of(GroupType::And, vec![field("rating", operator, operand)]);
        assert_eq!(group.matches(&rec), expected, "{operator:?}");
    }
}

#[test]
fn integer_and_float_compare_equal() {
    let rec = record(json!({"rating": 4.0}));
    let group = group_of(
        GroupType::And,
        vec![field("rating", PredicateOperator::Eq, json!(4))],
    );
    assert!(group.matches(&rec));
}

#[test]
fn between_inclusive() {
    let rec = record(json!({"rating": 4}));
    let inside = group_of(
        GroupType::And,
        vec![field("rating", PredicateOperator::Between, json!([1, 4]))],
    );
    assert!(inside.matches(&rec));

    let outside = group_of(
        GroupType::And,
        vec![field("rating", PredicateOperator::Between, json!([5, 9]))],
    );
    assert!(!outside.matches(&rec));
}

#[test]
fn begins_with_and_contains() {
    let rec = record(json!({"title": "hello world", "tags": ["a", "b"]}));
    assert!(group_of(
        GroupType::And,
        vec![field("title", PredicateOperator::BeginsWith, json!("hello"))]
    )
    .matches(&rec));
    assert!(group_of(
        GroupType::And,
        vec![field("title", PredicateOperator::Contains, json!("o w"))]
    )
    .matches(&rec));
    assert!(group_of(
        GroupType::And,
        vec![field("tags", PredicateOperator::Contains, json!("b"))]
    )
    .matches(&rec));
    assert!(group_of(
        GroupType::And,
        vec![field("tags", PredicateOperator::NotContains, json!("c"))]
    )
    .matches(&rec));
}

#[test]
fn not_contains_on_missing_field_matches() {
    let rec = record(json!({"title": "x"}));
    let group = group_of(
        GroupType::And,
        vec![field("tags", PredicateOperator::NotContains, json!("a"))],
    );
    assert!(group.matches(&rec));
}

// ── Fail-closed behavior ─────────────────────────────────────────

#[test]
fn missing_field_fails_ordered_comparison() {
    let rec = record(json!({"title": "x"}));
    let group = group_of(
        GroupType::And,
        vec![field("rating", PredicateOperator::Gt, json!(1))],
    );
    assert!(!group.matches(&rec));
}

#[test]
fn incomparable_types_fail_closed() {
    let rec = record(json!({"rating": "high"}));
    let group = group_of(
        GroupType::And,
        vec![field("rating", PredicateOperator::Gt, json!(1))],
    );
    assert!(!group.matches(&rec));
}

// ── Groups ───────────────────────────────────────────────────────

#[test]
fn and_or_not_combinations() {
    let rec = record(json!({"rating": 4, "title": "hello"}));

    let and = group_of(
        GroupType::And,
        vec![
            field("rating", PredicateOperator::Gt, json!(3)),
            field("title", PredicateOperator::Eq, json!("hello")),
        ],
    );
    assert!(and.matches(&rec));

    let or = group_of(
        GroupType::Or,
        vec![
            field("rating", PredicateOperator::Gt, json!(9)),
            field("title", PredicateOperator::Eq, json!("hello")),
        ],
    );
    assert!(or.matches(&rec));

    let not = group_of(
        GroupType::Not,
        vec![field("rating", PredicateOperator::Gt, json!(9))],
    );
    assert!(not.matches(&rec));
}

#[test]
fn nested_groups() {
    let rec = record(json!({"rating": 4, "status": "draft"}));
    let group = group_of(
        GroupType::And,
        vec![
            field("rating", PredicateOperator::Ge, json!(1)),
            Predicate::Group(group_of(
                GroupType::Or,
                vec![
                    field("status", PredicateOperator::Eq, json!("draft")),
                    field("status", PredicateOperator::Eq, json!("published")),
                ],
            )),
        ],
    );
    assert!(group.matches(&rec));
}

#[test]
fn empty_group_matches_everything() {
    let rec = record(json!({"anything": 1}));
    assert!(group_of(GroupType::And, vec![]).matches(&rec));
}

#[test]
fn evaluation_is_repeatable() {
    let rec = record(json!({"rating": 4}));
    let group = group_of(
        GroupType::And,
        vec![field("rating", PredicateOperator::Gt, json!(3))],
    );
    for _ in 0..3 {
        assert!(group.matches(&rec));
    }
}

// ── Wire filter shape ────────────────────────────────────────────

#[test]
fn to_filter_field_shape() {
    let group = group_of(
        GroupType::And,
        vec![field("rating", PredicateOperator::Gt, json!(4))],
    );
    assert_eq!(group.to_filter(), json!({"and": [{"rating": {"gt": 4}}]}));
}

#[test]
fn to_filter_nested_or() {
    let group = group_of(
        GroupType::Or,
        vec![
            field("status", PredicateOperator::Eq, json!("draft")),
            Predicate::Group(group_of(
                GroupType::And,
                vec![field("rating", PredicateOperator::Le, json!(2))],
            )),
        ],
    );
    assert_eq!(
        group.to_filter(),
        json!({"or": [{"status": {"eq": "draft"}}, {"and": [{"rating": {"le": 2}}]}]})
    );
}

#[test]
fn to_filter_not_wraps_single_child() {
    let group = group_of(
        GroupType::Not,
        vec![field("status", PredicateOperator::Eq, json!("hidden"))],
    );
    assert_eq!(group.to_filter(), json!({"not": {"status": {"eq": "hidden"}}}));
}
