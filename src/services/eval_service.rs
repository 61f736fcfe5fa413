//! Condition evaluation over a candidate snapshot. Pure and total: unknown
//! fields, missing values and type mismatches evaluate to `false` instead of
//! erroring, so one malformed condition can never take down a dispatch.

use serde_json::Value as JsonValue;

use crate::models::rule::{Condition, ConditionOperator};

pub fn evaluate(condition: &Condition, snapshot: &JsonValue) -> bool {
    let Some(actual) = lookup(snapshot, &condition.field) else {
        return false;
    };
    match condition.operator {
        ConditionOperator::GreaterThan => numeric(actual, &condition.value, |a, b| a > b),
        ConditionOperator::LessThan => numeric(actual, &condition.value, |a, b| a < b),
        ConditionOperator::Equals => equals(actual, &condition.value),
        ConditionOperator::Contains => contains(actual, &condition.value),
    }
}

pub fn evaluate_all<'a, I>(conditions: I, snapshot: &JsonValue) -> bool
where
    I: IntoIterator<Item = &'a Condition>,
{
    conditions.into_iter().all(|c| evaluate(c, snapshot))
}

/// Numeric comparison used by `score_threshold` triggers. `contains` has no
/// numeric meaning and fails closed.
pub fn compare_numbers(operator: &ConditionOperator, left: f64, right: f64) -> bool {
    match operator {
        ConditionOperator::GreaterThan => left > right,
        ConditionOperator::LessThan => left < right,
        ConditionOperator::Equals => (left - right).abs() < f64::EPSILON,
        ConditionOperator::Contains => false,
    }
}

fn lookup<'a>(root: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    path.split('.').try_fold(root, |value, segment| value.get(segment))
}

fn numeric(actual: &JsonValue, expected: &JsonValue, op: impl Fn(f64, f64) -> bool) -> bool {
    match (actual.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}

fn equals(actual: &JsonValue, expected: &JsonValue) -> bool {
    if let (Some(a), Some(b)) = (actual.as_f64(), expected.as_f64()) {
        return (a - b).abs() < f64::EPSILON;
    }
    actual == expected
}

fn contains(actual: &JsonValue, expected: &JsonValue) -> bool {
    match actual {
        JsonValue::String(haystack) => expected
            .as_str()
            .map(|needle| haystack.contains(needle))
            .unwrap_or(false),
        JsonValue::Array(items) => items.iter().any(|item| item == expected),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn condition(field: &str, operator: ConditionOperator, value: JsonValue) -> Condition {
        Condition {
            field: field.to_string(),
            operator,
            value,
        }
    }

    fn snapshot() -> JsonValue {
        json!({
            "status": "EXAM",
            "name": "Ada Chen",
            "scores": { "exam": 87.5, "interview": 4.0 },
            "skills": ["rust", "sql"],
            "job_id": 12
        })
    }

    #[test]
    fn dotted_paths_reach_nested_scores() {
        let snap = snapshot();
        assert!(evaluate(
            &condition("scores.exam", ConditionOperator::GreaterThan, json!(80)),
            &snap
        ));
        assert!(!evaluate(
            &condition("scores.exam", ConditionOperator::LessThan, json!(80)),
            &snap
        ));
    }

    #[test]
    fn unknown_fields_fail_closed() {
        let snap = snapshot();
        assert!(!evaluate(
            &condition("scores.culture_fit", ConditionOperator::GreaterThan, json!(1)),
            &snap
        ));
        assert!(!evaluate(
            &condition("nope.deep.path", ConditionOperator::Equals, json!("x")),
            &snap
        ));
    }

    #[test]
    fn numeric_operators_reject_non_numeric_operands() {
        let snap = snapshot();
        assert!(!evaluate(
            &condition("name", ConditionOperator::GreaterThan, json!(10)),
            &snap
        ));
        assert!(!evaluate(
            &condition("scores.exam", ConditionOperator::GreaterThan, json!("eighty")),
            &snap
        ));
    }

    #[test]
    fn equals_covers_strings_and_numbers() {
        let snap = snapshot();
        assert!(evaluate(
            &condition("status", ConditionOperator::Equals, json!("EXAM")),
            &snap
        ));
        assert!(evaluate(
            &condition("job_id", ConditionOperator::Equals, json!(12.0)),
            &snap
        ));
        assert!(!evaluate(
            &condition("status", ConditionOperator::Equals, json!("HIRED")),
            &snap
        ));
    }

    #[test]
    fn contains_handles_substrings_and_membership() {
        let snap = snapshot();
        assert!(evaluate(
            &condition("name", ConditionOperator::Contains, json!("Ada")),
            &snap
        ));
        assert!(evaluate(
            &condition("skills", ConditionOperator::Contains, json!("rust")),
            &snap
        ));
        assert!(!evaluate(
            &condition("skills", ConditionOperator::Contains, json!("cobol")),
            &snap
        ));
        assert!(!evaluate(
            &condition("job_id", ConditionOperator::Contains, json!(1)),
            &snap
        ));
    }

    #[test]
    fn all_conditions_must_hold() {
        let snap = snapshot();
        let conditions = vec![
            condition("scores.exam", ConditionOperator::GreaterThan, json!(80)),
            condition("skills", ConditionOperator::Contains, json!("rust")),
        ];
        assert!(evaluate_all(&conditions, &snap));

        let with_failing = vec![
            condition("scores.exam", ConditionOperator::GreaterThan, json!(80)),
            condition("skills", ConditionOperator::Contains, json!("cobol")),
        ];
        assert!(!evaluate_all(&with_failing, &snap));
    }
}
