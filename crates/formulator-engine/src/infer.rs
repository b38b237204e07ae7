//! Scalar type inference over materialized values.

use formulator_dsl::parse_date;
use formulator_dsl::value::string_to_number;
use formulator_store::ScalarType;
use serde_json::Value;

/// Infer a concrete scalar type from the first `sample` values.
///
/// Missing, `null` and blank entries are skipped before sampling. The checks
/// run in order number, date, boolean; anything else (including an empty
/// sample) is a string. Never returns [`ScalarType::Auto`].
pub fn infer_type<'a>(
    values: impl IntoIterator<Item = Option<&'a Value>>,
    sample: usize,
) -> ScalarType {
    let sampled: Vec<&Value> = values
        .into_iter()
        .flatten()
        .filter(|v| !is_empty(v))
        .take(sample)
        .collect();

    if sampled.is_empty() {
        ScalarType::String
    } else if sampled.iter().all(|v| is_number(v)) {
        ScalarType::Number
    } else if sampled.iter().all(|v| is_date(v)) {
        ScalarType::Date
    } else if sampled.iter().all(|v| is_boolean(v)) {
        ScalarType::Boolean
    } else {
        ScalarType::String
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn is_number(value: &Value) -> bool {
    match value {
        Value::Number(_) => true,
        Value::String(s) => string_to_number(s).is_finite(),
        _ => false,
    }
}

fn is_date(value: &Value) -> bool {
    matches!(value, Value::String(s) if parse_date(s).is_some())
}

fn is_boolean(value: &Value) -> bool {
    match value {
        Value::Bool(_) => true,
        Value::String(s) => {
            let s = s.trim();
            s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("false")
        }
        _ => false,
    }
}
