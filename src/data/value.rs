//! Structured attribute values and their JSON codec
//!
//! Span, event and link attributes map string keys to an [`AttributeValue`], a
//! JSON-like tree. On the wire the tree travels either as a JSON value or as a
//! `google.protobuf.Value`; both share these rules:
//!
//! - numbers are `f64`. Integers with magnitude up to 2^53 round-trip exactly,
//!   larger integers are rounded to the nearest representable double;
//! - NaN and infinities have no wire form and are rejected;
//! - nesting is bounded by [`MAX_ATTRIBUTE_DEPTH`]. The tree is owned, so it
//!   cannot reference itself; the depth bound is what stops pathological input;
//! - an empty list or map is a value of its own, distinct from null.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Deepest nesting accepted for a single attribute value (a scalar is depth 1)
pub const MAX_ATTRIBUTE_DEPTH: usize = 32;

/// Largest integer magnitude an `f64` holds exactly (2^53)
pub const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Attribute map with unique keys
pub type Attributes = BTreeMap<String, AttributeValue>;

/// Generic structured value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<AttributeValue>),
    Map(Attributes),
}

impl AttributeValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::Null => "null",
            AttributeValue::Bool(_) => "bool",
            AttributeValue::Number(_) => "number",
            AttributeValue::String(_) => "string",
            AttributeValue::List(_) => "list",
            AttributeValue::Map(_) => "map",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// Nesting depth of this value; scalars have depth 1
    pub fn depth(&self) -> usize {
        match self {
            AttributeValue::List(items) => 1 + items.iter().map(|v| v.depth()).max().unwrap_or(0),
            AttributeValue::Map(entries) => {
                1 + entries.values().map(|v| v.depth()).max().unwrap_or(0)
            }
            _ => 1,
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Bool(b)
    }
}

impl From<f64> for AttributeValue {
    fn from(n: f64) -> Self {
        AttributeValue::Number(n)
    }
}

/// Integers beyond 2^53 lose precision here; see the module docs.
impl From<i64> for AttributeValue {
    fn from(n: i64) -> Self {
        AttributeValue::Number(n as f64)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<Vec<AttributeValue>> for AttributeValue {
    fn from(items: Vec<AttributeValue>) -> Self {
        AttributeValue::List(items)
    }
}

impl From<Attributes> for AttributeValue {
    fn from(entries: Attributes) -> Self {
        AttributeValue::Map(entries)
    }
}

/// Why an attribute value was refused by the codec
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AttributeErrorReason {
    #[error("nesting exceeds {max} levels")]
    TooDeep { max: usize },

    #[error("number {0} has no wire representation")]
    NonFinite(f64),

    #[error("number cannot be represented as a double")]
    Unrepresentable,
}

/// A refused attribute value, with the path to the offending element
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("attribute '{path}': {reason}")]
pub struct AttributeError {
    pub path: String,
    pub reason: AttributeErrorReason,
}

impl AttributeError {
    fn new(path: &str, reason: AttributeErrorReason) -> Self {
        Self {
            path: path.to_string(),
            reason,
        }
    }
}

/// Encode a value into its JSON wire form
pub fn encode(value: &AttributeValue) -> Result<JsonValue, AttributeError> {
    encode_at(value, "", 1)
}

/// Decode a JSON wire value
pub fn decode(json: &JsonValue) -> Result<AttributeValue, AttributeError> {
    decode_at(json, "", 1)
}

/// Encode a whole attribute map
pub fn encode_attributes(
    attributes: &Attributes,
) -> Result<BTreeMap<String, JsonValue>, AttributeError> {
    attributes
        .iter()
        .map(|(key, value)| Ok((key.clone(), encode_at(value, key, 1)?)))
        .collect()
}

/// Decode a whole attribute map, reporting every offending key
pub fn decode_attributes(
    attributes: &BTreeMap<String, JsonValue>,
) -> Result<Attributes, Vec<AttributeError>> {
    let mut decoded = Attributes::new();
    let mut errors = Vec::new();

    for (key, json) in attributes {
        match decode_at(json, key, 1) {
            Ok(value) => {
                decoded.insert(key.clone(), value);
            }
            Err(e) => errors.push(e),
        }
    }

    if errors.is_empty() {
        Ok(decoded)
    } else {
        Err(errors)
    }
}

fn child_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

fn encode_at(value: &AttributeValue, path: &str, depth: usize) -> Result<JsonValue, AttributeError> {
    if depth > MAX_ATTRIBUTE_DEPTH {
        return Err(AttributeError::new(
            path,
            AttributeErrorReason::TooDeep {
                max: MAX_ATTRIBUTE_DEPTH,
            },
        ));
    }

    Ok(match value {
        AttributeValue::Null => JsonValue::Null,
        AttributeValue::Bool(b) => JsonValue::Bool(*b),
        AttributeValue::Number(n) => encode_number(*n)
            .ok_or_else(|| AttributeError::new(path, AttributeErrorReason::NonFinite(*n)))?,
        AttributeValue::String(s) => JsonValue::String(s.clone()),
        AttributeValue::List(items) => JsonValue::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| encode_at(item, &format!("{}[{}]", path, i), depth + 1))
                .collect::<Result<_, _>>()?,
        ),
        AttributeValue::Map(entries) => JsonValue::Object(
            entries
                .iter()
                .map(|(key, item)| {
                    Ok((key.clone(), encode_at(item, &child_path(path, key), depth + 1)?))
                })
                .collect::<Result<_, AttributeError>>()?,
        ),
    })
}

/// Integral doubles inside the exact range go out as JSON integers
fn encode_number(n: f64) -> Option<JsonValue> {
    if n.fract() == 0.0 && n.abs() <= MAX_EXACT_INTEGER {
        return Some(JsonValue::from(n as i64));
    }
    serde_json::Number::from_f64(n).map(JsonValue::Number)
}

fn decode_at(json: &JsonValue, path: &str, depth: usize) -> Result<AttributeValue, AttributeError> {
    if depth > MAX_ATTRIBUTE_DEPTH {
        return Err(AttributeError::new(
            path,
            AttributeErrorReason::TooDeep {
                max: MAX_ATTRIBUTE_DEPTH,
            },
        ));
    }

    Ok(match json {
        JsonValue::Null => AttributeValue::Null,
        JsonValue::Bool(b) => AttributeValue::Bool(*b),
        JsonValue::Number(n) => {
            let value = n
                .as_f64()
                .ok_or_else(|| AttributeError::new(path, AttributeErrorReason::Unrepresentable))?;
            if !value.is_finite() {
                return Err(AttributeError::new(path, AttributeErrorReason::NonFinite(value)));
            }
            AttributeValue::Number(value)
        }
        JsonValue::String(s) => AttributeValue::String(s.clone()),
        JsonValue::Array(items) => AttributeValue::List(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| decode_at(item, &format!("{}[{}]", path, i), depth + 1))
                .collect::<Result<_, _>>()?,
        ),
        JsonValue::Object(entries) => AttributeValue::Map(
            entries
                .iter()
                .map(|(key, item)| {
                    Ok((key.clone(), decode_at(item, &child_path(path, key), depth + 1)?))
                })
                .collect::<Result<_, AttributeError>>()?,
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn nested(depth: usize) -> JsonValue {
        let mut value = json!(1);
        for _ in 1..depth {
            value = json!([value]);
        }
        value
    }

    #[test]
    fn test_round_trip_mixed_value() {
        let json = json!({
            "model": "gpt-4o-mini",
            "temperature": 0.9,
            "max_tokens": 256,
            "stream": false,
            "stop": null,
            "messages": [{"role": "user", "content": "What is MLflow?"}],
            "empty_list": [],
            "empty_map": {}
        });

        let value = decode(&json).unwrap();
        assert_eq!(encode(&value).unwrap(), json);
        assert_eq!(decode(&encode(&value).unwrap()).unwrap(), value);
    }

    #[test]
    fn test_empty_containers_are_not_null() {
        let list = decode(&json!([])).unwrap();
        let map = decode(&json!({})).unwrap();

        assert_eq!(list, AttributeValue::List(vec![]));
        assert_eq!(map, AttributeValue::Map(Attributes::new()));
        assert!(!list.is_null());
        assert!(!map.is_null());
    }

    #[test]
    fn test_integers_up_to_two_pow_53_are_exact() {
        let exact = 9_007_199_254_740_992_u64;
        let value = decode(&json!(exact)).unwrap();
        assert_eq!(value.as_f64(), Some(MAX_EXACT_INTEGER));
        assert_eq!(encode(&value).unwrap().as_f64(), Some(exact as f64));
    }

    #[test]
    fn test_integers_beyond_two_pow_53_lose_precision() {
        let value = decode(&json!(9_007_199_254_740_993_u64)).unwrap();
        // Rounded to the nearest double, which is 2^53
        assert_eq!(value.as_f64(), Some(MAX_EXACT_INTEGER));
    }

    #[test]
    fn test_non_finite_numbers_are_rejected() {
        let err = encode(&AttributeValue::Number(f64::NAN)).unwrap_err();
        assert!(matches!(err.reason, AttributeErrorReason::NonFinite(_)));

        let mut attrs = Attributes::new();
        attrs.insert(
            "ratio".to_string(),
            AttributeValue::List(vec![AttributeValue::Number(f64::INFINITY)]),
        );
        let err = encode_attributes(&attrs).unwrap_err();
        assert_eq!(err.path, "ratio[0]");
    }

    #[test]
    fn test_depth_limit() {
        assert!(decode(&nested(MAX_ATTRIBUTE_DEPTH)).is_ok());

        let err = decode(&nested(MAX_ATTRIBUTE_DEPTH + 1)).unwrap_err();
        assert_eq!(
            err.reason,
            AttributeErrorReason::TooDeep {
                max: MAX_ATTRIBUTE_DEPTH
            }
        );
    }

    #[test]
    fn test_decode_attributes_reports_every_key() {
        let mut raw = BTreeMap::new();
        raw.insert("ok".to_string(), json!("fine"));
        raw.insert("deep_a".to_string(), nested(MAX_ATTRIBUTE_DEPTH + 1));
        raw.insert("deep_b".to_string(), json!({"x": nested(MAX_ATTRIBUTE_DEPTH)}));

        let errors = decode_attributes(&raw).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].path.starts_with("deep_a"));
        assert!(errors[1].path.starts_with("deep_b.x"));
    }

    fn attribute_value() -> impl Strategy<Value = AttributeValue> {
        let leaf = prop_oneof![
            Just(AttributeValue::Null),
            any::<bool>().prop_map(AttributeValue::Bool),
            (-(1i64 << 53)..=(1i64 << 53)).prop_map(|n| AttributeValue::Number(n as f64)),
            any::<f64>()
                .prop_filter("finite", |n| n.is_finite())
                .prop_map(AttributeValue::Number),
            "[a-z0-9 ]{0,12}".prop_map(AttributeValue::String),
        ];
        leaf.prop_recursive(6, 64, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(AttributeValue::List),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(AttributeValue::Map),
            ]
        })
    }

    proptest! {
        #[test]
        fn test_round_trip_any_value(value in attribute_value()) {
            prop_assert!(value.depth() <= MAX_ATTRIBUTE_DEPTH);
            let json = encode(&value).unwrap();
            prop_assert_eq!(decode(&json).unwrap(), value.clone());
            prop_assert_eq!(encode(&decode(&json).unwrap()).unwrap(), json);
        }

        #[test]
        fn test_round_trip_any_attribute_map(
            attrs in prop::collection::btree_map("[a-z_.]{1,10}", attribute_value(), 0..6)
        ) {
            let wire = encode_attributes(&attrs).unwrap();
            prop_assert_eq!(decode_attributes(&wire).unwrap(), attrs);
        }
    }

    #[test]
    fn test_depth() {
        assert_eq!(AttributeValue::from("a").depth(), 1);
        assert_eq!(AttributeValue::List(vec![]).depth(), 1);
        assert_eq!(decode(&json!({"a": [1, 2]})).unwrap().depth(), 3);
    }
}
