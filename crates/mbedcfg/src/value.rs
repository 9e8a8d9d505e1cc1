//! value representation
//!
//! Configuration documents are loosely typed JSON. Values that flow through the
//! resolver are narrowed to the following types:
//! - boolean (true/false) - only until a value becomes a config setting, see [build_setting_value]
//! - integer (signed, i64)
//! - decimal (f64)
//! - string (utf-8)
//! - set (unordered collection of strings, built from JSON lists)
//! - object (order-preserving "map", where the key is of type string)
//! - null (a setting that is declared but has no value)
//!
//! Lists are never ordered: documents express multi-valued settings as lists but
//! the resolver only ever treats them as sets. Non-string list elements are kept
//! as their compact JSON text.
use serde::{ser::SerializeMap, ser::SerializeSeq, Serializer};
use std::collections::BTreeSet;

/// All possible value types
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Decimal(f64),
    String(String),
    Set(BTreeSet<String>),
    Object(indexmap::IndexMap<String, Value>),
}

impl Value {
    /// View this value as a set of strings
    ///
    /// Scalars become a single element set, `null` becomes the empty set.
    pub fn into_set(self) -> BTreeSet<String> {
        match self {
            Value::Set(set) => set,
            Value::Null => BTreeSet::new(),
            Value::String(s) => BTreeSet::from([s]),
            other => BTreeSet::from([other.to_string()]),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// Normalize a value that is about to become the value of a config setting
///
/// Booleans are stored as integers (`true` -> 1, `false` -> 0). Everything else is kept as is.
pub fn build_setting_value(value: Value) -> Value {
    match value {
        Value::Boolean(b) => Value::Integer(i64::from(b)),
        other => other,
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl<T: Into<String>> FromIterator<T> for Value {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Value::Set(iter.into_iter().map(Into::into).collect())
    }
}

impl From<&serde_json::Number> for Value {
    fn from(value: &serde_json::Number) -> Self {
        if let Some(int) = value.as_i64() {
            return Value::Integer(int);
        }

        // u64 beyond i64::MAX and actual floats
        Value::Decimal(value.as_f64().unwrap_or(f64::NAN))
    }
}

impl From<&serde_json::Value> for Value {
    fn from(value: &serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match value {
            Json::Null => Value::Null,
            Json::Bool(b) => (*b).into(),
            Json::Number(n) => n.into(),
            Json::String(s) => s.as_str().into(),
            Json::Array(array) => Value::Set(array.iter().map(set_element).collect()),
            Json::Object(object) => Value::Object(
                object
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.into()))
                    .collect(),
            ),
        }
    }
}

fn set_element(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Renders the value the way it appears on the right hand side of a compiler definition
impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Boolean(b) => write!(f, "{}", i64::from(*b)),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::String(s) => f.write_str(s),
            Value::Set(set) => {
                let joined: Vec<&str> = set.iter().map(String::as_str).collect();
                f.write_str(&joined.join(","))
            }
            Value::Object(object) => {
                let json = serde_json::to_string(object).map_err(|_| std::fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

impl serde::ser::Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Boolean(value) => serializer.serialize_bool(*value),
            Value::Integer(value) => serializer.serialize_i64(*value),
            Value::Decimal(value) => serializer.serialize_f64(*value),
            Value::String(value) => serializer.serialize_str(value),
            Value::Set(value) => {
                let mut ser = serializer.serialize_seq(Some(value.len()))?;
                for element in value {
                    ser.serialize_element(element)?;
                }
                ser.end()
            }
            Value::Object(value) => {
                let mut ser = serializer.serialize_map(Some(value.len()))?;
                for (element_key, element_value) in value {
                    ser.serialize_entry(element_key, element_value)?;
                }
                ser.end()
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn lists_become_sets() {
        let value = Value::from(&json!(["b", "a", "b", 3, [0, 1024]]));
        assert_eq!(value, ["3", "[0,1024]", "a", "b"].into_iter().collect::<Value>());
        assert_eq!(value.to_string(), "3,[0,1024],a,b");
    }

    #[test]
    fn numbers() {
        assert_eq!(Value::from(&json!(42)), Value::Integer(42));
        assert_eq!(Value::from(&json!(-1)), Value::Integer(-1));
        assert_eq!(Value::from(&json!(0.5)), Value::Decimal(0.5));
    }

    #[test]
    fn booleans_are_kept_until_they_become_settings() {
        let value = Value::from(&json!(true));
        assert_eq!(value, Value::Boolean(true));
        assert_eq!(build_setting_value(value), Value::Integer(1));
        assert_eq!(build_setting_value(false.into()), Value::Integer(0));
        assert_eq!(build_setting_value("x".into()), Value::from("x"));
    }

    #[test]
    fn into_set() {
        assert_eq!(Value::from("X").into_set(), BTreeSet::from(["X".to_string()]));
        assert_eq!(Value::Integer(7).into_set(), BTreeSet::from(["7".to_string()]));
        assert!(Value::Null.into_set().is_empty());
    }

    #[test]
    fn display_null_is_empty() {
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::from("\"quoted\"").to_string(), "\"quoted\"");
    }
}
