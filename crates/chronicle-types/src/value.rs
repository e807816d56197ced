//! The tagged value stored under every state key.
//!
//! [`StateValue`] serializes untagged, so the persisted JSON is the plain
//! value (`42`, `"Kingdom of Ash"`, `{"gold": 10}`) rather than a wrapper
//! object.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// A value held by a state variable.
///
/// Numbers are stored as `f64`; integers round-trip exactly up to 2^53.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS)]
#[serde(untagged)]
#[ts(export, export_to = "bindings/")]
pub enum StateValue {
    /// Absence of a value. Recorded as the new value of a deletion.
    #[default]
    Null,
    /// A boolean flag.
    Bool(bool),
    /// A numeric quantity.
    Number(f64),
    /// Free text.
    Text(String),
    /// An ordered list of values.
    List(Vec<StateValue>),
    /// A structured map of named values.
    Map(BTreeMap<String, StateValue>),
}

impl StateValue {
    /// Return the numeric value, if this is a [`StateValue::Number`].
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Return the text, if this is a [`StateValue::Text`].
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Return the boolean, if this is a [`StateValue::Bool`].
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Return the map, if this is a [`StateValue::Map`].
    pub const fn as_map(&self) -> Option<&BTreeMap<String, Self>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Whether this is [`StateValue::Null`].
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<f64> for StateValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for StateValue {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<u32> for StateValue {
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<bool> for StateValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for StateValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for StateValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<StateValue>> for StateValue {
    fn from(items: Vec<Self>) -> Self {
        Self::List(items)
    }
}

impl From<BTreeMap<String, StateValue>> for StateValue {
    fn from(map: BTreeMap<String, Self>) -> Self {
        Self::Map(map)
    }
}

impl core::fmt::Display for StateValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
            Self::List(_) | Self::Map(_) => {
                let json = serde_json::to_string(self).map_err(|_e| core::fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_untagged() {
        let json = serde_json::to_string(&StateValue::from(42)).unwrap_or_default();
        assert_eq!(json, "42.0");
        let json = serde_json::to_string(&StateValue::from("ash")).unwrap_or_default();
        assert_eq!(json, "\"ash\"");
        let json = serde_json::to_string(&StateValue::Null).unwrap_or_default();
        assert_eq!(json, "null");
    }

    #[test]
    fn integers_deserialize_as_numbers() {
        let value: StateValue = serde_json::from_str("7").unwrap_or_default();
        assert_eq!(value, StateValue::Number(7.0));
    }

    #[test]
    fn nested_map_deserializes() {
        let value: StateValue =
            serde_json::from_str(r#"{"gold": 10, "flags": [true, "x"], "none": null}"#)
                .unwrap_or_default();
        let map = value.as_map().cloned().unwrap_or_default();
        assert_eq!(map.get("gold"), Some(&StateValue::Number(10.0)));
        assert_eq!(
            map.get("flags"),
            Some(&StateValue::List(vec![
                StateValue::Bool(true),
                StateValue::Text("x".to_owned())
            ]))
        );
        assert_eq!(map.get("none"), Some(&StateValue::Null));
    }

    #[test]
    fn accessors_match_variants() {
        assert_eq!(StateValue::from(2.5).as_number(), Some(2.5));
        assert_eq!(StateValue::from("x").as_number(), None);
        assert_eq!(StateValue::from(true).as_bool(), Some(true));
        assert_eq!(StateValue::from("x").as_text(), Some("x"));
        assert!(StateValue::Null.is_null());
    }

    #[test]
    fn display_renders_plain_values() {
        assert_eq!(StateValue::from(3).to_string(), "3");
        assert_eq!(StateValue::from("north").to_string(), "north");
        assert_eq!(
            StateValue::List(vec![StateValue::from(1)]).to_string(),
            "[1.0]"
        );
    }
}
