//! String-keyed attribute maps with typed accessors.
//!
//! Lookups never fail: a missing key or a value of another type reads as `None` and the
//! caller decides how to coerce.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<AttrValue>),
    Map(BTreeMap<String, AttrValue>),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Converts a JSON value. `null` has no attribute representation.
    pub fn from_json(value: serde_json::Value) -> Option<AttrValue> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(value) => Some(AttrValue::Bool(value)),
            serde_json::Value::Number(value) => value.as_f64().map(AttrValue::Number),
            serde_json::Value::String(value) => Some(AttrValue::String(value)),
            serde_json::Value::Array(values) => Some(AttrValue::List(
                values.into_iter().filter_map(AttrValue::from_json).collect(),
            )),
            serde_json::Value::Object(values) => Some(AttrValue::Map(
                values
                    .into_iter()
                    .filter_map(|(key, value)| AttrValue::from_json(value).map(|value| (key, value)))
                    .collect(),
            )),
        }
    }

    pub fn estimate_memory_usage_bytes(&self) -> u64 {
        let own = std::mem::size_of::<AttrValue>() as u64;
        match self {
            AttrValue::Bool(_) | AttrValue::Number(_) => own,
            AttrValue::String(value) => own + value.len() as u64,
            AttrValue::List(values) => {
                own + values.iter().map(AttrValue::estimate_memory_usage_bytes).sum::<u64>()
            }
            AttrValue::Map(values) => {
                own + values
                    .iter()
                    .map(|(key, value)| key.len() as u64 + value.estimate_memory_usage_bytes())
                    .sum::<u64>()
            }
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::String(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::String(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Number(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Number(value as f64)
    }
}

impl From<i32> for AttrValue {
    fn from(value: i32) -> Self {
        AttrValue::Number(f64::from(value))
    }
}

impl From<u32> for AttrValue {
    fn from(value: u32) -> Self {
        AttrValue::Number(f64::from(value))
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl<T: Into<AttrValue>> From<Vec<T>> for AttrValue {
    fn from(values: Vec<T>) -> Self {
        AttrValue::List(values.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attributes(BTreeMap<String, AttrValue>);

impl Attributes {
    pub fn new() -> Self {
        Attributes::default()
    }

    /// Builds a map of OSM tags, every value stored as a string.
    pub fn from_tags<K, V, I>(tags: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Attributes(
            tags.into_iter()
                .map(|(key, value)| (key.into(), AttrValue::String(value.into())))
                .collect(),
        )
    }

    pub fn from_json(properties: serde_json::Map<String, serde_json::Value>) -> Self {
        Attributes(
            properties
                .into_iter()
                .filter_map(|(key, value)| AttrValue::from_json(value).map(|value| (key, value)))
                .collect(),
        )
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<AttrValue> {
        self.0.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(AttrValue::as_str)
    }

    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(AttrValue::as_f64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(AttrValue::as_bool)
    }

    pub fn get_list(&self, key: &str) -> Option<&[AttrValue]> {
        match self.get(key) {
            Some(AttrValue::List(values)) => Some(values),
            _ => None,
        }
    }

    pub fn get_map(&self, key: &str) -> Option<&BTreeMap<String, AttrValue>> {
        match self.get(key) {
            Some(AttrValue::Map(values)) => Some(values),
            _ => None,
        }
    }

    /// True when the string value of `key` equals `value`.
    pub fn has(&self, key: &str, value: &str) -> bool {
        self.get_string(key) == Some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn estimate_memory_usage_bytes(&self) -> u64 {
        self.0
            .iter()
            .map(|(key, value)| key.len() as u64 + value.estimate_memory_usage_bytes())
            .sum()
    }
}

impl<K: Into<String>, V: Into<AttrValue>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Attributes(iter.into_iter().map(|(key, value)| (key.into(), value.into())).collect())
    }
}

impl IntoIterator for Attributes {
    type Item = (String, AttrValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, AttrValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
