//! Service-independent item model.
//!
//! An [`Item`] is an ordered mapping from attribute name to [`ItemValue`].
//! Attribute order is the key order of the map, so the same item always
//! renders the same way.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One stored item, or the key of one.
pub type Item = BTreeMap<String, ItemValue>;

/// Tagged attribute value as the table service stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ItemValue {
    S(String),
    /// Numbers travel as their decimal text to keep full precision
    N(String),
    B(Vec<u8>),
    Bool(bool),
    Null,
    L(Vec<ItemValue>),
    M(BTreeMap<String, ItemValue>),
    Ss(Vec<String>),
    Ns(Vec<String>),
    Bs(Vec<Vec<u8>>),
}

impl ItemValue {
    pub fn string(value: impl Into<String>) -> Self {
        ItemValue::S(value.into())
    }

    pub fn number(value: impl ToString) -> Self {
        ItemValue::N(value.to_string())
    }

    /// Canonical JSON rendering. Maps come out with sorted keys.
    pub fn to_json(&self) -> JsonValue {
        match self {
            ItemValue::S(s) => JsonValue::String(s.clone()),
            ItemValue::N(n) => number_json(n),
            ItemValue::B(b) => JsonValue::String(hex::encode(b)),
            ItemValue::Bool(b) => JsonValue::Bool(*b),
            ItemValue::Null => JsonValue::Null,
            ItemValue::L(items) => JsonValue::Array(items.iter().map(ItemValue::to_json).collect()),
            ItemValue::M(map) => JsonValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            ItemValue::Ss(items) => {
                JsonValue::Array(items.iter().cloned().map(JsonValue::String).collect())
            }
            ItemValue::Ns(items) => JsonValue::Array(items.iter().map(|n| number_json(n)).collect()),
            ItemValue::Bs(items) => JsonValue::Array(
                items
                    .iter()
                    .map(|b| JsonValue::String(hex::encode(b)))
                    .collect(),
            ),
        }
    }

    /// Text of a CSV cell. Scalars are written as-is, composites as canonical JSON.
    pub fn to_field(&self, null_sentinel: Option<&str>) -> String {
        match self {
            ItemValue::S(s) => s.clone(),
            ItemValue::N(n) => n.clone(),
            ItemValue::B(b) => hex::encode(b),
            ItemValue::Bool(b) => b.to_string(),
            ItemValue::Null => null_sentinel.unwrap_or_default().to_string(),
            composite => composite.to_json().to_string(),
        }
    }
}

fn number_json(text: &str) -> JsonValue {
    serde_json::from_str::<serde_json::Number>(text)
        .map(JsonValue::Number)
        .unwrap_or_else(|_| JsonValue::String(text.to_string()))
}

/// Canonical JSON text of a whole item, used to name keys in reports.
pub fn describe(item: &Item) -> String {
    JsonValue::Object(
        item.iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
    .to_string()
}

/// Partition key and optional sort key of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySchema {
    pub partition_key: String,
    pub sort_key: Option<String>,
}

impl KeySchema {
    pub fn new(partition_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            sort_key: None,
        }
    }

    pub fn with_sort_key(mut self, sort_key: impl Into<String>) -> Self {
        self.sort_key = Some(sort_key.into());
        self
    }

    /// Key attribute names, partition key first.
    pub fn attributes(&self) -> Vec<String> {
        std::iter::once(self.partition_key.clone())
            .chain(self.sort_key.clone())
            .collect()
    }

    /// The key of `item`, or `None` when a key attribute is missing.
    pub fn extract_key(&self, item: &Item) -> Option<Item> {
        self.attributes()
            .into_iter()
            .map(|name| item.get(&name).cloned().map(|value| (name, value)))
            .collect()
    }
}
