//! Extracted records
//!
//! A record is one structured output unit: a mapping from field name to an
//! extracted value, tagged with the rule that produced it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field name → value, ordered by field name
pub type FieldMap = BTreeMap<String, FieldValue>;

/// Value of one extracted field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Text(String),
    List(Vec<String>),
    Nested(FieldMap),
    NestedList(Vec<FieldMap>),
}

impl FieldValue {
    /// Whether the value counts as "absent" for required-field checks
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(text) => text.is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Nested(_) => false,
            Self::NestedList(items) => items.is_empty(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

/// One record produced by one rule match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub rule: String,
    pub fields: FieldMap,
}

impl Record {
    pub fn new(rule: impl Into<String>, fields: FieldMap) -> Self {
        Self {
            rule: rule.into(),
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_text)
    }
}
