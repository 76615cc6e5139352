//! Extraction error types
//!
//! `FieldError` is recovered from: it drops one record and is reported with
//! the document's outcome. `RuleConfigError` and `ExpressionError` are load
//! time failures and stop a rule set from being built at all.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::parsing::SelectorError;

/// Why a required field was considered absent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MissingReason {
    /// The field selector matched nothing inside the candidate
    NoMatch { selector: String },
    /// Matches were found but every extracted value was empty
    EmptyValue,
    /// A nested record lacked one of its own required fields
    IncompleteNested { field: String },
}

impl std::fmt::Display for MissingReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoMatch { selector } => write!(f, "no match for '{selector}'"),
            Self::EmptyValue => f.write_str("empty value"),
            Self::IncompleteNested { field } => {
                write!(f, "nested record is missing required field '{field}'")
            }
        }
    }
}

/// A required field was missing for one candidate node
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("rule '{rule}' match #{match_index}: required field '{field}' missing ({reason})")]
pub struct FieldError {
    pub rule: String,
    pub field: String,
    /// Zero-based index of the candidate among the rule's matches
    pub match_index: usize,
    pub reason: MissingReason,
}

/// Invalid field expression (`selector [@accessor]`)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExpressionError {
    #[error(transparent)]
    Selector(#[from] SelectorError),

    #[error("invalid accessor '@{0}'")]
    Accessor(String),
}

/// Malformed rule configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("rule '{rule}'{}: {reason}", field_suffix(.field.as_deref()))]
pub struct RuleConfigError {
    pub rule: String,
    pub field: Option<String>,
    pub reason: String,
}

impl RuleConfigError {
    pub fn rule(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            field: None,
            reason: reason.into(),
        }
    }

    pub fn field(
        rule: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            rule: rule.into(),
            field: Some(field.into()),
            reason: reason.into(),
        }
    }
}

fn field_suffix(field: Option<&str>) -> String {
    field.map(|f| format!(", field '{f}'")).unwrap_or_default()
}
