//! Parsing error types
//!
//! `ParseError` is terminal for one document. `SelectorError` only happens
//! while a rule set is being loaded.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseError {
    #[error("document is empty")]
    EmptyInput,

    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("nesting deeper than {0} levels")]
    MaxDepthExceeded(usize),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid selector '{selector}' at {position}: {reason}")]
pub struct SelectorError {
    pub selector: String,
    pub position: usize,
    pub reason: String,
}

impl SelectorError {
    pub fn new(selector: &str, position: usize, reason: impl Into<String>) -> Self {
        Self {
            selector: selector.to_string(),
            position,
            reason: reason.into(),
        }
    }
}

pub type ParseResult<T> = Result<T, ParseError>;
