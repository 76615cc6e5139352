//! Collaborator contracts
//!
//! The pipeline only knows about fetching and emitting through these traits.
//! Transport and storage implementations live in the infrastructure layer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::record::Record;
use super::source::{RawDocument, SourceRef};

/// Failure reported by a fetcher
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchError {
    #[error("fetch timed out")]
    Timeout,

    #[error("document not found")]
    NotFound,

    #[error("transport error: {0}")]
    Transport(String),
}

impl FetchError {
    pub fn transport(reason: impl std::fmt::Display) -> Self {
        Self::Transport(reason.to_string())
    }
}

/// Failure reported by a sink
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("sink '{sink}' failed: {reason}")]
pub struct SinkError {
    pub sink: String,
    pub reason: String,
}

impl SinkError {
    pub fn new(sink: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self {
            sink: sink.into(),
            reason: reason.to_string(),
        }
    }
}

/// Supplies raw document bytes for a source
///
/// Retries and redirects, if any, are the implementation's business.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, source: &SourceRef) -> Result<RawDocument, FetchError>;
}

/// Consumes the records extracted from one document
///
/// Must be safe to call concurrently from several workers.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn emit(&self, source: &SourceRef, records: Vec<Record>) -> Result<(), SinkError>;

    /// Flush any buffered output; called once after a run
    async fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
