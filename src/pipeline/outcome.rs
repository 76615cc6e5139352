//! Per-document outcomes and run summaries

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use super::state::{DocumentState, TransitionError};
use crate::domain::{FetchError, SinkError, SourceRef};
use crate::extraction::FieldError;
use crate::parsing::ParseError;

/// Pipeline stage, for timeout reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Fetch,
    Parse,
    Extract,
    Emit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fetch => "fetch",
            Self::Parse => "parse",
            Self::Extract => "extract",
            Self::Emit => "emit",
        };
        f.write_str(name)
    }
}

/// Why a document failed
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("parse failed: {0}")]
    Parse(#[from] ParseError),

    #[error("emit failed: {0}")]
    Sink(#[from] SinkError),

    #[error("{0} stage timed out")]
    StageTimeout(Stage),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<TransitionError> for PipelineError {
    fn from(err: TransitionError) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Terminal result for one source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineOutcome {
    Success(usize),
    PartialFailure {
        records: usize,
        errors: Vec<FieldError>,
    },
    Failure(PipelineError),
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, Self::PartialFailure { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    pub fn record_count(&self) -> usize {
        match self {
            Self::Success(count) | Self::PartialFailure { records: count, .. } => *count,
            Self::Failure(_) => 0,
        }
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match self {
            Self::Failure(err) => Some(err),
            _ => None,
        }
    }
}

/// What happened to one source during a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentReport {
    pub source: SourceRef,
    pub outcome: PipelineOutcome,
    pub final_state: DocumentState,
    pub elapsed: Duration,
    /// New in-scope links submitted from this document
    pub links_discovered: usize,
}

/// Result of one coordinator run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub reports: Vec<DocumentReport>,
    pub elapsed: Duration,
    /// Most documents in flight at the same time
    pub peak_in_flight: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.reports.len()
    }

    pub fn success_count(&self) -> usize {
        self.reports.iter().filter(|r| r.outcome.is_success()).count()
    }

    pub fn partial_count(&self) -> usize {
        self.reports.iter().filter(|r| r.outcome.is_partial()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.reports.iter().filter(|r| r.outcome.is_failure()).count()
    }

    pub fn record_count(&self) -> usize {
        self.reports.iter().map(|r| r.outcome.record_count()).sum()
    }

    pub fn report_for(&self, source: &SourceRef) -> Option<&DocumentReport> {
        self.reports.iter().find(|r| &r.source == source)
    }

    pub fn failures(&self) -> impl Iterator<Item = &DocumentReport> {
        self.reports.iter().filter(|r| r.outcome.is_failure())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::MissingReason;

    fn report(source: &str, outcome: PipelineOutcome) -> DocumentReport {
        let final_state = if outcome.is_failure() {
            DocumentState::Failed
        } else {
            DocumentState::Done
        };
        DocumentReport {
            source: SourceRef::new(source),
            outcome,
            final_state,
            elapsed: Duration::from_millis(5),
            links_discovered: 0,
        }
    }

    #[test]
    fn summary_counts_each_outcome_kind() {
        let summary = RunSummary {
            run_id: Uuid::new_v4(),
            reports: vec![
                report("a", PipelineOutcome::Success(3)),
                report(
                    "b",
                    PipelineOutcome::PartialFailure {
                        records: 1,
                        errors: vec![FieldError {
                            rule: "r".into(),
                            field: "f".into(),
                            match_index: 0,
                            reason: MissingReason::EmptyValue,
                        }],
                    },
                ),
                report("c", PipelineOutcome::Failure(FetchError::Timeout.into())),
            ],
            elapsed: Duration::from_secs(1),
            peak_in_flight: 2,
        };

        assert_eq!(summary.total(), 3);
        assert_eq!(summary.success_count(), 1);
        assert_eq!(summary.partial_count(), 1);
        assert_eq!(summary.failure_count(), 1);
        assert_eq!(summary.record_count(), 4);
        assert_eq!(
            summary.report_for(&SourceRef::new("c")).and_then(|r| r.outcome.error()),
            Some(&PipelineError::Fetch(FetchError::Timeout))
        );
    }

    #[test]
    fn errors_read_naturally() {
        assert_eq!(
            PipelineError::StageTimeout(Stage::Extract).to_string(),
            "extract stage timed out"
        );
        assert_eq!(
            PipelineError::from(FetchError::NotFound).to_string(),
            "fetch failed: document not found"
        );
    }
}
