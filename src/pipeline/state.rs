//! Per-document state machine

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Where one document is in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentState {
    Queued,
    Fetching,
    Parsing,
    Extracting,
    Emitting,
    Done,
    Failed,
}

impl DocumentState {
    fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Fetching => 1,
            Self::Parsing => 2,
            Self::Extracting => 3,
            Self::Emitting => 4,
            Self::Done | Self::Failed => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Dequeued but not finished
    pub fn is_in_flight(self) -> bool {
        !self.is_terminal() && self != Self::Queued
    }

    /// Forward-only; skipping stages is allowed, going back is not
    pub fn can_transition_to(self, next: Self) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::Fetching => "fetching",
            Self::Parsing => "parsing",
            Self::Extracting => "extracting",
            Self::Emitting => "emitting",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("illegal state transition {from} -> {to}")]
pub struct TransitionError {
    pub from: DocumentState,
    pub to: DocumentState,
}

/// Tracks one document's state
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: DocumentState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: DocumentState::Queued,
        }
    }

    pub fn state(&self) -> DocumentState {
        self.state
    }

    pub fn advance(&mut self, next: DocumentState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}
