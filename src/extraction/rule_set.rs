//! Rule sets
//!
//! Applies every rule to one document and merges the results. Rule order is
//! kept, and within a rule the records follow the document order of the
//! matched nodes. A record missing a required field is dropped on its own;
//! the rest of the document's records are unaffected.

use std::collections::HashSet;

use tracing::debug;

use super::error::{FieldError, RuleConfigError};
use super::rule::ExtractionRule;
use crate::domain::Record;
use crate::parsing::DocumentTree;

/// Records and field errors produced from one document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub records: Vec<Record>,
    pub errors: Vec<FieldError>,
}

impl Extraction {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Ordered collection of extraction rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<ExtractionRule>,
}

impl RuleSet {
    /// Build a rule set; rule names must be non-empty and unique
    pub fn new(rules: Vec<ExtractionRule>) -> Result<Self, RuleConfigError> {
        let mut seen = HashSet::new();
        for rule in &rules {
            if rule.name().trim().is_empty() {
                return Err(RuleConfigError::rule(rule.name(), "rule name is empty"));
            }
            if !seen.insert(rule.name()) {
                return Err(RuleConfigError::rule(rule.name(), "duplicate rule name"));
            }
            if rule.fields().is_empty() {
                return Err(RuleConfigError::rule(rule.name(), "rule has no fields"));
            }
        }
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[ExtractionRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply every rule to `tree`
    pub fn apply(&self, tree: &DocumentTree) -> Extraction {
        let mut extraction = Extraction::default();

        for rule in &self.rules {
            let before = extraction.records.len();
            for (match_index, candidate) in rule.candidates(tree).enumerate() {
                match rule.build_record(tree, candidate) {
                    Ok(record) => extraction.records.push(record),
                    Err((field, reason)) => extraction.errors.push(FieldError {
                        rule: rule.name().to_string(),
                        field,
                        match_index,
                        reason,
                    }),
                }
            }
            debug!(
                "Rule '{}' produced {} records",
                rule.name(),
                extraction.records.len() - before
            );
        }

        extraction
    }
}
