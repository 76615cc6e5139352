//! webharvest - structured web-content extraction
//!
//! Fetches documents, parses them into an arena-backed tree, applies a
//! declarative rule set to produce records, and runs all of it concurrently
//! with per-document failure isolation.
//!
//! Layers, leaf first:
//! - `domain`: identifiers, records and the `Fetcher` / `Sink` contracts
//! - `parsing`: HTML decoding, the document tree and selectors
//! - `extraction`: rules, rule sets and their JSON configuration
//! - `pipeline`: the concurrent coordinator and its observers
//! - `infrastructure`: config, logging, fetchers, sinks and reports

pub mod domain;
pub mod extraction;
pub mod infrastructure;
pub mod parsing;
pub mod pipeline;

pub use domain::{FetchError, Fetcher, Record, Sink, SinkError, SourceRef};
pub use extraction::{load_rule_set, rule_set_from_json, RuleSet};
pub use parsing::{DocumentTree, HtmlParser, Selector};
pub use pipeline::{PipelineConfig, PipelineCoordinator, PipelineOutcome, RunSummary};
