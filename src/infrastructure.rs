//! Infrastructure layer - configuration, logging and collaborator implementations
//!
//! Everything here talks to the outside world (network, filesystem, stdout)
//! and plugs into the pipeline through the domain traits.

pub mod config; // Layered application configuration
pub mod file_fetcher; // Local files and scheme routing
pub mod http_client; // Rate-limited HTTP fetcher
pub mod logging; // tracing subscriber setup
pub mod report_writer; // Plain-text run report
pub mod sinks; // JSON-lines and in-memory sinks

pub use config::{AppConfig, ConfigManager, HttpConfig, LoggingConfig};
pub use file_fetcher::{DefaultFetcher, FileFetcher};
pub use http_client::HttpFetcher;
pub use logging::{init_logging, init_logging_with_config};
pub use report_writer::ReportWriter;
pub use sinks::{JsonLinesSink, MemorySink};
