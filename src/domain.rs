//! Domain module - core data and collaborator contracts
//!
//! Contains the identifiers, records and traits every other layer speaks in.
//! Nothing in here does I/O.

pub mod record;
pub mod services;
pub mod source;

pub use record::{FieldMap, FieldValue, Record};
pub use services::{FetchError, Fetcher, Sink, SinkError};
pub use source::{RawDocument, SourceRef};
