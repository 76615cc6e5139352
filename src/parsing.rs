//! Parsing layer: bytes to `DocumentTree`, and structural selectors over it
//!
//! Everything here is synchronous and CPU-bound; the pipeline runs it on the
//! blocking pool.

pub mod encoding;
pub mod error;
pub mod parser;
pub mod selector;
pub mod tree;

pub use encoding::{DecodedText, EncodingSource};
pub use error::{ParseError, ParseResult, SelectorError};
pub use parser::{HtmlParser, ParserOptions};
pub use selector::{Matches, Selector};
pub use tree::{DocumentTree, Element, Node, NodeId};
