//! HTML parser
//!
//! Markup is handed to the html5ever tree builder (through `scraper`), which
//! applies the browser error-recovery rules: unclosed elements are closed in
//! document order and fragments get implicit `html`/`head`/`body` wrappers.
//! The result is then copied into our own arena `DocumentTree`, with the
//! depth limit enforced during that copy.

use encoding_rs::Encoding;
use scraper::Html;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::encoding::{self, DecodedText};
use super::error::{ParseError, ParseResult};
use super::tree::{DocumentTree, Element, Node, NodeId, TreeBuilder};
use crate::domain::RawDocument;

/// Parser behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserOptions {
    /// Maximum element nesting depth before the document is rejected
    pub max_depth: usize,

    /// Drop text nodes that contain only whitespace
    pub drop_whitespace_text: bool,

    /// Encoding used when nothing is declared or sniffed
    pub default_encoding: String,

    /// Overrides any encoding declared by the transport or the document
    pub force_encoding: Option<String>,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            max_depth: defaults::MAX_DEPTH,
            drop_whitespace_text: false,
            default_encoding: defaults::DEFAULT_ENCODING.to_string(),
            force_encoding: None,
        }
    }
}

pub mod defaults {
    /// Deep enough for any sane page, shallow enough to stop pathological nesting
    pub const MAX_DEPTH: usize = 512;

    pub const DEFAULT_ENCODING: &str = "utf-8";
}

/// Converts raw bytes into a `DocumentTree`
#[derive(Debug, Clone)]
pub struct HtmlParser {
    options: ParserOptions,
    fallback: &'static Encoding,
}

impl Default for HtmlParser {
    fn default() -> Self {
        Self {
            options: ParserOptions::default(),
            fallback: encoding_rs::UTF_8,
        }
    }
}

impl HtmlParser {
    /// Create a parser, validating the configured encodings up front
    pub fn new(options: ParserOptions) -> ParseResult<Self> {
        let fallback = encoding::usable(&options.default_encoding)
            .ok_or_else(|| ParseError::UnsupportedEncoding(options.default_encoding.clone()))?;
        if let Some(forced) = &options.force_encoding {
            encoding::usable(forced)
                .ok_or_else(|| ParseError::UnsupportedEncoding(forced.clone()))?;
        }
        Ok(Self { options, fallback })
    }

    pub fn options(&self) -> &ParserOptions {
        &self.options
    }

    /// Parse a fetched document, using its source as base URL
    pub fn parse_document(&self, raw: &RawDocument) -> ParseResult<DocumentTree> {
        let base_url = raw.source.as_url();
        self.parse_bytes(
            &raw.content,
            raw.declared_encoding.as_deref(),
            base_url.as_ref(),
        )
    }

    /// Parse raw bytes with an optional declared encoding label
    pub fn parse_bytes(
        &self,
        bytes: &[u8],
        declared_encoding: Option<&str>,
        base_url: Option<&Url>,
    ) -> ParseResult<DocumentTree> {
        if bytes.is_empty() {
            return Err(ParseError::EmptyInput);
        }

        let DecodedText {
            text,
            encoding,
            source,
            had_errors,
        } = encoding::decode(
            bytes,
            self.options.force_encoding.as_deref(),
            declared_encoding,
            self.fallback,
        )?;

        debug!(
            "Decoded {} bytes as {} (from {:?}, replacement used: {})",
            bytes.len(),
            encoding.name(),
            source,
            had_errors
        );

        self.parse_str(&text, base_url)
    }

    /// Parse already-decoded markup
    pub fn parse_str(&self, html: &str, base_url: Option<&Url>) -> ParseResult<DocumentTree> {
        if html.trim().is_empty() {
            return Err(ParseError::EmptyInput);
        }

        let document = Html::parse_document(html);
        let mut builder = TreeBuilder::new();
        let mut base_href: Option<String> = None;

        // Explicit stack instead of recursion: depth is attacker-controlled.
        let mut stack: Vec<_> = document
            .tree
            .root()
            .children()
            .rev()
            .map(|child| (child, builder.root()))
            .collect();

        while let Some((source, parent)) = stack.pop() {
            let node = match source.value() {
                scraper::Node::Element(element) => {
                    if base_href.is_none() && element.name() == "base" {
                        base_href = element.attr("href").map(str::to_string);
                    }
                    let attributes = element
                        .attrs()
                        .map(|(name, value)| (name.to_string(), value.to_string()))
                        .collect();
                    Node::Element(Element::new(element.name(), attributes))
                }
                scraper::Node::Text(text) => {
                    let text: &str = text;
                    if self.options.drop_whitespace_text && text.trim().is_empty() {
                        continue;
                    }
                    Node::Text(text.to_string())
                }
                scraper::Node::Comment(comment) => {
                    let comment: &str = comment;
                    Node::Comment(comment.to_string())
                }
                // Doctypes, processing instructions and nested document
                // markers carry nothing we extract from.
                _ => continue,
            };

            if builder.depth(parent) + 1 > self.options.max_depth {
                return Err(ParseError::MaxDepthExceeded(self.options.max_depth));
            }

            let id: NodeId = builder.append(parent, node);
            stack.extend(source.children().rev().map(|child| (child, id)));
        }

        let base_url = resolve_base(base_url, base_href.as_deref());
        let tree = builder.finish(base_url);
        debug!("Built document tree with {} nodes", tree.len());
        Ok(tree)
    }
}

/// `<base href>` overrides the fetch URL when it resolves
fn resolve_base(fetch_url: Option<&Url>, base_href: Option<&str>) -> Option<Url> {
    let from_document = base_href.and_then(|href| match fetch_url {
        Some(url) => url.join(href.trim()).ok(),
        None => Url::parse(href.trim()).ok(),
    });
    from_document.or_else(|| fetch_url.cloned())
}
