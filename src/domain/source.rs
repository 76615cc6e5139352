//! Source identifiers and raw fetched documents
//!
//! A `SourceRef` names one document to process; a `RawDocument` is what a
//! fetcher hands back for it before any parsing happens.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Opaque, immutable identifier for one document (usually a URL)
///
/// Cloning is cheap: the string is shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceRef(Arc<str>);

impl SourceRef {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref().trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse the identifier as an absolute URL, if it is one
    pub fn as_url(&self) -> Option<url::Url> {
        url::Url::parse(&self.0).ok()
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SourceRef {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Raw bytes plus transport metadata for one document
///
/// Owned by the parser while it is converted and dropped afterwards.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub source: SourceRef,
    pub content: Vec<u8>,
    /// Encoding label declared by the transport (e.g. the `charset` parameter of Content-Type)
    pub declared_encoding: Option<String>,
    /// Media type without parameters, lower-cased (e.g. `text/html`)
    pub content_type: Option<String>,
    /// Transport status code, when the transport has one
    pub status: Option<u16>,
}

impl RawDocument {
    pub fn new(source: SourceRef, content: impl Into<Vec<u8>>) -> Self {
        Self {
            source,
            content: content.into(),
            declared_encoding: None,
            content_type: None,
            status: None,
        }
    }

    pub fn with_content_type(mut self, content_type: &str) -> Self {
        let (media_type, charset) = split_content_type(content_type);
        self.content_type = Some(media_type);
        if self.declared_encoding.is_none() {
            self.declared_encoding = charset;
        }
        self
    }

    pub fn with_encoding(mut self, label: impl Into<String>) -> Self {
        self.declared_encoding = Some(label.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// True unless the transport told us this is something other than HTML
    pub fn is_html(&self) -> bool {
        match self.content_type.as_deref() {
            None | Some("") => true,
            Some(media_type) => {
                media_type == "text/html"
                    || media_type == "application/xhtml+xml"
                    || media_type.ends_with("+html")
            }
        }
    }
}

/// Split a Content-Type header value into its media type and `charset` parameter
pub fn split_content_type(value: &str) -> (String, Option<String>) {
    let mut parts = value.split(';');
    let media_type = parts
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let charset = parts.find_map(|param| {
        let (key, val) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("charset") {
            let val = val.trim().trim_matches(|c| c == '"' || c == '\'');
            (!val.is_empty()).then(|| val.to_string())
        } else {
            None
        }
    });

    (media_type, charset)
}
