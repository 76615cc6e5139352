//! Character encoding resolution and decoding
//!
//! Resolution order: forced label > transport-declared label > `<meta>`
//! declaration > byte-order mark > fallback. Decoding never fails on bad
//! bytes; they become U+FFFD.

use encoding_rs::{Encoding, REPLACEMENT, UTF_8, UTF_16BE, UTF_16LE};
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

use super::error::{ParseError, ParseResult};

/// How far into the document the meta prescan looks
const META_PRESCAN_BYTES: usize = 1024;

static META_CHARSET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<meta\b[^>]*?\bcharset\s*=\s*["']?\s*([a-z0-9_:.\-]+)"#)
        .expect("meta charset pattern is valid")
});

/// Where the chosen encoding came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingSource {
    Forced,
    Declared,
    Meta,
    ByteOrderMark,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedText {
    pub text: String,
    pub encoding: &'static Encoding,
    pub source: EncodingSource,
    /// True when malformed sequences were replaced
    pub had_errors: bool,
}

/// Look up a label the way browsers do
pub fn lookup(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
}

/// Like `lookup`, but refuses the `replacement` encoding
pub fn usable(label: &str) -> Option<&'static Encoding> {
    lookup(label).filter(|enc| *enc != REPLACEMENT)
}

/// Find a `<meta charset>` or `http-equiv` charset in the document head
pub fn sniff_meta(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = &bytes[..bytes.len().min(META_PRESCAN_BYTES)];
    let head = String::from_utf8_lossy(head);
    let label = META_CHARSET.captures(&head)?.get(1)?.as_str().to_string();

    let encoding = usable(&label)?;
    // A meta tag readable as ASCII cannot really be UTF-16.
    if encoding == UTF_16LE || encoding == UTF_16BE {
        return Some(UTF_8);
    }
    Some(encoding)
}

/// Decide on an encoding and decode `bytes` with it
///
/// `forced` comes from the caller and must name a known encoding. `declared`
/// comes from the transport; an unknown declared or meta label is ignored
/// and resolution falls through to the next step.
pub fn decode(
    bytes: &[u8],
    forced: Option<&str>,
    declared: Option<&str>,
    fallback: &'static Encoding,
) -> ParseResult<DecodedText> {
    let bom = Encoding::for_bom(bytes);
    let forced = forced.map(str::trim).filter(|l| !l.is_empty());

    let (encoding, source) = if let Some(label) = forced {
        let enc = usable(label)
            .ok_or_else(|| ParseError::UnsupportedEncoding(label.to_string()))?;
        (enc, EncodingSource::Forced)
    } else if let Some(enc) = declared.and_then(usable) {
        (enc, EncodingSource::Declared)
    } else if let Some(enc) = sniff_meta(bytes) {
        (enc, EncodingSource::Meta)
    } else if let Some((enc, _)) = bom {
        (enc, EncodingSource::ByteOrderMark)
    } else {
        (fallback, EncodingSource::Fallback)
    };

    let body = match bom {
        Some((bom_encoding, bom_len)) if bom_encoding == encoding => &bytes[bom_len..],
        _ => bytes,
    };

    let (text, had_errors) = encoding.decode_without_bom_handling(body);
    let text = match text {
        Cow::Borrowed(s) => s.to_string(),
        Cow::Owned(s) => s,
    };

    Ok(DecodedText {
        text,
        encoding,
        source,
        had_errors,
    })
}
