//! Tag-value decoder
//!
//! Tag values hide JSON in several layers:
//!
//! ```text
//! "prompt:{...}"              prefix + JSON
//! "\"{\\\"nodes\\\":[]}\""    JSON-encoded JSON string
//! "eJzLSM3J..."               base64(zlib(JSON))
//! ```
//!
//! [`decode_str`] peels them in that order and returns the first JSON object
//! it finds. Every stage has a size ceiling; anything over it, or anything
//! that fails to parse, is `None`. Nothing here returns an error.

use std::io::Read;

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use flate2::read::ZlibDecoder;
use serde_json::Value;

use crate::config::DecodeLimits;

const PREFIXES: &[&str] = &["workflow:", "prompt:", "makeprompt:"];

/// Strip one known payload prefix, case-insensitively, from the start.
pub fn strip_prefix(text: &str) -> &str {
    let trimmed = text.trim_start();
    for prefix in PREFIXES {
        if trimmed.len() >= prefix.len()
            && trimmed.is_char_boundary(prefix.len())
            && trimmed[..prefix.len()].eq_ignore_ascii_case(prefix)
        {
            return &trimmed[prefix.len()..];
        }
    }
    trimmed
}

/// Parse JSON, unwrapping one level of string double-encoding.
fn parse_object(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text.trim()).ok()? {
        obj @ Value::Object(_) => Some(obj),
        Value::String(inner) => match serde_json::from_str::<Value>(inner.trim()).ok()? {
            obj @ Value::Object(_) => Some(obj),
            _ => None,
        },
        _ => None,
    }
}

/// Base64 body with line breaks and other ASCII whitespace removed, when
/// the rest is standard or URL-safe alphabet.
fn compact_base64(text: &str, limits: &DecodeLimits) -> Option<String> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let valid = compact.len() >= limits.min_base64_len
        && compact
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'=' | b'-' | b'_'));
    valid.then_some(compact)
}

fn decode_base64(body: &str) -> Option<Vec<u8>> {
    STANDARD.decode(body).or_else(|_| URL_SAFE.decode(body)).ok()
}

fn has_zlib_magic(bytes: &[u8]) -> bool {
    matches!(bytes, [0x78, 0x9c, ..] | [0x78, 0xda, ..])
}

/// Inflate a zlib stream in bounded chunks, giving up past the output ceiling.
pub fn inflate_bounded(compressed: &[u8], limits: &DecodeLimits) -> Option<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut out: Vec<u8> = Vec::new();
    let mut chunk = vec![0u8; limits.inflate_chunk.max(1)];
    loop {
        let n = match decoder.read(&mut chunk) {
            Ok(0) => return Some(out),
            Ok(n) => n,
            Err(e) => {
                tracing::trace!(error = %e, "zlib inflate failed");
                return None;
            }
        };
        if out.len() + n > limits.max_inflated_len {
            tracing::trace!(limit = limits.max_inflated_len, "inflated payload over ceiling");
            return None;
        }
        out.extend_from_slice(&chunk[..n]);
    }
}

/// Decode a text tag value into a JSON object.
pub fn decode_str_with(text: &str, limits: &DecodeLimits) -> Option<Value> {
    let body = strip_prefix(text).trim();
    if body.is_empty() {
        return None;
    }
    if body.len() > limits.max_text_len {
        tracing::trace!(len = body.len(), "tag value over size ceiling");
        return None;
    }

    if let Some(obj) = parse_object(body) {
        return Some(obj);
    }

    let raw = decode_base64(&compact_base64(body, limits)?)?;
    let bytes = if has_zlib_magic(&raw) {
        inflate_bounded(&raw, limits)?
    } else {
        raw
    };
    if bytes.len() > limits.max_inflated_len {
        return None;
    }
    let text = String::from_utf8_lossy(&bytes);
    parse_object(strip_prefix(&text))
}

pub fn decode_str(text: &str) -> Option<Value> {
    decode_str_with(text, &DecodeLimits::default())
}

/// Decode raw tag bytes (lossy UTF-8).
pub fn decode_bytes(bytes: &[u8]) -> Option<Value> {
    let limits = DecodeLimits::default();
    if bytes.len() > limits.max_text_len {
        return None;
    }
    decode_str_with(&String::from_utf8_lossy(bytes), &limits)
}

/// Decode any tag value: objects pass through, strings are decoded, lists
/// yield their first decodable element.
pub fn decode_value(value: &Value) -> Option<Value> {
    match value {
        Value::Object(_) => Some(value.clone()),
        Value::String(s) => decode_str(s),
        Value::Array(items) => items.iter().find_map(decode_value),
        _ => None,
    }
}
