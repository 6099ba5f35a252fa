//! PNG chunk reader
//!
//! Reads `IHDR` dimensions, the text chunks (`tEXt`, `zTXt`, `iTXt`,
//! compressed or not) and an `eXIf` block. Image data is skipped without
//! being buffered.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use serde_json::{Map, Value};

use super::exif::parse_exif;
use super::{ProbeError, ProbeOutput};
use crate::config::DecodeLimits;
use crate::extract::decode::inflate_bounded;

pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PngInfo {
    /// keyword -> text, first occurrence wins
    pub text: Map<String, Value>,
    pub exif: Map<String, Value>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl PngInfo {
    /// Text chunks and EXIF tags merged into one container; text chunks win.
    pub fn into_probe_output(self) -> ProbeOutput {
        let mut container = self.text;
        for (k, v) in self.exif {
            container.entry(k).or_insert(v);
        }
        ProbeOutput {
            exif: Value::Object(container),
            width: self.width,
            height: self.height,
            ..ProbeOutput::default()
        }
    }
}

fn split_keyword(data: &[u8]) -> Option<(String, &[u8])> {
    let nul = data.iter().position(|&b| b == 0)?;
    let keyword = String::from_utf8_lossy(&data[..nul]).to_string();
    if keyword.is_empty() {
        return None;
    }
    Some((keyword, &data[nul + 1..]))
}

/// `keyword\0text`
fn parse_text(data: &[u8]) -> Option<(String, String)> {
    let (keyword, text) = split_keyword(data)?;
    Some((keyword, String::from_utf8_lossy(text).to_string()))
}

/// `keyword\0method compressed-text`
fn parse_ztxt(data: &[u8], limits: &DecodeLimits) -> Option<(String, String)> {
    let (keyword, rest) = split_keyword(data)?;
    let (&method, compressed) = rest.split_first()?;
    if method != 0 {
        return None;
    }
    let text = inflate_bounded(compressed, limits)?;
    Some((keyword, String::from_utf8_lossy(&text).to_string()))
}

/// `keyword\0 flag method language\0 translated\0 text`
fn parse_itxt(data: &[u8], limits: &DecodeLimits) -> Option<(String, String)> {
    let (keyword, rest) = split_keyword(data)?;
    let (&compressed, rest) = rest.split_first()?;
    let (_method, rest) = rest.split_first()?;
    let lang_end = rest.iter().position(|&b| b == 0)?;
    let rest = &rest[lang_end + 1..];
    let translated_end = rest.iter().position(|&b| b == 0)?;
    let text = &rest[translated_end + 1..];

    let text = if compressed == 1 {
        String::from_utf8_lossy(&inflate_bounded(text, limits)?).to_string()
    } else {
        String::from_utf8_lossy(text).to_string()
    };
    Some((keyword, text))
}

fn skip<R: Read>(reader: &mut R, n: u64) -> io::Result<u64> {
    io::copy(&mut reader.take(n), &mut io::sink())
}

/// Read a PNG stream. A bad signature is an error; a truncated or damaged
/// chunk stream ends the read and keeps what was collected.
pub fn read_png_from<R: Read>(mut reader: R) -> Result<PngInfo, ProbeError> {
    let limits = DecodeLimits::default();
    let mut sig = [0u8; 8];
    reader.read_exact(&mut sig)?;
    if sig != PNG_SIGNATURE {
        return Err(ProbeError::malformed("png", "bad signature"));
    }

    let mut info = PngInfo::default();
    loop {
        let mut header = [0u8; 8];
        if reader.read_exact(&mut header).is_err() {
            break;
        }
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let kind = [header[4], header[5], header[6], header[7]];

        let wanted = matches!(&kind, b"IHDR" | b"tEXt" | b"zTXt" | b"iTXt" | b"eXIf");
        if &kind == b"IEND" {
            break;
        }
        if !wanted || len > limits.max_text_len {
            if skip(&mut reader, len as u64 + 4)? < len as u64 + 4 {
                break;
            }
            continue;
        }

        let mut data = vec![0u8; len];
        if reader.read_exact(&mut data).is_err() {
            tracing::debug!(chunk = %String::from_utf8_lossy(&kind), "truncated png chunk");
            break;
        }
        let mut crc = [0u8; 4];
        let _ = reader.read_exact(&mut crc);

        let entry = match &kind {
            b"IHDR" if data.len() >= 8 => {
                info.width = Some(u32::from_be_bytes([data[0], data[1], data[2], data[3]]));
                info.height = Some(u32::from_be_bytes([data[4], data[5], data[6], data[7]]));
                None
            }
            b"tEXt" => parse_text(&data),
            b"zTXt" => parse_ztxt(&data, &limits),
            b"iTXt" => parse_itxt(&data, &limits),
            b"eXIf" => {
                info.exif = parse_exif(&data);
                None
            }
            _ => None,
        };
        if let Some((keyword, text)) = entry {
            info.text.entry(keyword).or_insert(Value::String(text));
        }
    }
    Ok(info)
}

pub fn read_png(path: &Path) -> Result<PngInfo, ProbeError> {
    let file = File::open(path)?;
    read_png_from(BufReader::new(file))
}
