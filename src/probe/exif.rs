//! Minimal TIFF/EXIF reader
//!
//! Only the text-carrying tags exporters use for generation metadata are
//! read: IFD0 `ImageDescription`, `Make`, `Model`, `Software`, `Artist`,
//! `XPComment`, and the Exif sub-IFD `UserComment`. Every offset is bounds
//! checked; a malformed block yields whatever was read before the damage.

use std::collections::HashSet;

use serde_json::{Map, Value};

const TAG_IMAGE_DESCRIPTION: u16 = 0x010E;
const TAG_MAKE: u16 = 0x010F;
const TAG_MODEL: u16 = 0x0110;
const TAG_SOFTWARE: u16 = 0x0131;
const TAG_ARTIST: u16 = 0x013B;
const TAG_EXIF_IFD: u16 = 0x8769;
const TAG_XP_COMMENT: u16 = 0x9C9C;
const TAG_USER_COMMENT: u16 = 0x9286;

const TYPE_BYTE: u16 = 1;
const TYPE_ASCII: u16 = 2;
const TYPE_LONG: u16 = 4;
const TYPE_UNDEFINED: u16 = 7;

/// Entries read per IFD at most
const MAX_IFD_ENTRIES: usize = 512;

#[derive(Debug, Clone, Copy)]
enum ByteOrder {
    Little,
    Big,
}

struct Tiff<'a> {
    data: &'a [u8],
    order: ByteOrder,
}

impl<'a> Tiff<'a> {
    fn u16_at(&self, at: usize) -> Option<u16> {
        let b: [u8; 2] = self.data.get(at..at + 2)?.try_into().ok()?;
        Some(match self.order {
            ByteOrder::Little => u16::from_le_bytes(b),
            ByteOrder::Big => u16::from_be_bytes(b),
        })
    }

    fn u32_at(&self, at: usize) -> Option<u32> {
        let b: [u8; 4] = self.data.get(at..at + 4)?.try_into().ok()?;
        Some(match self.order {
            ByteOrder::Little => u32::from_le_bytes(b),
            ByteOrder::Big => u32::from_be_bytes(b),
        })
    }

    /// Raw bytes of an entry's value, inline or at its offset.
    fn entry_bytes(&self, entry: usize, unit: usize) -> Option<&'a [u8]> {
        let count = self.u32_at(entry + 4)? as usize;
        let len = count.checked_mul(unit)?;
        if len <= 4 {
            self.data.get(entry + 8..entry + 8 + len)
        } else {
            let offset = self.u32_at(entry + 8)? as usize;
            self.data.get(offset..offset.checked_add(len)?)
        }
    }

    fn read_ifd(&self, offset: usize, out: &mut Map<String, Value>, visited: &mut HashSet<usize>) {
        if !visited.insert(offset) {
            return;
        }
        let Some(count) = self.u16_at(offset) else { return };
        for i in 0..(count as usize).min(MAX_IFD_ENTRIES) {
            let entry = offset + 2 + i * 12;
            let (Some(tag), Some(ty)) = (self.u16_at(entry), self.u16_at(entry + 2)) else {
                return;
            };
            match (tag, ty) {
                (TAG_EXIF_IFD, TYPE_LONG) => {
                    if let Some(sub) = self.u32_at(entry + 8) {
                        self.read_ifd(sub as usize, out, visited);
                    }
                }
                (TAG_USER_COMMENT, TYPE_UNDEFINED) => {
                    if let Some(text) = self.entry_bytes(entry, 1).and_then(|b| decode_user_comment(b, self.order)) {
                        out.insert("UserComment".into(), Value::String(text));
                    }
                }
                (TAG_XP_COMMENT, TYPE_BYTE) => {
                    if let Some(text) = self.entry_bytes(entry, 1).and_then(decode_utf16le) {
                        out.insert("XPComment".into(), Value::String(text));
                    }
                }
                (_, TYPE_ASCII | TYPE_UNDEFINED) => {
                    let name = match tag {
                        TAG_IMAGE_DESCRIPTION => "ImageDescription",
                        TAG_MAKE => "Make",
                        TAG_MODEL => "Model",
                        TAG_SOFTWARE => "Software",
                        TAG_ARTIST => "Artist",
                        _ => continue,
                    };
                    if let Some(text) = self.entry_bytes(entry, 1).and_then(decode_ascii) {
                        out.insert(name.into(), Value::String(text));
                    }
                }
                _ => {}
            }
        }
    }
}

fn decode_ascii(bytes: &[u8]) -> Option<String> {
    let end = bytes.iter().rposition(|b| *b != 0).map(|i| i + 1).unwrap_or(0);
    let text = String::from_utf8_lossy(&bytes[..end]).trim().to_string();
    Some(text).filter(|t| !t.is_empty())
}

fn decode_utf16(bytes: &[u8], big_endian: bool) -> Option<String> {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| {
            if big_endian {
                u16::from_be_bytes([c[0], c[1]])
            } else {
                u16::from_le_bytes([c[0], c[1]])
            }
        })
        .collect();
    let text = String::from_utf16_lossy(&units);
    let text = text.trim_end_matches('\0').trim().to_string();
    Some(text).filter(|t| !t.is_empty())
}

fn decode_utf16le(bytes: &[u8]) -> Option<String> {
    decode_utf16(bytes, false)
}

/// `UserComment` starts with an 8-byte charset id.
fn decode_user_comment(bytes: &[u8], order: ByteOrder) -> Option<String> {
    if bytes.len() < 8 {
        return decode_ascii(bytes);
    }
    let (header, body) = bytes.split_at(8);
    match header {
        b"UNICODE\0" => {
            // Writers disagree on endianness; ASCII-range text has a zero high byte
            let big_endian = match (body.first(), body.get(1)) {
                (Some(0), Some(b)) if *b != 0 => true,
                (Some(a), Some(0)) if *a != 0 => false,
                _ => matches!(order, ByteOrder::Big),
            };
            decode_utf16(body, big_endian)
        }
        b"ASCII\0\0\0" | b"\0\0\0\0\0\0\0\0" => decode_ascii(body),
        _ => decode_ascii(bytes),
    }
}

/// Read text tags from a TIFF block, with or without the `Exif\0\0` prefix.
pub fn parse_exif(block: &[u8]) -> Map<String, Value> {
    let mut out = Map::new();
    let data = block.strip_prefix(b"Exif\0\0").unwrap_or(block);
    let order = match data.get(0..2) {
        Some(b"II") => ByteOrder::Little,
        Some(b"MM") => ByteOrder::Big,
        _ => return out,
    };
    let tiff = Tiff { data, order };
    if tiff.u16_at(2) != Some(42) {
        return out;
    }
    if let Some(ifd0) = tiff.u32_at(4) {
        tiff.read_ifd(ifd0 as usize, &mut out, &mut HashSet::new());
    }
    out
}
