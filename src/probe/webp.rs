//! WEBP (RIFF) reader: canvas size and the `EXIF` chunk

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde_json::{Map, Value};

use super::exif::parse_exif;
use super::{ProbeError, ProbeOutput};
use crate::config::DecodeLimits;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebpInfo {
    pub exif: Map<String, Value>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl WebpInfo {
    pub fn into_probe_output(self) -> ProbeOutput {
        ProbeOutput {
            exif: Value::Object(self.exif),
            width: self.width,
            height: self.height,
            ..ProbeOutput::default()
        }
    }
}

fn u24_le(b: &[u8]) -> u32 {
    u32::from(b[0]) | u32::from(b[1]) << 8 | u32::from(b[2]) << 16
}

/// Canvas size from a `VP8X`, `VP8 ` or `VP8L` payload.
fn dimensions(kind: &[u8; 4], data: &[u8]) -> Option<(u32, u32)> {
    match kind {
        b"VP8X" if data.len() >= 10 => Some((u24_le(&data[4..7]) + 1, u24_le(&data[7..10]) + 1)),
        // 3-byte frame tag, then start code 9d 01 2a
        b"VP8 " if data.len() >= 10 && data[3..6] == [0x9d, 0x01, 0x2a] => {
            let w = u16::from_le_bytes([data[6], data[7]]) & 0x3fff;
            let h = u16::from_le_bytes([data[8], data[9]]) & 0x3fff;
            Some((u32::from(w), u32::from(h)))
        }
        b"VP8L" if data.len() >= 5 && data[0] == 0x2f => {
            let bits = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
            Some(((bits & 0x3fff) + 1, ((bits >> 14) & 0x3fff) + 1))
        }
        _ => None,
    }
}

pub fn read_webp_from<R: Read>(mut reader: R) -> Result<WebpInfo, ProbeError> {
    let limits = DecodeLimits::default();
    let mut header = [0u8; 12];
    reader.read_exact(&mut header)?;
    if &header[0..4] != b"RIFF" || &header[8..12] != b"WEBP" {
        return Err(ProbeError::malformed("webp", "missing RIFF/WEBP header"));
    }

    let mut info = WebpInfo::default();
    loop {
        let mut chunk_header = [0u8; 8];
        if reader.read_exact(&mut chunk_header).is_err() {
            break;
        }
        let kind = [chunk_header[0], chunk_header[1], chunk_header[2], chunk_header[3]];
        let len = u32::from_le_bytes([chunk_header[4], chunk_header[5], chunk_header[6], chunk_header[7]]) as usize;
        // Chunks are padded to an even length
        let padded = len + (len & 1);

        let wanted = matches!(&kind, b"EXIF")
            || (info.width.is_none() && matches!(&kind, b"VP8X" | b"VP8 " | b"VP8L"));
        if !wanted || len > limits.max_text_len {
            let skipped = std::io::copy(&mut (&mut reader).take(padded as u64), &mut std::io::sink())?;
            if skipped < padded as u64 {
                break;
            }
            continue;
        }

        // Only the frame header matters for size; EXIF needs the whole payload
        let keep = if &kind == b"EXIF" { len } else { len.min(32) };
        let mut data = vec![0u8; keep];
        if reader.read_exact(&mut data).is_err() {
            break;
        }
        let rest = (padded - keep) as u64;
        if std::io::copy(&mut (&mut reader).take(rest), &mut std::io::sink())? < rest {
            // The last chunk may be truncated; what we kept is still usable
            if &kind == b"EXIF" {
                info.exif = parse_exif(&data);
            }
            break;
        }

        if &kind == b"EXIF" {
            info.exif = parse_exif(&data);
        } else if let Some((w, h)) = dimensions(&kind, &data) {
            info.width = Some(w);
            info.height = Some(h);
        }
    }
    Ok(info)
}

pub fn read_webp(path: &Path) -> Result<WebpInfo, ProbeError> {
    read_webp_from(BufReader::new(File::open(path)?))
}


#[cfg(test)]
mod tests {
    use super::test_support::build_webp;
    use super::*;
    use crate::probe::exif::test_support::build_tiff;
    use std::io::Cursor;

    #[test]
    fn test_vp8x_size_and_exif() {
        let tiff = build_tiff(&[(0x010F, "workflow:{\"nodes\":[]}"), (0x0110, "prompt:{}")], None);
        let webp = build_webp(1024, 768, Some(&tiff));
        let info = read_webp_from(Cursor::new(webp)).unwrap();
        assert_eq!(info.width, Some(1024));
        assert_eq!(info.height, Some(768));
        assert_eq!(info.exif["Make"], "workflow:{\"nodes\":[]}");
        assert_eq!(info.exif["Model"], "prompt:{}");
    }

    #[test]
    fn test_vp8l_dimensions() {
        // width-1 = 99, height-1 = 49
        let bits: u32 = 99 | (49 << 14);
        let mut data = vec![0x2f];
        data.extend_from_slice(&bits.to_le_bytes());
        assert_eq!(dimensions(b"VP8L", &data), Some((100, 50)));
    }

    #[test]
    fn test_vp8_dimensions() {
        let mut data = vec![0, 0, 0, 0x9d, 0x01, 0x2a];
        data.extend_from_slice(&320u16.to_le_bytes());
        data.extend_from_slice(&240u16.to_le_bytes());
        assert_eq!(dimensions(b"VP8 ", &data), Some((320, 240)));
    }

    #[test]
    fn test_not_webp() {
        let err = read_webp_from(Cursor::new(b"RIFF\0\0\0\0WAVEfmt ".to_vec())).unwrap_err();
        assert_eq!(err.reason_code(), "malformed_file");
    }

    #[test]
    fn test_no_exif() {
        let info = read_webp_from(Cursor::new(build_webp(8, 8, None))).unwrap();
        assert!(info.exif.is_empty());
        assert_eq!(info.width, Some(8));
    }
}
