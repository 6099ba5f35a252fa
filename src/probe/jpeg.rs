//! JPEG marker reader: APP1 Exif, COM comments and SOF dimensions

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde_json::{Map, Value};

use super::exif::parse_exif;
use super::{ProbeError, ProbeOutput};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JpegInfo {
    pub exif: Map<String, Value>,
    pub comment: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl JpegInfo {
    pub fn into_probe_output(self) -> ProbeOutput {
        let mut container = self.exif;
        if let Some(comment) = self.comment {
            container.entry("Comment").or_insert(Value::String(comment));
        }
        ProbeOutput {
            exif: Value::Object(container),
            width: self.width,
            height: self.height,
            ..ProbeOutput::default()
        }
    }
}

fn is_sof(marker: u8) -> bool {
    matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC)
}

pub fn read_jpeg_from<R: Read>(mut reader: R) -> Result<JpegInfo, ProbeError> {
    let mut soi = [0u8; 2];
    reader.read_exact(&mut soi)?;
    if soi != [0xFF, 0xD8] {
        return Err(ProbeError::malformed("jpeg", "missing SOI marker"));
    }

    let mut info = JpegInfo::default();
    loop {
        let mut marker = [0u8; 2];
        if reader.read_exact(&mut marker).is_err() || marker[0] != 0xFF {
            break;
        }
        // Start of scan: entropy-coded data follows, no more metadata
        if marker[1] == 0xDA || marker[1] == 0xD9 {
            break;
        }
        let mut len_bytes = [0u8; 2];
        if reader.read_exact(&mut len_bytes).is_err() {
            break;
        }
        let len = usize::from(u16::from_be_bytes(len_bytes)).saturating_sub(2);
        let mut data = vec![0u8; len];
        if reader.read_exact(&mut data).is_err() {
            break;
        }

        match marker[1] {
            0xE1 if data.starts_with(b"Exif\0\0") => info.exif = parse_exif(&data),
            0xFE => {
                let text = String::from_utf8_lossy(&data).trim_end_matches('\0').to_string();
                if !text.is_empty() && info.comment.is_none() {
                    info.comment = Some(text);
                }
            }
            m if is_sof(m) && data.len() >= 5 => {
                info.height = Some(u32::from(u16::from_be_bytes([data[1], data[2]])));
                info.width = Some(u32::from(u16::from_be_bytes([data[3], data[4]])));
            }
            _ => {}
        }
    }
    Ok(info)
}

pub fn read_jpeg(path: &Path) -> Result<JpegInfo, ProbeError> {
    read_jpeg_from(BufReader::new(File::open(path)?))
}
