//! ffprobe-backed probe for video and audio containers

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use super::tools::ToolAvailability;
use super::{AssetKind, ProbeError, ProbeOutput, TagProbe};

const FFPROBE: &str = "ffprobe";

/// `ffprobe -print_format json -show_format -show_streams` output.
#[derive(Debug, Default, Deserialize)]
pub struct FfprobeOutput {
    #[serde(default)]
    pub streams: Vec<FfprobeStream>,
    #[serde(default)]
    pub format: FfprobeFormat,
}

#[derive(Debug, Default, Deserialize)]
pub struct FfprobeStream {
    pub codec_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration: Option<String>,
    #[serde(default)]
    pub tags: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FfprobeFormat {
    pub duration: Option<String>,
    #[serde(default)]
    pub tags: Map<String, Value>,
}

fn seconds_to_ms(s: &str) -> Option<i64> {
    let secs: f64 = s.trim().parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| (secs * 1000.0).round() as i64)
}

impl FfprobeOutput {
    pub fn into_probe_output(self) -> ProbeOutput {
        let video = self
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video") && s.width.is_some());
        let width = video.and_then(|s| s.width);
        let height = video.and_then(|s| s.height);
        let duration_ms = self
            .format
            .duration
            .as_deref()
            .and_then(seconds_to_ms)
            .or_else(|| self.streams.iter().find_map(|s| s.duration.as_deref().and_then(seconds_to_ms)));

        ProbeOutput {
            exif: Value::Object(Map::new()),
            format_tags: Value::Object(self.format.tags),
            stream_tags: self.streams.into_iter().map(|s| Value::Object(s.tags)).collect(),
            width,
            height,
            duration_ms,
        }
    }
}

pub fn parse_ffprobe_json(stdout: &str) -> Result<ProbeOutput, ProbeError> {
    serde_json::from_str::<FfprobeOutput>(stdout)
        .map(FfprobeOutput::into_probe_output)
        .map_err(|e| ProbeError::malformed("ffprobe", e.to_string()))
}

#[derive(Debug, Default)]
pub struct FfprobeProbe {
    tools: Arc<ToolAvailability>,
}

impl FfprobeProbe {
    pub fn with_tools(tools: Arc<ToolAvailability>) -> Self {
        Self { tools }
    }

    pub fn is_available(&self) -> bool {
        self.tools.check(FFPROBE)
    }
}

impl TagProbe for FfprobeProbe {
    fn probe(&self, path: &Path, _kind: AssetKind) -> Result<ProbeOutput, ProbeError> {
        let output = Command::new(FFPROBE)
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .output()
            .map_err(|e| ProbeError::Tool {
                tool: FFPROBE,
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ProbeError::Tool {
                tool: FFPROBE,
                message: format!(
                    "exit code {:?}: {}",
                    output.status.code(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        parse_ffprobe_json(&String::from_utf8_lossy(&output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "streams": [
            {"index": 0, "codec_type": "video", "width": 832, "height": 480, "duration": "5.041667",
             "tags": {"language": "und", "handler_name": "VideoHandler"}},
            {"index": 1, "codec_type": "audio", "tags": {"comment": "stream comment"}}
        ],
        "format": {"duration": "5.041667", "format_name": "mov,mp4",
                   "tags": {"comment": "{\"1\": {\"class_type\": \"A\", \"inputs\": {}}}", "encoder": "Lavf"}}
    }"#;

    #[test]
    fn test_parse_sample() {
        let out = parse_ffprobe_json(SAMPLE).unwrap();
        assert_eq!(out.width, Some(832));
        assert_eq!(out.height, Some(480));
        assert_eq!(out.duration_ms, Some(5042));
        assert_eq!(out.format_tags["encoder"], "Lavf");
        assert_eq!(out.stream_tags.len(), 2);
        assert_eq!(out.stream_tags[1]["comment"], "stream comment");
    }

    #[test]
    fn test_missing_sections() {
        let out = parse_ffprobe_json("{}").unwrap();
        assert_eq!(out.width, None);
        assert_eq!(out.duration_ms, None);
        assert!(out.stream_tags.is_empty());
    }

    #[test]
    fn test_bad_json() {
        let err = parse_ffprobe_json("not json").unwrap_err();
        assert_eq!(err.reason_code(), "malformed_file");
    }

    #[test]
    fn test_seconds_to_ms() {
        assert_eq!(seconds_to_ms("1.5"), Some(1500));
        assert_eq!(seconds_to_ms("N/A"), None);
        assert_eq!(seconds_to_ms("-1"), None);
    }

    #[test]
    fn test_availability_uses_cache() {
        let tools = Arc::new(ToolAvailability::new());
        tools.record(FFPROBE, false);
        let probe = FfprobeProbe::with_tools(tools.clone());
        assert!(!probe.is_available());
        tools.record(FFPROBE, true);
        assert!(probe.is_available());
    }
}
