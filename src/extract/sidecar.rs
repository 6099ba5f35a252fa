//! Sidecar JSON stored next to a media file as `<file name>.json`
//!
//! The sidecar holds user facts (rating, tags, notes) and, for files that
//! cannot carry embedded metadata, the prompt graph and workflow.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ExtractError;

pub const SIDECAR_EXTENSION: &str = "json";

/// Highest accepted rating
pub const MAX_RATING: u8 = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sidecar {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Unknown keys written by other tools, kept on rewrite
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `image.png` -> `image.png.json`
pub fn sidecar_path(media: &Path) -> PathBuf {
    let mut name = media.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(SIDECAR_EXTENSION);
    media.with_file_name(name)
}

/// True for paths that are themselves sidecars of an existing media file.
pub fn is_sidecar_path(path: &Path) -> bool {
    let is_json = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case(SIDECAR_EXTENSION))
        .unwrap_or(false);
    is_json && path.file_stem().map(|stem| path.with_file_name(stem).is_file()).unwrap_or(false)
}

impl Sidecar {
    /// Read the sidecar for `media`. A missing sidecar is `Ok(None)`; one that
    /// fails to parse is logged and treated as missing.
    pub fn read(media: &Path) -> Result<Option<Sidecar>, ExtractError> {
        let path = sidecar_path(media);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ExtractError::io(&path, e)),
        };
        match serde_json::from_str::<Sidecar>(&text) {
            Ok(mut sidecar) => {
                if let Some(rating) = sidecar.rating.filter(|r| *r > MAX_RATING) {
                    tracing::warn!(path = %path.display(), rating, "sidecar rating out of range, clamping");
                    sidecar.rating = Some(MAX_RATING);
                }
                Ok(Some(sidecar))
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring malformed sidecar");
                Ok(None)
            }
        }
    }

    /// Write atomically: serialize to a temporary sibling, then rename.
    pub fn write(&self, media: &Path) -> Result<(), ExtractError> {
        let path = sidecar_path(media);
        let json = serde_json::to_string_pretty(self).map_err(|source| ExtractError::Sidecar {
            path: path.clone(),
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .and_then(|_| fs::rename(&tmp, &path))
            .map_err(|e| {
                let _ = fs::remove_file(&tmp);
                ExtractError::io(&path, e)
            })
    }

    /// Update the sidecar in place, creating it when absent.
    pub fn update(media: &Path, f: impl FnOnce(&mut Sidecar)) -> Result<Sidecar, ExtractError> {
        let mut sidecar = Sidecar::read(media)?.unwrap_or_default();
        f(&mut sidecar);
        sidecar.write(media)?;
        Ok(sidecar)
    }

    pub fn set_rating(&mut self, rating: u8) -> Result<(), ExtractError> {
        if rating > MAX_RATING {
            return Err(ExtractError::InvalidRating(rating));
        }
        self.rating = Some(rating);
        Ok(())
    }

    /// Replace the tag set; blank tags are dropped and duplicates collapsed.
    pub fn set_tags<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = Vec::new();
        for tag in tags {
            let tag = tag.as_ref().trim();
            if !tag.is_empty() && !out.iter().any(|t| t == tag) {
                out.push(tag.to_string());
            }
        }
        self.tags = out;
    }

    /// The sidecar as a scanner container: `prompt` and `workflow` keys.
    pub fn to_container(&self) -> Value {
        let mut map = Map::new();
        if let Some(workflow) = &self.workflow {
            map.insert("workflow".into(), workflow.clone());
        }
        if let Some(prompt) = &self.prompt {
            map.insert("prompt".into(), prompt.clone());
        }
        Value::Object(map)
    }

    /// A plain-text prompt, when the sidecar stores one instead of a graph.
    pub fn prompt_text(&self) -> Option<&str> {
        self.prompt
            .as_ref()
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty() && !s.starts_with('{'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_sidecar_path() {
        assert_eq!(sidecar_path(Path::new("/out/image.png")), PathBuf::from("/out/image.png.json"));
        assert_eq!(sidecar_path(Path::new("clip.mp4")), PathBuf::from("clip.mp4.json"));
    }

    #[test]
    fn test_missing_is_none() {
        let dir = TempDir::new().unwrap();
        assert_eq!(Sidecar::read(&dir.path().join("a.png")).unwrap(), None);
    }

    #[test]
    fn test_malformed_is_none() {
        let dir = TempDir::new().unwrap();
        let media = dir.path().join("a.png");
        fs::write(sidecar_path(&media), "{not json").unwrap();
        assert_eq!(Sidecar::read(&media).unwrap(), None);
    }

    #[test]
    fn test_write_read_keeps_unknown_keys() {
        let dir = TempDir::new().unwrap();
        let media = dir.path().join("a.png");
        fs::write(sidecar_path(&media), r#"{"rating": 3, "tags": ["cat"], "custom": {"x": 1}}"#).unwrap();

        let updated = Sidecar::update(&media, |s| s.set_tags(["cat", " dog ", "", "cat"])).unwrap();
        assert_eq!(updated.tags, vec!["cat", "dog"]);

        let back = Sidecar::read(&media).unwrap().unwrap();
        assert_eq!(back.rating, Some(3));
        assert_eq!(back.tags, vec!["cat", "dog"]);
        assert_eq!(back.extra["custom"], json!({"x": 1}));
        assert!(!sidecar_path(&media).with_extension("json.tmp").exists());
    }

    #[test]
    fn test_read_clamps_rating() {
        let dir = TempDir::new().unwrap();
        let media = dir.path().join("a.png");
        fs::write(sidecar_path(&media), r#"{"rating": 200, "tags": ["x"]}"#).unwrap();
        let s = Sidecar::read(&media).unwrap().unwrap();
        assert_eq!(s.rating, Some(MAX_RATING));
        assert_eq!(s.tags, vec!["x"]);
    }

    #[test]
    fn test_rating_range() {
        let mut s = Sidecar::default();
        assert!(s.set_rating(5).is_ok());
        assert!(s.set_rating(6).is_err());
        assert_eq!(s.rating, Some(5));
    }

    #[test]
    fn test_container_and_prompt_text() {
        let s = Sidecar {
            prompt: Some(json!("a lighthouse at dusk")),
            workflow: Some(json!({"nodes": []})),
            ..Default::default()
        };
        let c = s.to_container();
        assert_eq!(c["workflow"], json!({"nodes": []}));
        assert_eq!(s.prompt_text(), Some("a lighthouse at dusk"));

        let graph = Sidecar { prompt: Some(json!({"1": {}})), ..Default::default() };
        assert_eq!(graph.prompt_text(), None);
    }

    #[test]
    fn test_is_sidecar_path() {
        let dir = TempDir::new().unwrap();
        let media = dir.path().join("a.png");
        fs::write(&media, b"x").unwrap();
        assert!(is_sidecar_path(&sidecar_path(&media)));
        assert!(!is_sidecar_path(&dir.path().join("orphan.json")));
    }
}
