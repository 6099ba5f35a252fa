//! A1111-style "parameters" text blocks
//!
//! ```text
//! masterpiece, a cat <lora:fluffy:0.8>
//! Negative prompt: blurry, lowres
//! Steps: 20, Sampler: Euler a, Schedule type: Karras, CFG scale: 7, Seed: 12345, Size: 512x768, Model: sdxl_base, Lora hashes: "fluffy: 1a2b, other: 3c4d"
//! ```
//!
//! The last line holds comma-separated `Key: value` pairs; values that
//! contain commas are double-quoted.

use indexmap::IndexMap;

use crate::graph::params::{clean_model_name, Confidence, ExtractedGenerationParams, LoraRef, ParamSource};

const NEGATIVE_MARKER: &str = "Negative prompt:";

/// A parsed parameters block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct A1111Parameters {
    pub positive: Option<String>,
    pub negative: Option<String>,
    /// `Key: value` pairs from the settings line, in order
    pub fields: IndexMap<String, String>,
}

/// Byte offset of the settings line: the last line starting with
/// `Steps: <digit>`.
fn settings_start(text: &str) -> Option<usize> {
    let mut found = None;
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if let Some(rest) = line.trim_start().strip_prefix("Steps:") {
            if rest.trim_start().starts_with(|c: char| c.is_ascii_digit()) {
                found = Some(offset);
            }
        }
        offset += line.len();
    }
    found
}

/// Split a settings line into ordered `Key: value` pairs.
///
/// Quoted values may contain commas and `\"` escapes. Segments without a
/// colon are skipped.
pub fn tokenize_fields(line: &str) -> IndexMap<String, String> {
    let mut fields = IndexMap::new();
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        while i < chars.len() && (chars[i] == ',' || chars[i].is_whitespace()) {
            i += 1;
        }
        let key_start = i;
        while i < chars.len() && chars[i] != ':' && chars[i] != ',' {
            i += 1;
        }
        if i >= chars.len() || chars[i] == ',' {
            continue;
        }
        let key: String = chars[key_start..i].iter().collect::<String>().trim().to_string();
        i += 1;
        while i < chars.len() && chars[i] == ' ' {
            i += 1;
        }

        let value = if i < chars.len() && chars[i] == '"' {
            i += 1;
            let mut v = String::new();
            while i < chars.len() && chars[i] != '"' {
                if chars[i] == '\\' && i + 1 < chars.len() {
                    i += 1;
                }
                v.push(chars[i]);
                i += 1;
            }
            i += 1;
            v
        } else {
            let start = i;
            while i < chars.len() && chars[i] != ',' {
                i += 1;
            }
            chars[start..i].iter().collect::<String>().trim().to_string()
        };

        if !key.is_empty() {
            fields.insert(key, value);
        }
    }
    fields
}

/// Parse a parameters block. `None` when the text has neither a settings
/// line nor a negative-prompt marker.
pub fn parse_parameters(text: &str) -> Option<A1111Parameters> {
    let text = text.trim();
    let settings_at = settings_start(text);
    let negative_at = text.find(NEGATIVE_MARKER);
    if settings_at.is_none() && negative_at.is_none() {
        return None;
    }

    let (prompts, settings) = match settings_at {
        Some(at) => (&text[..at], &text[at..]),
        None => (text, ""),
    };
    let (positive, negative) = match prompts.find(NEGATIVE_MARKER) {
        Some(at) => (&prompts[..at], Some(&prompts[at + NEGATIVE_MARKER.len()..])),
        None => (prompts, None),
    };

    let non_empty = |s: &str| Some(s.trim().to_string()).filter(|s| !s.is_empty());
    Some(A1111Parameters {
        positive: non_empty(positive),
        negative: negative.and_then(non_empty),
        fields: tokenize_fields(settings.lines().next().unwrap_or_default()),
    })
}

/// `<lora:name:weight>` tags in a prompt, in order.
pub fn lora_tags(prompt: &str) -> Vec<LoraRef> {
    let mut loras = Vec::new();
    let mut rest = prompt;
    while let Some(open) = rest.find("<lora:") {
        let body_start = open + "<lora:".len();
        let Some(len) = rest[body_start..].find('>') else { break };
        let body = &rest[body_start..body_start + len];
        let mut parts = body.split(':');
        let name = parts.next().unwrap_or_default().trim();
        let weight = parts.next().and_then(|w| w.trim().parse::<f64>().ok());
        if !name.is_empty() {
            loras.push(LoraRef {
                name: clean_model_name(name),
                strength_model: weight,
                strength_clip: weight,
            });
        }
        rest = &rest[body_start + len + 1..];
    }
    loras
}

impl A1111Parameters {
    fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    /// `Size: WxH`
    pub fn size(&self) -> Option<(u32, u32)> {
        let (w, h) = self.field("Size")?.split_once('x')?;
        Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
    }

    pub fn to_params(&self) -> ExtractedGenerationParams {
        let has_prompt = self.positive.is_some() || self.negative.is_some();
        ExtractedGenerationParams {
            positive_prompt: self.positive.clone(),
            negative_prompt: self.negative.clone(),
            seed: self.field("Seed").and_then(|s| {
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<u64>().ok().map(|u| u as i64))
            }),
            steps: self.field("Steps").and_then(|s| s.parse().ok()),
            cfg: self.field("CFG scale").and_then(|s| s.parse().ok()),
            sampler_name: self.field("Sampler").map(String::from),
            scheduler: self.field("Schedule type").map(String::from),
            denoise: self.field("Denoising strength").and_then(|s| s.parse().ok()),
            model: self.field("Model").map(clean_model_name),
            vae: self.field("VAE").map(clean_model_name),
            loras: self.positive.as_deref().map(lora_tags).unwrap_or_default(),
            workflow: None,
            has_workflow: false,
            has_sampler: self.field("Sampler").is_some(),
            source: ParamSource::ParametersText,
            prompt_confidence: if has_prompt { Confidence::Medium } else { Confidence::None },
        }
    }
}
