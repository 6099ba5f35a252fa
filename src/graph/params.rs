//! Extracted generation parameters and the precedence-aware merge step

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One LoRA applied in the model chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoraRef {
    pub name: String,
    pub strength_model: Option<f64>,
    pub strength_clip: Option<f64>,
}

/// Where the parameters came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamSource {
    /// Execution-time prompt graph
    Graph,
    /// Workflow export converted to a prompt graph
    Workflow,
    /// A1111-style "parameters" text block
    ParametersText,
    /// Sidecar JSON written next to the file
    Sidecar,
    #[default]
    None,
}

/// How the prompt text was attributed to positive/negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    #[default]
    None,
    /// Polarity assumed (defaulted to positive)
    Low,
    /// Polarity from a node title or a forward trace to a sampler input
    Medium,
    /// Reached by following a sampler's own positive/negative link
    High,
}

/// Structured parameters recovered from one file's metadata.
///
/// Built once per extraction and never mutated afterwards; combine partial
/// results with [`ExtractedGenerationParams::merge`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedGenerationParams {
    pub positive_prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub seed: Option<i64>,
    pub steps: Option<i64>,
    pub cfg: Option<f64>,
    pub sampler_name: Option<String>,
    pub scheduler: Option<String>,
    pub denoise: Option<f64>,
    pub model: Option<String>,
    pub vae: Option<String>,
    pub loras: Vec<LoraRef>,
    /// Attached or reconstructed workflow graph
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<Value>,
    pub has_workflow: bool,
    /// False when no sampler node anchored the extraction
    pub has_sampler: bool,
    pub source: ParamSource,
    pub prompt_confidence: Confidence,
}

impl ExtractedGenerationParams {
    /// True when nothing was recovered.
    pub fn is_empty(&self) -> bool {
        self.positive_prompt.is_none()
            && self.negative_prompt.is_none()
            && self.seed.is_none()
            && self.steps.is_none()
            && self.cfg.is_none()
            && self.sampler_name.is_none()
            && self.scheduler.is_none()
            && self.denoise.is_none()
            && self.model.is_none()
            && self.vae.is_none()
            && self.loras.is_empty()
            && self.workflow.is_none()
    }

    /// Combine two partial results. Fields already set on `self` win; `other`
    /// only fills gaps. The LoRA list is taken whole from whichever side has one.
    pub fn merge(self, other: ExtractedGenerationParams) -> ExtractedGenerationParams {
        let source = if self.source == ParamSource::None { other.source } else { self.source };
        let prompt_confidence = if self.positive_prompt.is_some() || self.negative_prompt.is_some() {
            self.prompt_confidence
        } else {
            other.prompt_confidence
        };
        let workflow = self.workflow.or(other.workflow);

        ExtractedGenerationParams {
            positive_prompt: self.positive_prompt.or(other.positive_prompt),
            negative_prompt: self.negative_prompt.or(other.negative_prompt),
            seed: self.seed.or(other.seed),
            steps: self.steps.or(other.steps),
            cfg: self.cfg.or(other.cfg),
            sampler_name: self.sampler_name.or(other.sampler_name),
            scheduler: self.scheduler.or(other.scheduler),
            denoise: self.denoise.or(other.denoise),
            model: self.model.or(other.model),
            vae: self.vae.or(other.vae),
            loras: if self.loras.is_empty() { other.loras } else { self.loras },
            has_workflow: workflow.is_some(),
            workflow,
            has_sampler: self.has_sampler || other.has_sampler,
            source,
            prompt_confidence,
        }
    }
}

/// Strip directories and a known weights extension from a model file name.
pub fn clean_model_name(raw: &str) -> String {
    const EXTENSIONS: &[&str] = &[
        ".safetensors", ".ckpt", ".pt", ".pth", ".bin", ".gguf", ".sft", ".onnx",
    ];
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw).trim();
    let lower = base.to_ascii_lowercase();
    for ext in EXTENSIONS {
        if lower.ends_with(ext) && base.len() > ext.len() {
            return base[..base.len() - ext.len()].to_string();
        }
    }
    base.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_model_name() {
        assert_eq!(clean_model_name("sdxl.safetensors"), "sdxl");
        assert_eq!(clean_model_name("SDXL/juggernaut.SafeTensors"), "juggernaut");
        assert_eq!(clean_model_name("C:\\models\\v1-5.ckpt"), "v1-5");
        assert_eq!(clean_model_name("flux-dev.gguf"), "flux-dev");
        assert_eq!(clean_model_name("plainname"), "plainname");
        assert_eq!(clean_model_name(".safetensors"), ".safetensors");
    }

    #[test]
    fn test_merge_prefers_self() {
        let graph = ExtractedGenerationParams {
            positive_prompt: Some("graph".into()),
            seed: Some(1),
            source: ParamSource::Graph,
            prompt_confidence: Confidence::High,
            ..Default::default()
        };
        let text = ExtractedGenerationParams {
            positive_prompt: Some("text".into()),
            negative_prompt: Some("neg".into()),
            seed: Some(2),
            steps: Some(30),
            source: ParamSource::ParametersText,
            prompt_confidence: Confidence::Medium,
            ..Default::default()
        };
        let merged = graph.merge(text);
        assert_eq!(merged.positive_prompt.as_deref(), Some("graph"));
        assert_eq!(merged.negative_prompt.as_deref(), Some("neg"));
        assert_eq!(merged.seed, Some(1));
        assert_eq!(merged.steps, Some(30));
        assert_eq!(merged.source, ParamSource::Graph);
        assert_eq!(merged.prompt_confidence, Confidence::High);
    }

    #[test]
    fn test_merge_into_empty_takes_other_source() {
        let empty = ExtractedGenerationParams::default();
        let other = ExtractedGenerationParams {
            steps: Some(20),
            source: ParamSource::ParametersText,
            ..Default::default()
        };
        let merged = empty.merge(other);
        assert_eq!(merged.source, ParamSource::ParametersText);
        assert_eq!(merged.steps, Some(20));
    }

    #[test]
    fn test_merge_loras_taken_whole() {
        let a = ExtractedGenerationParams::default();
        let b = ExtractedGenerationParams {
            loras: vec![LoraRef { name: "x".into(), strength_model: Some(1.0), strength_clip: None }],
            ..Default::default()
        };
        assert_eq!(a.merge(b).loras.len(), 1);
    }

    #[test]
    fn test_is_empty() {
        assert!(ExtractedGenerationParams::default().is_empty());
        let p = ExtractedGenerationParams { cfg: Some(7.0), ..Default::default() };
        assert!(!p.is_empty());
    }
}
