//! Per-file extraction pipeline
//!
//! probe -> scanner -> prompt graph / workflow traversal, then merged with an
//! A1111 parameters block and the sidecar. Each stage yields its own
//! [`ExtractedGenerationParams`]; [`ExtractedGenerationParams::merge`] fixes
//! the precedence (graph, then parameters text, then sidecar).

pub mod a1111;
pub mod cache;
pub mod decode;
pub mod scanner;
pub mod shape;
pub mod sidecar;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::ClassifierThresholds;
use crate::graph::convert::workflow_to_linked_prompt_graph;
use crate::graph::hash::compute_workflow_hash;
use crate::graph::traverse::extract_from_graph;
use crate::graph::{
    extract_generation_params_from_graph, Confidence, ExtractedGenerationParams, ParamSource, PromptGraph,
};
use crate::probe::{AssetKind, DefaultProbe, ProbeError, ProbeOutput, TagProbe};

use a1111::{parse_parameters, A1111Parameters};
use cache::LruCache;
use scanner::{ordered_entries, scan_for_workflow_prompt_with};
use sidecar::Sidecar;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("unsupported file type: {}", .0.display())]
    Unsupported(PathBuf),

    #[error("I/O error on {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("cannot serialize sidecar {}: {source}", path.display())]
    Sidecar { path: PathBuf, source: serde_json::Error },

    #[error("rating {0} out of range 0..=5")]
    InvalidRating(u8),
}

impl ExtractError {
    pub fn io(path: &Path, e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::NotFound {
            ExtractError::NotFound(path.to_path_buf())
        } else {
            ExtractError::Io {
                path: path.to_path_buf(),
                source: e,
            }
        }
    }

    pub fn reason_code(&self) -> &'static str {
        match self {
            ExtractError::NotFound(_) => "not_found",
            ExtractError::Unsupported(_) => "unsupported_type",
            ExtractError::Io { .. } => "io_error",
            ExtractError::Probe(e) => e.reason_code(),
            ExtractError::Sidecar { .. } => "sidecar_error",
            ExtractError::InvalidRating(_) => "invalid_rating",
        }
    }
}

/// How much of the generation setup was recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataQuality {
    /// A graph with a sampler and a positive prompt
    Full,
    /// A graph, but no sampler or no prompt
    Partial,
    /// Only text sources (parameters block, sidecar prompt)
    TextOnly,
    NoWorkflowData,
}

impl MetadataQuality {
    pub fn as_str(self) -> &'static str {
        match self {
            MetadataQuality::Full => "full",
            MetadataQuality::Partial => "partial",
            MetadataQuality::TextOnly => "text_only",
            MetadataQuality::NoWorkflowData => "no_workflow_data",
        }
    }
}

/// Everything recovered from one file.
#[derive(Debug, Clone, Serialize)]
pub struct FileMetadata {
    pub path: PathBuf,
    pub kind: AssetKind,
    pub mtime: f64,
    pub size: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_ms: Option<i64>,
    pub params: ExtractedGenerationParams,
    /// The prompt graph that was traversed, when one was embedded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_graph: Option<Value>,
    pub workflow_hash: Option<String>,
    pub quality: MetadataQuality,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sidecar: Option<Sidecar>,
}

/// Seconds since the epoch, as stored in the index.
pub fn mtime_secs(t: SystemTime) -> f64 {
    match t.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    }
}

/// The first string value in `containers` that parses as an A1111 block and
/// is not itself encoded JSON.
fn find_parameters_text(containers: &[&Value]) -> Option<A1111Parameters> {
    containers
        .iter()
        .filter_map(|c| c.as_object())
        .flat_map(ordered_entries)
        .filter_map(|(_, v)| v.as_str())
        .filter(|s| decode::decode_str(s).is_none())
        .find_map(parse_parameters)
}

fn graph_stage(
    workflow: Option<&Value>,
    prompt: Option<&Value>,
    thresholds: &ClassifierThresholds,
) -> (ExtractedGenerationParams, Option<Value>) {
    if let Some(pg) = prompt.and_then(|p| PromptGraph::from_value(p, thresholds)) {
        let params = extract_generation_params_from_graph(&pg, workflow, true);
        return (params, Some(pg.into_value()));
    }

    let Some(workflow) = workflow else {
        return (ExtractedGenerationParams::default(), None);
    };
    let params = match workflow_to_linked_prompt_graph(workflow) {
        Some(graph) => extract_from_graph(&graph),
        None => ExtractedGenerationParams::default(),
    };
    let params = ExtractedGenerationParams {
        workflow: Some(workflow.clone()),
        has_workflow: true,
        source: ParamSource::Workflow,
        ..params
    };
    (params, None)
}

fn quality_of(params: &ExtractedGenerationParams, graph_found: bool) -> MetadataQuality {
    if graph_found {
        if params.has_sampler && params.positive_prompt.is_some() {
            MetadataQuality::Full
        } else {
            MetadataQuality::Partial
        }
    } else if !params.is_empty() {
        MetadataQuality::TextOnly
    } else {
        MetadataQuality::NoWorkflowData
    }
}

/// Runs the pipeline and caches results by `(path, mtime)`.
pub struct Extractor {
    probe: Arc<dyn TagProbe>,
    thresholds: ClassifierThresholds,
    cache: LruCache<FileMetadata>,
    extractions: AtomicU64,
}

impl Extractor {
    pub fn new(probe: Arc<dyn TagProbe>, cache_capacity: usize) -> Self {
        Self {
            probe,
            thresholds: ClassifierThresholds::default(),
            cache: LruCache::new(cache_capacity),
            extractions: AtomicU64::new(0),
        }
    }

    pub fn with_default_probe(use_ffprobe: bool, cache_capacity: usize) -> Self {
        Self::new(Arc::new(DefaultProbe::new(use_ffprobe)), cache_capacity)
    }

    pub fn with_thresholds(mut self, thresholds: ClassifierThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Uncached pipeline runs since construction.
    pub fn extraction_count(&self) -> u64 {
        self.extractions.load(Ordering::Relaxed)
    }

    pub fn cache(&self) -> &LruCache<FileMetadata> {
        &self.cache
    }

    pub fn extract(&self, path: &Path) -> Result<Arc<FileMetadata>, ExtractError> {
        let meta = fs::metadata(path).map_err(|e| ExtractError::io(path, e))?;
        if !meta.is_file() {
            return Err(ExtractError::NotFound(path.to_path_buf()));
        }
        let kind = AssetKind::from_path(path).ok_or_else(|| ExtractError::Unsupported(path.to_path_buf()))?;
        let modified = meta.modified().map_err(|e| ExtractError::io(path, e))?;

        if let Some(hit) = self.cache.get(path, modified) {
            tracing::trace!(path = %path.display(), "extraction cache hit");
            return Ok(hit);
        }

        let result = Arc::new(self.extract_uncached(path, kind, mtime_secs(modified), meta.len())?);
        self.cache.insert(path, modified, result.clone());
        Ok(result)
    }

    fn extract_uncached(
        &self,
        path: &Path,
        kind: AssetKind,
        mtime: f64,
        size: u64,
    ) -> Result<FileMetadata, ExtractError> {
        self.extractions.fetch_add(1, Ordering::Relaxed);

        let probed: ProbeOutput = self.probe.probe(path, kind)?;
        let sidecar = Sidecar::read(path)?;
        let sidecar_container = sidecar.as_ref().map(Sidecar::to_container);

        let mut containers = probed.containers();
        containers.extend(sidecar_container.as_ref());

        let (workflow, prompt) = scan_for_workflow_prompt_with(&containers, &self.thresholds);
        let graph_found = workflow.is_some() || prompt.is_some();
        let (graph_params, prompt_graph) = graph_stage(workflow.as_ref(), prompt.as_ref(), &self.thresholds);

        let parameters = find_parameters_text(&probed.containers());
        let text_params = parameters.as_ref().map(A1111Parameters::to_params).unwrap_or_default();

        let sidecar_params = sidecar
            .as_ref()
            .and_then(Sidecar::prompt_text)
            .map(|text| ExtractedGenerationParams {
                positive_prompt: Some(text.to_string()),
                source: ParamSource::Sidecar,
                prompt_confidence: Confidence::Low,
                ..Default::default()
            })
            .unwrap_or_default();

        let params = graph_params.merge(text_params).merge(sidecar_params);
        let quality = quality_of(&params, graph_found);
        let workflow_hash = params.workflow.as_ref().and_then(compute_workflow_hash);

        let size_hint = parameters.as_ref().and_then(A1111Parameters::size);
        tracing::debug!(
            path = %path.display(),
            quality = quality.as_str(),
            source = ?params.source,
            "extracted"
        );

        Ok(FileMetadata {
            path: path.to_path_buf(),
            kind,
            mtime,
            size,
            width: probed.width.or(size_hint.map(|(w, _)| w)),
            height: probed.height.or(size_hint.map(|(_, h)| h)),
            duration_ms: probed.duration_ms,
            params,
            prompt_graph,
            workflow_hash,
            quality,
            sidecar,
        })
    }
}
