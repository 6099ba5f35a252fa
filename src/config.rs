//! Tunable limits and index configuration
//!
//! The classifier thresholds and decoder ceilings here were tuned against
//! real-world graph exports. They are knobs, not protocol constants: callers
//! may construct their own values, but the defaults are what the index uses.

use std::path::PathBuf;

/// Default database file, relative to the working directory
pub const DEFAULT_DB_PATH: &str = "genmeta.db";

/// Maximum explicit-stack depth when walking upstream for prompt text
pub const MAX_PROMPT_DEPTH: usize = 32;

/// Maximum hops when tracing a text node forward to a sampler input
pub const MAX_FORWARD_TRACE_DEPTH: usize = 6;

/// Maximum link hops when resolving a scalar sampler field
pub const MAX_SCALAR_HOPS: usize = 4;

/// Relative file-count difference below which the index counts as fresh
pub const FRESHNESS_TOLERANCE: f64 = 0.05;

/// Ratios used by the workflow / prompt-graph shape classifiers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierThresholds {
    /// How many workflow nodes to sample
    pub workflow_sample: usize,
    /// Fraction of sampled workflow nodes that must look like nodes
    pub workflow_ratio: f64,
    /// How many prompt-graph keys to sample
    pub prompt_key_sample: usize,
    /// Fraction of sampled keys that must look like node ids / carry nodes
    pub prompt_ratio: f64,
    /// Fraction of values that must carry `class_type` for `PromptGraph::from_value`
    pub prompt_graph_supermajority: f64,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            workflow_sample: 5,
            workflow_ratio: 0.5,
            prompt_key_sample: 8,
            prompt_ratio: 0.5,
            prompt_graph_supermajority: 0.3,
        }
    }
}

/// Size ceilings enforced by the decoder at each stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    /// Longest text accepted for parsing (bytes)
    pub max_text_len: usize,
    /// Shortest text worth trying as base64
    pub min_base64_len: usize,
    /// Inflate output chunk size
    pub inflate_chunk: usize,
    /// Largest decompressed payload before the inflate is aborted
    pub max_inflated_len: usize,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_text_len: 10 * 1024 * 1024,
            min_base64_len: 80,
            inflate_chunk: 80 * 1024,
            max_inflated_len: 50 * 1024 * 1024,
        }
    }
}

/// A directory tree whose media files are indexed under one asset `type`
/// (e.g. `output`, `input`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRoot {
    pub asset_type: String,
    pub path: PathBuf,
}

impl IndexRoot {
    pub fn new(asset_type: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            asset_type: asset_type.into(),
            path: path.into(),
        }
    }

    /// Parse `type=path`; a bare path is indexed as `output`.
    pub fn parse(arg: &str) -> Self {
        match arg.split_once('=') {
            Some((ty, path)) if !ty.is_empty() && !ty.contains(['/', '\\']) => Self::new(ty, path),
            _ => Self::new("output", arg),
        }
    }
}

/// Everything the indexer needs to run.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub roots: Vec<IndexRoot>,
    pub db_path: PathBuf,
    /// Worker threads for batch extraction (`None` = rayon default)
    pub jobs: Option<usize>,
    /// Files extracted in parallel before their rows are written
    pub batch_size: usize,
    /// Capacity of the in-process extraction cache
    pub cache_capacity: usize,
    /// Call out to ffprobe for video/audio files
    pub use_ffprobe: bool,
    pub freshness_tolerance: f64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            jobs: None,
            batch_size: 64,
            cache_capacity: 512,
            use_ffprobe: true,
            freshness_tolerance: FRESHNESS_TOLERANCE,
        }
    }
}

impl IndexConfig {
    pub fn with_roots(mut self, roots: Vec<IndexRoot>) -> Self {
        self.roots = roots;
        self
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    pub fn with_jobs(mut self, jobs: Option<usize>) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_ffprobe(mut self, enabled: bool) -> Self {
        self.use_ffprobe = enabled;
        self
    }
}
