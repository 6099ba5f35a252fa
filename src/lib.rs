//! genmeta - Generation metadata extraction and indexing
//!
//! genmeta reads the generation parameters that node-graph image/video tools
//! (ComfyUI and friends) embed in their outputs, and keeps a searchable
//! SQLite index of them.
//!
//! # Overview
//!
//! A generated PNG or MP4 usually carries two JSON blobs: the *workflow* (the
//! editor's UI graph, with node positions and widget values) and the *prompt
//! graph* (the flat `{node_id: {class_type, inputs}}` map that was actually
//! executed). They can sit in PNG text chunks, EXIF fields, container tags or
//! a sidecar file, possibly as base64 or zlib, possibly nested several levels
//! deep. genmeta finds them, classifies them by shape, walks the graph from
//! the sampler node and returns the prompt, seed, steps, cfg, sampler, model
//! and LoRA stack.
//!
//! # Pipeline
//!
//! 1. **Probe**: read raw tag containers from the file (native PNG/WEBP/JPEG
//!    readers, or `ffprobe` for video and audio).
//! 2. **Scan**: decode every candidate value and pick the first workflow and
//!    prompt graph by priority key, then by shape.
//! 3. **Traverse**: pick the sampler, follow its links to the prompt encoders
//!    and the checkpoint, collect LoRAs. Workflow-only files are converted to
//!    a linked prompt graph first; A1111 "parameters" text is parsed as a
//!    fallback.
//! 4. **Index**: upsert a row per file keyed by `type|subfolder|filename`,
//!    skipping files whose `(mtime, size)` has not changed.
//!
//! # Quick Start
//!
//! ```no_run
//! use genmeta::{IndexConfig, IndexRoot, Indexer};
//!
//! let config = IndexConfig::default()
//!     .with_roots(vec![IndexRoot::new("output", "/srv/comfy/output")])
//!     .with_db_path("genmeta.db");
//! let indexer = Indexer::open(config).unwrap();
//!
//! let summary = indexer.reindex_all().unwrap();
//! println!("indexed {} / removed {}", summary.indexed, summary.deleted);
//!
//! let page = indexer
//!     .database()
//!     .query_assets(&Default::default(), Some("lighthouse"), None, 20, 0)
//!     .unwrap();
//! for asset in page.assets {
//!     println!("{} seed={:?}", asset.filename, asset.seed);
//! }
//! ```
//!
//! # Modules
//!
//! - [`extract`]: decoder, shape classifiers, scanner, A1111 parser, sidecars, `Extractor`
//! - [`graph`]: graph model, traversal, converters, workflow hashing
//! - [`probe`]: tag readers for image containers and ffprobe
//! - [`db`] / [`schema`]: SQLite asset index
//! - [`index`]: incremental indexer, background job, status

pub mod config;
pub mod db;
pub mod extract;
pub mod graph;
pub mod index;
pub mod probe;
pub mod schema;

pub use config::{ClassifierThresholds, IndexConfig, IndexRoot};
pub use db::{AssetFilters, AssetRecord, AssetSort, Database, DbError, CURRENT_SCHEMA};
pub use extract::scanner::scan_for_workflow_prompt;
pub use extract::{ExtractError, Extractor, FileMetadata, MetadataQuality};
pub use graph::hash::{compute_workflow_hash, hash_algorithm_info, HashAlgorithmInfo};
pub use graph::{extract_generation_params_from_graph, ExtractedGenerationParams, LoraRef, PromptGraph};
pub use index::{IndexError, Indexer, ReindexOutcome};
pub use probe::{AssetKind, TagProbe};
