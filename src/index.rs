//! Incremental asset indexer
//!
//! Files are identified by `type|subfolder|filename` relative to the index
//! root they live under. A file is re-extracted only when its `(mtime, size)`
//! differs from the stored row. Extraction runs on the rayon pool; rows are
//! written afterwards from the calling thread, so there is one writer at a
//! time.
//!
//! On a failed extraction the previous row is left untouched and the failure
//! is upserted into `indexing_errors`; a later success clears it.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;
use walkdir::WalkDir;

use crate::config::{IndexConfig, IndexRoot};
use crate::db::{AssetRecord, Database, DbError};
use crate::extract::sidecar::{is_sidecar_path, Sidecar, MAX_RATING};
use crate::extract::{mtime_secs, ExtractError, Extractor, FileMetadata};
use crate::probe::AssetKind;

/// Ids are deleted in chunks of this many rows
const DELETE_BATCH: usize = 500;

/// Two mtimes closer than this are the same stat
const MTIME_EPSILON: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("{} is not under any index root", .0.display())]
    OutsideRoots(PathBuf),

    #[error("no asset with id {0}")]
    UnknownAsset(String),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("I/O error on {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

impl IndexError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            IndexError::NotFound(_) => "not_found",
            IndexError::OutsideRoots(_) => "outside_roots",
            IndexError::UnknownAsset(_) => "unknown_asset",
            IndexError::Extract(e) => e.reason_code(),
            IndexError::Db(e) => e.reason_code(),
            IndexError::Io { .. } => "io_error",
        }
    }
}

/// Whether a stored row is out of date for a file with this stat.
pub fn should_reindex(existing: Option<&AssetRecord>, mtime: f64, size: i64) -> bool {
    match existing {
        None => true,
        Some(row) => (row.mtime - mtime).abs() > MTIME_EPSILON || row.size != size,
    }
}

/// Where a file sits in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetIdentity {
    pub id: String,
    pub asset_type: String,
    /// Relative directory, `/`-separated, empty at the root
    pub subfolder: String,
    pub filename: String,
    pub ext: String,
}

impl AssetIdentity {
    /// `None` when `path` is not below `root` or has no file name.
    pub fn resolve(root: &IndexRoot, path: &Path) -> Option<AssetIdentity> {
        let rel = path.strip_prefix(&root.path).ok()?;
        let filename = rel.file_name()?.to_string_lossy().to_string();
        let subfolder = rel
            .parent()
            .map(|p| {
                p.components()
                    .filter_map(|c| match c {
                        Component::Normal(s) => Some(s.to_string_lossy().to_string()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .unwrap_or_default();
        let ext = rel
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        Some(AssetIdentity {
            id: format!("{}|{}|{}", root.asset_type, subfolder, filename),
            asset_type: root.asset_type.clone(),
            subfolder,
            filename,
            ext,
        })
    }
}

/// Build the index row for an extraction. User facts come from the sidecar
/// when it has them, else from the previous row.
pub fn build_record(
    identity: &AssetIdentity,
    meta: &FileMetadata,
    existing: Option<&AssetRecord>,
) -> Result<AssetRecord, DbError> {
    let now = chrono::Local::now().to_rfc3339();
    let sidecar = meta.sidecar.as_ref();
    let params = &meta.params;

    let rating = sidecar
        .and_then(|s| s.rating)
        .map(i32::from)
        .or(existing.map(|r| r.rating))
        .unwrap_or(0);
    let tags_json = match (sidecar.filter(|s| !s.tags.is_empty()), existing) {
        (Some(s), _) => serde_json::to_string(&s.tags)?,
        (None, Some(row)) => row.tags_json.clone(),
        (None, None) => "[]".to_string(),
    };
    let notes = sidecar
        .and_then(|s| s.notes.clone())
        .or_else(|| existing.and_then(|r| r.notes.clone()));

    Ok(AssetRecord {
        id: identity.id.clone(),
        asset_type: identity.asset_type.clone(),
        subfolder: identity.subfolder.clone(),
        filename: identity.filename.clone(),
        ext: identity.ext.clone(),
        abs_path: meta.path.to_string_lossy().to_string(),
        mtime: meta.mtime,
        size: i64::try_from(meta.size).unwrap_or(i64::MAX),
        kind: meta.kind.as_str().to_string(),
        width: meta.width.and_then(|w| i32::try_from(w).ok()),
        height: meta.height.and_then(|h| i32::try_from(h).ok()),
        duration_ms: meta.duration_ms,
        rating,
        tags_json,
        notes,
        prompt: params.positive_prompt.clone(),
        negative: params.negative_prompt.clone(),
        model: params.model.clone(),
        sampler: params.sampler_name.clone(),
        steps: params.steps,
        cfg: params.cfg,
        seed: params.seed,
        has_workflow: params.has_workflow,
        workflow_hash: meta.workflow_hash.clone(),
        meta_json: Some(serde_json::to_string(meta)?),
        created_at: now.clone(),
        updated_at: now,
    })
}

// ============================================================================
// Results and status
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReindexOutcome {
    Indexed,
    Skipped,
    /// Extraction failed; the reason code was recorded in `indexing_errors`
    Failed(&'static str),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReindexSummary {
    pub indexed: usize,
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FullReindexSummary {
    pub indexed: usize,
    pub skipped: usize,
    pub deleted: usize,
    pub errors: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    #[default]
    Idle,
    Indexing,
    Error,
}

impl IndexState {
    pub fn as_str(self) -> &'static str {
        match self {
            IndexState::Idle => "idle",
            IndexState::Indexing => "indexing",
            IndexState::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Fresh,
    Stale,
}

/// Approximate freshness: fresh when the file count and the row count differ
/// by less than `tolerance` relative to the larger of the two.
pub fn freshness(file_count: usize, row_count: usize, tolerance: f64) -> Freshness {
    let larger = file_count.max(row_count);
    if larger == 0 {
        return Freshness::Fresh;
    }
    let diff = file_count.abs_diff(row_count) as f64 / larger as f64;
    if diff < tolerance {
        Freshness::Fresh
    } else {
        Freshness::Stale
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub status: IndexState,
    pub freshness: Freshness,
    pub total_assets: i64,
    /// Files on disk without a row (approximate)
    pub backlog: i64,
    pub errors: i64,
    pub last_error: Option<String>,
    pub last_run: Option<FullReindexSummary>,
}

/// Reported after each file of a full reindex.
#[derive(Debug, Clone, Copy)]
pub struct IndexProgress<'a> {
    pub done: usize,
    pub total: usize,
    pub path: &'a Path,
}

#[derive(Debug, Default)]
struct JobState {
    status: IndexState,
    last_error: Option<String>,
    last_run: Option<FullReindexSummary>,
    handle: Option<JoinHandle<()>>,
}

/// Per-file result of the parallel stage.
enum Staged {
    Skipped,
    Extracted {
        identity: AssetIdentity,
        existing: Option<AssetRecord>,
        meta: Arc<FileMetadata>,
    },
    Failed {
        path: PathBuf,
        error: ExtractError,
    },
    Cancelled,
}

// ============================================================================
// Indexer
// ============================================================================

/// Cheap to clone; clones share the database, extractor and job state.
#[derive(Clone)]
pub struct Indexer {
    config: Arc<IndexConfig>,
    db: Arc<Database>,
    extractor: Arc<Extractor>,
    stop: Arc<AtomicBool>,
    job: Arc<Mutex<JobState>>,
    /// Dedicated extraction pool when `config.jobs` is set
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl Indexer {
    pub fn new(config: IndexConfig, db: Arc<Database>, extractor: Arc<Extractor>) -> Self {
        let pool = config.jobs.and_then(|jobs| {
            match rayon::ThreadPoolBuilder::new().num_threads(jobs).build() {
                Ok(pool) => Some(Arc::new(pool)),
                Err(e) => {
                    tracing::warn!(error = %e, jobs, "cannot build worker pool, using the global pool");
                    None
                }
            }
        });
        Self {
            config: Arc::new(config),
            db,
            extractor,
            stop: Arc::new(AtomicBool::new(false)),
            job: Arc::new(Mutex::new(JobState::default())),
            pool,
        }
    }

    /// Open the database and build the default extractor from `config`.
    pub fn open(config: IndexConfig) -> Result<Self, IndexError> {
        let pool_size = config.jobs.unwrap_or_else(rayon::current_num_threads).max(2) as u32;
        let db = Arc::new(Database::open_with_pool_size(&config.db_path, pool_size)?);
        let extractor = Arc::new(Extractor::with_default_probe(config.use_ffprobe, config.cache_capacity));
        Ok(Self::new(config, db, extractor))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    fn job(&self) -> MutexGuard<'_, JobState> {
        self.job.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn root_for(&self, path: &Path) -> Option<&IndexRoot> {
        self.config.roots.iter().find(|r| path.starts_with(&r.path))
    }

    fn identity_for(&self, path: &Path) -> Result<AssetIdentity, IndexError> {
        self.root_for(path)
            .and_then(|root| AssetIdentity::resolve(root, path))
            .ok_or_else(|| IndexError::OutsideRoots(path.to_path_buf()))
    }

    /// Stat and, when stale, extract. Safe to run on worker threads.
    fn stage(&self, path: &Path) -> Result<Staged, IndexError> {
        let identity = self.identity_for(path)?;
        let meta = match fs::metadata(path) {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Err(IndexError::NotFound(path.to_path_buf())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(IndexError::NotFound(path.to_path_buf())),
            Err(e) => {
                return Err(IndexError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        let mtime = meta.modified().map(mtime_secs).map_err(|e| IndexError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let size = i64::try_from(meta.len()).unwrap_or(i64::MAX);

        let existing = self.db.get_asset(&identity.id)?;
        if !should_reindex(existing.as_ref(), mtime, size) {
            tracing::debug!(path = %path.display(), "skipping unchanged asset");
            return Ok(Staged::Skipped);
        }

        match self.extractor.extract(path) {
            Ok(meta) => Ok(Staged::Extracted { identity, existing, meta }),
            Err(ExtractError::NotFound(p)) => Err(IndexError::NotFound(p)),
            Err(error) => Ok(Staged::Failed {
                path: path.to_path_buf(),
                error,
            }),
        }
    }

    /// Write a staged result. Runs on one thread at a time.
    fn commit(&self, staged: Staged) -> Result<ReindexOutcome, IndexError> {
        match staged {
            Staged::Skipped | Staged::Cancelled => Ok(ReindexOutcome::Skipped),
            Staged::Extracted { identity, existing, meta } => {
                let record = build_record(&identity, &meta, existing.as_ref())?;
                self.db.upsert_asset(&record)?;
                self.db.clear_indexing_error(&record.abs_path)?;
                tracing::debug!(id = %record.id, quality = meta.quality.as_str(), "indexed asset");
                Ok(ReindexOutcome::Indexed)
            }
            Staged::Failed { path, error } => {
                let reason = error.reason_code();
                tracing::warn!(path = %path.display(), reason, error = %error, "extraction failed");
                self.db
                    .upsert_indexing_error(&path.to_string_lossy(), reason, Some(&error.to_string()))?;
                Ok(ReindexOutcome::Failed(reason))
            }
        }
    }

    /// Reindex a single file. Unchanged files are skipped without extraction.
    pub fn reindex_one(&self, path: &Path) -> Result<ReindexOutcome, IndexError> {
        let staged = self.stage(path)?;
        self.commit(staged)
    }

    fn with_pool<T: Send>(&self, f: impl FnOnce() -> T + Send) -> T {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }

    /// Reindex a batch: extraction in parallel, writes in order.
    pub fn reindex_paths(&self, paths: &[PathBuf]) -> Result<ReindexSummary, IndexError> {
        let staged: Vec<(usize, Result<Staged, IndexError>)> =
            self.with_pool(|| paths.par_iter().enumerate().map(|(i, p)| (i, self.stage(p))).collect());

        let mut summary = ReindexSummary::default();
        for (i, result) in staged {
            match result.and_then(|s| self.commit(s)) {
                Ok(ReindexOutcome::Indexed) => summary.indexed += 1,
                Ok(ReindexOutcome::Skipped) => summary.skipped += 1,
                Ok(ReindexOutcome::Failed(_)) => summary.errors += 1,
                Err(IndexError::Db(e)) => return Err(IndexError::Db(e)),
                Err(e) => {
                    tracing::warn!(path = %paths[i].display(), error = %e, "cannot reindex");
                    summary.errors += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Media files under every root, sidecars excluded.
    fn walk_candidates(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for root in &self.config.roots {
            let found = WalkDir::new(&root.path)
                .into_iter()
                .filter_map(|e| match e {
                    Ok(e) => Some(e),
                    Err(err) => {
                        tracing::debug!(error = %err, "walk error");
                        None
                    }
                })
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| AssetKind::from_path(p).is_some() && !is_sidecar_path(p));
            files.extend(found);
        }
        files
    }

    /// Walk every root, reindex what changed and delete rows for files that
    /// are gone. Stops between files once [`Indexer::stop`] is called;
    /// deletions are skipped for a cancelled run. The stop flag only affects
    /// full reindexes; `reindex_one` and `reindex_paths` ignore it.
    pub fn reindex_all(&self) -> Result<FullReindexSummary, IndexError> {
        self.reindex_all_with_progress(&|_| {})
    }

    pub fn reindex_all_with_progress(
        &self,
        progress: &(dyn Fn(IndexProgress<'_>) + Sync),
    ) -> Result<FullReindexSummary, IndexError> {
        self.stop.store(false, Ordering::Relaxed);
        self.run_full(progress)
    }

    /// Full reindex without touching the stop flag.
    fn run_full(&self, progress: &(dyn Fn(IndexProgress<'_>) + Sync)) -> Result<FullReindexSummary, IndexError> {
        let candidates = self.walk_candidates();
        let total = candidates.len();
        tracing::info!(files = total, roots = self.config.roots.len(), "full reindex started");

        let on_disk: HashSet<String> = candidates
            .iter()
            .filter_map(|p| self.identity_for(p).ok().map(|i| i.id))
            .collect();

        let mut summary = FullReindexSummary::default();
        let mut done = 0;
        for batch in candidates.chunks(self.config.batch_size.max(1)) {
            if self.stop.load(Ordering::Relaxed) {
                summary.cancelled = true;
                break;
            }
            let staged: Vec<Result<Staged, IndexError>> =
                self.with_pool(|| {
                    batch
                        .par_iter()
                        .map(|p| {
                            if self.stop.load(Ordering::Relaxed) {
                                Ok(Staged::Cancelled)
                            } else {
                                self.stage(p)
                            }
                        })
                        .collect()
                });

            for (path, result) in batch.iter().zip(staged) {
                match result {
                    Ok(Staged::Cancelled) => summary.cancelled = true,
                    Ok(s) => match self.commit(s)? {
                        ReindexOutcome::Indexed => summary.indexed += 1,
                        ReindexOutcome::Skipped => summary.skipped += 1,
                        ReindexOutcome::Failed(_) => summary.errors += 1,
                    },
                    Err(IndexError::Db(e)) => return Err(IndexError::Db(e)),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "cannot reindex");
                        summary.errors += 1;
                    }
                }
                done += 1;
                progress(IndexProgress { done, total, path });
            }
        }

        if summary.cancelled {
            tracing::info!(done, total, "full reindex cancelled");
            return Ok(summary);
        }

        let types: Vec<String> = self.config.roots.iter().map(|r| r.asset_type.clone()).collect();
        let gone: Vec<String> = self
            .db
            .asset_ids_for_types(&types)?
            .into_iter()
            .filter(|id| !on_disk.contains(id))
            .collect();
        for chunk in gone.chunks(DELETE_BATCH) {
            summary.deleted += self.db.delete_assets(chunk)?;
        }

        let vanished: Vec<String> = self
            .db
            .indexing_error_paths()?
            .into_iter()
            .filter(|p| !Path::new(p).exists())
            .collect();
        self.db.delete_indexing_errors(&vanished)?;

        tracing::info!(
            indexed = summary.indexed,
            skipped = summary.skipped,
            deleted = summary.deleted,
            errors = summary.errors,
            "full reindex finished"
        );
        Ok(summary)
    }

    // ========================================================================
    // Background job
    // ========================================================================

    /// Start a full reindex on a dedicated thread. Returns false when one is
    /// already running.
    pub fn start_background_reindex(&self) -> bool {
        let mut job = self.job();
        if job.status == IndexState::Indexing {
            return false;
        }
        if let Some(old) = job.handle.take() {
            let _ = old.join();
        }
        job.status = IndexState::Indexing;
        // cleared before the thread exists so an immediate stop() sticks
        self.stop.store(false, Ordering::Relaxed);

        let indexer = self.clone();
        job.handle = Some(std::thread::spawn(move || {
            let result = indexer.run_full(&|_| {});
            let mut job = indexer.job();
            match result {
                Ok(summary) => {
                    job.status = IndexState::Idle;
                    job.last_error = None;
                    job.last_run = Some(summary);
                }
                Err(e) => {
                    tracing::error!(error = %e, "background reindex failed");
                    job.status = IndexState::Error;
                    job.last_error = Some(e.to_string());
                }
            }
        }));
        true
    }

    /// Ask a running full reindex to stop after the current file.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Block until the background job (if any) has finished.
    pub fn wait(&self) {
        let handle = self.job().handle.take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                let mut job = self.job();
                job.status = IndexState::Error;
                job.last_error = Some("background reindex panicked".to_string());
            }
        }
    }

    pub fn state(&self) -> IndexState {
        self.job().status
    }

    pub fn get_index_status(&self) -> Result<IndexStatus, IndexError> {
        let file_count = self.walk_candidates().len();
        let total_assets = self.db.count_assets()?;
        let errors = self.db.count_indexing_errors()?;
        let rows = usize::try_from(total_assets).unwrap_or(0);
        let job = self.job();

        Ok(IndexStatus {
            status: job.status,
            freshness: freshness(file_count, rows, self.config.freshness_tolerance),
            total_assets,
            backlog: file_count.saturating_sub(rows) as i64,
            errors,
            last_error: job.last_error.clone(),
            last_run: job.last_run,
        })
    }

    // ========================================================================
    // User facts
    // ========================================================================

    /// Set the rating on the row and in the sidecar.
    pub fn set_rating(&self, id: &str, rating: u8) -> Result<(), IndexError> {
        let row = self.db.get_asset(id)?.ok_or_else(|| IndexError::UnknownAsset(id.to_string()))?;
        if rating > MAX_RATING {
            return Err(ExtractError::InvalidRating(rating).into());
        }
        Sidecar::update(Path::new(&row.abs_path), |s| s.rating = Some(rating))?;
        self.db.set_rating(id, i32::from(rating))?;
        Ok(())
    }

    /// Replace the tag set on the row and in the sidecar.
    pub fn set_tags(&self, id: &str, tags: &[String]) -> Result<Vec<String>, IndexError> {
        let row = self.db.get_asset(id)?.ok_or_else(|| IndexError::UnknownAsset(id.to_string()))?;
        let sidecar = Sidecar::update(Path::new(&row.abs_path), |s| s.set_tags(tags))?;
        self.db.set_tags(id, &sidecar.tags)?;
        Ok(sidecar.tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{ProbeError, ProbeOutput, TagProbe};
    use serde_json::json;
    use tempfile::TempDir;

    /// Serves the scenario prompt graph for every file except `*bad*` ones.
    struct StubProbe;

    impl TagProbe for StubProbe {
        fn probe(&self, path: &Path, _kind: AssetKind) -> Result<ProbeOutput, ProbeError> {
            if path.to_string_lossy().contains("bad") {
                return Err(ProbeError::malformed("png", "bad signature"));
            }
            Ok(ProbeOutput {
                exif: json!({"prompt": {
                    "5": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "sdxl.safetensors"}},
                    "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "a cat", "clip": ["5", 1]}},
                    "7": {"class_type": "KSampler", "inputs": {
                        "model": ["5", 0], "positive": ["6", 0],
                        "seed": 42, "steps": 20, "cfg": 7.0, "sampler_name": "euler"
                    }}
                }}),
                ..ProbeOutput::default()
            })
        }
    }

    fn setup() -> (TempDir, Indexer) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("output");
        fs::create_dir_all(root.join("sub")).unwrap();
        let config = IndexConfig::default()
            .with_roots(vec![IndexRoot::new("output", &root)])
            .with_db_path(dir.path().join("index.db"))
            .with_jobs(Some(2));
        let db = Arc::new(Database::open_at(&config.db_path).unwrap());
        let extractor = Arc::new(Extractor::new(Arc::new(StubProbe), 16));
        (dir, Indexer::new(config, db, extractor))
    }

    fn write(dir: &TempDir, rel: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join("output").join(rel);
        fs::write(&path, bytes).unwrap();
        path
    }

    fn record_with(mtime: f64, size: i64) -> AssetRecord {
        AssetRecord {
            id: "output||a.png".into(),
            asset_type: "output".into(),
            subfolder: String::new(),
            filename: "a.png".into(),
            ext: "png".into(),
            abs_path: "/a.png".into(),
            mtime,
            size,
            kind: "image".into(),
            width: None,
            height: None,
            duration_ms: None,
            rating: 0,
            tags_json: "[]".into(),
            notes: None,
            prompt: None,
            negative: None,
            model: None,
            sampler: None,
            steps: None,
            cfg: None,
            seed: None,
            has_workflow: false,
            workflow_hash: None,
            meta_json: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    // ========================================================================
    // Pure helpers
    // ========================================================================

    #[test]
    fn test_should_reindex() {
        let row = record_with(100.0, 50);
        assert!(!should_reindex(Some(&row), 100.0, 50));
        assert!(should_reindex(Some(&row), 101.0, 50));
        assert!(should_reindex(Some(&row), 100.0, 51));
        assert!(should_reindex(None, 100.0, 50));
    }

    #[test]
    fn test_identity() {
        let root = IndexRoot::new("output", "/data/out");
        let id = AssetIdentity::resolve(&root, Path::new("/data/out/a/b/img.PNG")).unwrap();
        assert_eq!(id.id, "output|a/b|img.PNG");
        assert_eq!(id.subfolder, "a/b");
        assert_eq!(id.ext, "png");
        let top = AssetIdentity::resolve(&root, Path::new("/data/out/img.png")).unwrap();
        assert_eq!(top.id, "output||img.png");
        assert!(AssetIdentity::resolve(&root, Path::new("/elsewhere/img.png")).is_none());
    }

    #[test]
    fn test_freshness() {
        assert_eq!(freshness(0, 0, 0.05), Freshness::Fresh);
        assert_eq!(freshness(100, 97, 0.05), Freshness::Fresh);
        assert_eq!(freshness(100, 90, 0.05), Freshness::Stale);
        assert_eq!(freshness(10, 0, 0.05), Freshness::Stale);
    }

    // ========================================================================
    // Reindexing
    // ========================================================================

    #[test]
    fn test_reindex_one_is_incremental() {
        let (dir, indexer) = setup();
        let path = write(&dir, "a.png", b"one");

        assert_eq!(indexer.reindex_one(&path).unwrap(), ReindexOutcome::Indexed);
        let first = indexer.database().get_asset("output||a.png").unwrap().unwrap();
        assert_eq!(first.prompt.as_deref(), Some("a cat"));
        assert_eq!(first.seed, Some(42));
        assert_eq!(first.model.as_deref(), Some("sdxl"));
        assert!(first.workflow_hash.is_some());
        assert_eq!(indexer.extractor().extraction_count(), 1);

        assert_eq!(indexer.reindex_one(&path).unwrap(), ReindexOutcome::Skipped);
        assert_eq!(indexer.extractor().extraction_count(), 1);
        assert_eq!(indexer.database().get_asset("output||a.png").unwrap().unwrap(), first);
    }

    #[test]
    fn test_failure_keeps_previous_row_and_records_error() {
        let (dir, indexer) = setup();
        let good = write(&dir, "a.png", b"one");
        indexer.reindex_one(&good).unwrap();

        let bad = write(&dir, "bad.png", b"x");
        assert_eq!(indexer.reindex_one(&bad).unwrap(), ReindexOutcome::Failed("malformed_file"));
        let errors = indexer.database().list_indexing_errors(10).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].reason, "malformed_file");
        assert!(indexer.database().get_asset("output||bad.png").unwrap().is_none());

        // a second failure replaces the row rather than appending
        write(&dir, "bad.png", b"xy");
        indexer.reindex_one(&bad).unwrap();
        assert_eq!(indexer.database().count_indexing_errors().unwrap(), 1);
        assert!(indexer.database().get_asset("output||a.png").unwrap().is_some());
    }

    #[test]
    fn test_missing_and_outside() {
        let (dir, indexer) = setup();
        let missing = dir.path().join("output").join("gone.png");
        assert!(matches!(indexer.reindex_one(&missing), Err(IndexError::NotFound(_))));
        let outside = dir.path().join("stray.png");
        fs::write(&outside, b"x").unwrap();
        assert!(matches!(indexer.reindex_one(&outside), Err(IndexError::OutsideRoots(_))));
    }

    #[test]
    fn test_reindex_paths_summary() {
        let (dir, indexer) = setup();
        let a = write(&dir, "a.png", b"a");
        let b = write(&dir, "sub/b.png", b"b");
        let bad = write(&dir, "bad.png", b"c");
        indexer.reindex_one(&a).unwrap();

        let summary = indexer.reindex_paths(&[a, b, bad, dir.path().join("output/none.png")]).unwrap();
        assert_eq!(summary, ReindexSummary { indexed: 1, skipped: 1, errors: 2 });
        let b_row = indexer.database().get_asset("output|sub|b.png").unwrap().unwrap();
        assert_eq!(b_row.subfolder, "sub");
    }

    #[test]
    fn test_reindex_all_deletes_vanished() {
        let (dir, indexer) = setup();
        let a = write(&dir, "a.png", b"a");
        write(&dir, "sub/b.png", b"b");
        write(&dir, "notes.txt", b"ignored");

        let first = indexer.reindex_all().unwrap();
        assert_eq!(first.indexed, 2);
        assert_eq!(first.deleted, 0);
        assert!(!first.cancelled);

        fs::remove_file(&a).unwrap();
        let second = indexer.reindex_all().unwrap();
        assert_eq!(second.skipped, 1);
        assert_eq!(second.deleted, 1);
        assert!(indexer.database().get_asset("output||a.png").unwrap().is_none());
    }

    #[test]
    fn test_sidecar_files_not_indexed() {
        let (dir, indexer) = setup();
        let a = write(&dir, "a.png", b"a");
        Sidecar { rating: Some(3), ..Default::default() }.write(&a).unwrap();
        let summary = indexer.reindex_all().unwrap();
        assert_eq!(summary.indexed, 1);
        let row = indexer.database().get_asset("output||a.png").unwrap().unwrap();
        assert_eq!(row.rating, 3);
    }

    #[test]
    fn test_background_reindex_and_status() {
        let (dir, indexer) = setup();
        write(&dir, "a.png", b"a");
        write(&dir, "b.png", b"b");

        let before = indexer.get_index_status().unwrap();
        assert_eq!(before.status, IndexState::Idle);
        assert_eq!(before.freshness, Freshness::Stale);
        assert_eq!(before.backlog, 2);

        assert!(indexer.start_background_reindex());
        indexer.wait();
        let after = indexer.get_index_status().unwrap();
        assert_eq!(after.status, IndexState::Idle);
        assert_eq!(after.freshness, Freshness::Fresh);
        assert_eq!(after.total_assets, 2);
        assert_eq!(after.last_run.map(|r| r.indexed), Some(2));
    }

    #[test]
    fn test_stop_after_last_file_still_finishes() {
        let (dir, indexer) = setup();
        write(&dir, "a.png", b"a");
        let seen = Mutex::new(0usize);
        let summary = indexer
            .reindex_all_with_progress(&|_| {
                *seen.lock().unwrap() += 1;
                indexer.stop();
            })
            .unwrap();
        // one file, stopped after it: nothing left to cancel
        assert_eq!(summary.indexed, 1);
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_stop_does_not_block_single_file_reindex() {
        let (dir, indexer) = setup();
        indexer.stop();
        let a = write(&dir, "a.png", b"a");
        let b = write(&dir, "b.png", b"b");
        assert_eq!(indexer.reindex_one(&a).unwrap(), ReindexOutcome::Indexed);
        let summary = indexer.reindex_paths(&[b]).unwrap();
        assert_eq!(summary.indexed, 1);
    }

    #[test]
    fn test_stop_right_after_background_start_cancels() {
        let (dir, indexer) = setup();
        for i in 0..40 {
            write(&dir, &format!("f{}.png", i), b"x");
        }
        // a row whose file is gone must survive a cancelled run
        fs::write(dir.path().join("output").join("gone.png"), b"g").unwrap();
        indexer.reindex_one(&dir.path().join("output").join("gone.png")).unwrap();
        fs::remove_file(dir.path().join("output").join("gone.png")).unwrap();

        assert!(indexer.start_background_reindex());
        indexer.stop();
        indexer.wait();

        let status = indexer.get_index_status().unwrap();
        let run = status.last_run.unwrap();
        assert!(run.cancelled);
        assert_eq!(run.deleted, 0);
        assert!(run.indexed < 40);
        assert!(indexer.database().get_asset("output||gone.png").unwrap().is_some());
    }

    #[test]
    fn test_pool_built_once() {
        let (_dir, indexer) = setup();
        let pool = indexer.pool.clone().unwrap();
        assert_eq!(pool.current_num_threads(), 2);
        assert!(Arc::ptr_eq(&pool, indexer.clone().pool.as_ref().unwrap()));
    }

    // ========================================================================
    // User facts
    // ========================================================================

    #[test]
    fn test_out_of_range_sidecar_rating_clamped() {
        let (dir, indexer) = setup();
        let r = write(&dir, "r.png", b"r");
        fs::write(dir.path().join("output").join("r.png.json"), r#"{"rating": 200}"#).unwrap();
        indexer.reindex_one(&r).unwrap();
        let row = indexer.database().get_asset("output||r.png").unwrap().unwrap();
        assert_eq!(row.rating, 5);
    }

    #[test]
    fn test_rating_and_tags_survive_reindex() {
        let (dir, indexer) = setup();
        let a = write(&dir, "a.png", b"a");
        indexer.reindex_one(&a).unwrap();

        indexer.set_rating("output||a.png", 5).unwrap();
        let tags = indexer.set_tags("output||a.png", &["cat".into(), "cat".into(), "best".into()]).unwrap();
        assert_eq!(tags, vec!["cat", "best"]);
        assert!(indexer.set_rating("output||a.png", 7).is_err());
        assert!(matches!(indexer.set_rating("nope", 1), Err(IndexError::UnknownAsset(_))));

        // file changes, sidecar keeps the user facts
        write(&dir, "a.png", b"changed content");
        indexer.reindex_one(&a).unwrap();
        let row = indexer.database().get_asset("output||a.png").unwrap().unwrap();
        assert_eq!(row.rating, 5);
        assert_eq!(row.tags(), vec!["cat", "best"]);
    }
}
