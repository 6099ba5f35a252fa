//! SQLite asset index with Diesel ORM
//!
//! Stores one row per media file, the per-path indexing error table and the
//! schema version registry. Every caller checks out its own pooled
//! connection; WAL mode lets readers and the single writer proceed together.

use std::path::Path;
use std::str::FromStr;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::dsl::sql;
use diesel::sql_types::{Bool, Double, Nullable, Text};
use diesel::sqlite::{Sqlite, SqliteConnection};
use serde::Serialize;
use thiserror::Error;

use crate::schema::*;

/// Current index schema version
pub const CURRENT_SCHEMA: IndexSchema = IndexSchema {
    major: 1,
    minor: 0,
    patch: 0,
    name: "asset-index",
    features: &[
        "prompt_graph_traversal",
        "workflow_conversion",
        "a1111_parameters",
        "sidecar_user_facts",
        "workflow_hash_sha256",
        "fts5_search",
    ],
};

/// Describes the version and capabilities of the stored index
#[derive(Debug, Clone)]
pub struct IndexSchema {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub name: &'static str,
    pub features: &'static [&'static str],
}

impl IndexSchema {
    pub fn version_string(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(&feature)
    }
}

impl std::fmt::Display for IndexSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{} ({})", self.version_string(), self.name)
    }
}

// ============================================================================
// Diesel Models
// ============================================================================

/// Insertable schema version
#[derive(Insertable)]
#[diesel(table_name = schema_versions)]
pub struct NewSchemaVersion<'a> {
    pub version: &'a str,
    pub name: &'a str,
    pub features: &'a str,
    pub introduced_at: &'a str,
}

/// Queryable schema version
#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = schema_versions)]
pub struct StoredSchema {
    pub id: i32,
    pub version: String,
    pub name: String,
    pub features: String,
    pub introduced_at: String,
}

/// One indexed media file. Field order matches the `assets` table.
#[derive(Queryable, Selectable, Insertable, AsChangeset, Debug, Clone, PartialEq, Serialize)]
#[diesel(table_name = assets)]
#[diesel(treat_none_as_null = true)]
pub struct AssetRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub asset_type: String,
    pub subfolder: String,
    pub filename: String,
    pub ext: String,
    pub abs_path: String,
    pub mtime: f64,
    pub size: i64,
    pub kind: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub duration_ms: Option<i64>,
    pub rating: i32,
    pub tags_json: String,
    pub notes: Option<String>,
    pub prompt: Option<String>,
    pub negative: Option<String>,
    pub model: Option<String>,
    pub sampler: Option<String>,
    pub steps: Option<i64>,
    pub cfg: Option<f64>,
    pub seed: Option<i64>,
    pub has_workflow: bool,
    pub workflow_hash: Option<String>,
    pub meta_json: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl AssetRecord {
    pub fn tags(&self) -> Vec<String> {
        serde_json::from_str(&self.tags_json).unwrap_or_default()
    }
}

/// One row per failing path; replaced on each failed attempt.
#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq, Serialize)]
#[diesel(table_name = indexing_errors)]
pub struct IndexingError {
    pub path: String,
    pub reason: String,
    pub details: Option<String>,
    pub last_attempt_at: String,
}

// ============================================================================
// Query Types
// ============================================================================

/// AND-combined asset filters; `None` / empty means unconstrained.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetFilters {
    pub kind: Option<String>,
    pub asset_type: Option<String>,
    pub subfolder: Option<String>,
    pub rating_min: Option<i32>,
    pub has_workflow: Option<bool>,
    pub workflow_hash: Option<String>,
    /// Every tag must be present
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssetSort {
    #[default]
    MtimeDesc,
    MtimeAsc,
    RatingDesc,
    RatingAsc,
    FilenameAsc,
    FilenameDesc,
}

impl AssetSort {
    pub const ALL: [AssetSort; 6] = [
        AssetSort::MtimeDesc,
        AssetSort::MtimeAsc,
        AssetSort::RatingDesc,
        AssetSort::RatingAsc,
        AssetSort::FilenameAsc,
        AssetSort::FilenameDesc,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AssetSort::MtimeDesc => "mtime_desc",
            AssetSort::MtimeAsc => "mtime_asc",
            AssetSort::RatingDesc => "rating_desc",
            AssetSort::RatingAsc => "rating_asc",
            AssetSort::FilenameAsc => "filename_asc",
            AssetSort::FilenameDesc => "filename_desc",
        }
    }
}

impl FromStr for AssetSort {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        AssetSort::ALL
            .into_iter()
            .find(|sort| sort.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DbError::Validation(format!("unknown sort '{}'", s)))
    }
}

/// One page of `query_assets` results.
#[derive(Debug, Clone, Serialize)]
pub struct AssetPage {
    pub assets: Vec<AssetRecord>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

// ============================================================================
// Database Connection
// ============================================================================

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Error type for database operations
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid value: {0}")]
    Validation(String),
}

impl DbError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            DbError::Connection(_) | DbError::Pool(_) => "db_unavailable",
            DbError::Query(_) => "db_write_failed",
            DbError::Serialization(_) => "serialization_failed",
            DbError::Validation(_) => "invalid_value",
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Applied to every connection the pool hands out.
#[derive(Debug, Clone, Copy)]
struct SqlitePragmas;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
        conn.batch_execute("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000; PRAGMA foreign_keys = ON;")
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Quote every whitespace-separated term so user input can't hit FTS syntax.
fn fts_match_expr(text: &str) -> String {
    text.split_whitespace()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Escape `%`, `_` and the escape character itself for a `LIKE ... ESCAPE '\'` pattern.
fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// How a text query narrows the result set.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TextMatch {
    /// FTS5 match expression over `assets_fts`
    Fts(String),
    /// Case-insensitive substring of filename or prompt
    Substring(String),
    Any,
}

fn restrict_text<'a>(query: assets::BoxedQuery<'a, Sqlite>, text: &TextMatch) -> assets::BoxedQuery<'a, Sqlite> {
    match text {
        TextMatch::Fts(expr) => query.filter(
            sql::<Bool>("assets.id IN (SELECT id FROM assets_fts WHERE assets_fts MATCH ")
                .bind::<Text, _>(expr.clone())
                .sql(")"),
        ),
        TextMatch::Substring(t) => {
            let pattern = format!("%{}%", escape_like(t));
            query.filter(
                assets::filename
                    .like(pattern.clone())
                    .escape('\\')
                    .nullable()
                    .or(assets::prompt.like(pattern).escape('\\')),
            )
        }
        TextMatch::Any => query,
    }
}

/// Best FTS match first (bm25 is lower for better matches).
fn order_by_rank<'a>(query: assets::BoxedQuery<'a, Sqlite>, expr: &str) -> assets::BoxedQuery<'a, Sqlite> {
    query
        .order(
            sql::<Nullable<Double>>(
                "(SELECT bm25(assets_fts) FROM assets_fts WHERE assets_fts.id = assets.id AND assets_fts MATCH ",
            )
            .bind::<Text, _>(expr.to_string())
            .sql(")"),
        )
        .then_order_by(assets::id.asc())
}

/// Database connection wrapper with connection pool
pub struct Database {
    pool: DbPool,
    fts: bool,
}

impl Database {
    /// Open database at specified path
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_pool_size(path, 8)
    }

    pub fn open_with_pool_size<P: AsRef<Path>>(path: P, max_size: u32) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(&path_str);
        let pool = Pool::builder()
            .max_size(max_size.max(1))
            .connection_customizer(Box::new(SqlitePragmas))
            .build(manager)
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let mut db = Self { pool, fts: false };
        db.init_schema()?;
        Ok(db)
    }

    fn get_conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Whether full-text search is backed by FTS5.
    pub fn has_fts(&self) -> bool {
        self.fts
    }

    fn init_schema(&mut self) -> Result<()> {
        let mut conn = self.get_conn()?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS schema_versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                version TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                features TEXT NOT NULL,
                introduced_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS assets (
                id TEXT PRIMARY KEY NOT NULL,
                type TEXT NOT NULL,
                subfolder TEXT NOT NULL DEFAULT '',
                filename TEXT NOT NULL,
                ext TEXT NOT NULL,
                abs_path TEXT NOT NULL,
                mtime REAL NOT NULL,
                size INTEGER NOT NULL,
                kind TEXT NOT NULL,
                width INTEGER,
                height INTEGER,
                duration_ms INTEGER,
                rating INTEGER NOT NULL DEFAULT 0,
                tags_json TEXT NOT NULL DEFAULT '[]',
                notes TEXT,
                prompt TEXT,
                negative TEXT,
                model TEXT,
                sampler TEXT,
                steps INTEGER,
                cfg REAL,
                seed INTEGER,
                has_workflow INTEGER NOT NULL DEFAULT 0,
                workflow_hash TEXT,
                meta_json TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS indexing_errors (
                path TEXT PRIMARY KEY NOT NULL,
                reason TEXT NOT NULL,
                details TEXT,
                last_attempt_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_assets_type_subfolder ON assets(type, subfolder)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_assets_mtime ON assets(mtime)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_assets_rating ON assets(rating)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_assets_workflow_hash ON assets(workflow_hash)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_assets_abs_path ON assets(abs_path)").execute(&mut conn)?;

        // FTS5 is optional; without it text queries fall back to LIKE
        self.fts = match diesel::sql_query(
            "CREATE VIRTUAL TABLE IF NOT EXISTS assets_fts USING fts5(id UNINDEXED, filename, prompt, negative, model)",
        )
        .execute(&mut conn)
        {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "FTS5 unavailable, text search uses substring matching");
                false
            }
        };
        drop(conn);

        self.register_schema(&CURRENT_SCHEMA)?;
        Ok(())
    }

    fn register_schema(&self, schema: &IndexSchema) -> Result<()> {
        let mut conn = self.get_conn()?;
        let now = chrono::Local::now().to_rfc3339();
        let features_json = serde_json::to_string(&schema.features)?;

        let new_schema = NewSchemaVersion {
            version: &schema.version_string(),
            name: schema.name,
            features: &features_json,
            introduced_at: &now,
        };

        diesel::insert_or_ignore_into(schema_versions::table)
            .values(&new_schema)
            .execute(&mut conn)?;

        Ok(())
    }

    pub fn stored_schemas(&self) -> Result<Vec<StoredSchema>> {
        let mut conn = self.get_conn()?;
        let rows = schema_versions::table
            .order(schema_versions::id.asc())
            .load::<StoredSchema>(&mut conn)?;
        Ok(rows)
    }

    // ========================================================================
    // Assets
    // ========================================================================

    /// Insert or replace an asset row. `created_at` of an existing row is kept.
    pub fn upsert_asset(&self, record: &AssetRecord) -> Result<()> {
        let mut conn = self.get_conn()?;
        let fts = self.fts;

        conn.transaction::<_, DbError, _>(|conn| {
            let existing_created: Option<String> = assets::table
                .find(&record.id)
                .select(assets::created_at)
                .first(conn)
                .optional()?;

            let mut row = record.clone();
            if let Some(created_at) = existing_created {
                row.created_at = created_at;
            }

            diesel::insert_into(assets::table)
                .values(&row)
                .on_conflict(assets::id)
                .do_update()
                .set(&row)
                .execute(conn)?;

            if fts {
                Self::sync_fts(conn, &row)?;
            }
            Ok(())
        })
    }

    fn sync_fts(conn: &mut SqliteConnection, row: &AssetRecord) -> Result<()> {
        diesel::sql_query("DELETE FROM assets_fts WHERE id = ?")
            .bind::<Text, _>(row.id.as_str())
            .execute(conn)?;
        diesel::sql_query("INSERT INTO assets_fts (id, filename, prompt, negative, model) VALUES (?, ?, ?, ?, ?)")
            .bind::<Text, _>(row.id.as_str())
            .bind::<Text, _>(row.filename.as_str())
            .bind::<Nullable<Text>, _>(row.prompt.as_deref())
            .bind::<Nullable<Text>, _>(row.negative.as_deref())
            .bind::<Nullable<Text>, _>(row.model.as_deref())
            .execute(conn)?;
        Ok(())
    }

    pub fn get_asset(&self, id: &str) -> Result<Option<AssetRecord>> {
        let mut conn = self.get_conn()?;
        let row = assets::table
            .find(id)
            .first::<AssetRecord>(&mut conn)
            .optional()?;
        Ok(row)
    }

    pub fn get_asset_by_path(&self, abs_path: &str) -> Result<Option<AssetRecord>> {
        let mut conn = self.get_conn()?;
        let row = assets::table
            .filter(assets::abs_path.eq(abs_path))
            .first::<AssetRecord>(&mut conn)
            .optional()?;
        Ok(row)
    }

    /// Ids of every row whose `type` is one of `types`.
    pub fn asset_ids_for_types(&self, types: &[String]) -> Result<Vec<String>> {
        let mut conn = self.get_conn()?;
        let ids = assets::table
            .filter(assets::asset_type.eq_any(types))
            .select(assets::id)
            .load::<String>(&mut conn)?;
        Ok(ids)
    }

    pub fn count_assets(&self) -> Result<i64> {
        let mut conn = self.get_conn()?;
        Ok(assets::table.count().get_result(&mut conn)?)
    }

    pub fn delete_assets(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.get_conn()?;
        let fts = self.fts;

        conn.transaction::<_, DbError, _>(|conn| {
            let count = diesel::delete(assets::table.filter(assets::id.eq_any(ids))).execute(conn)?;
            if fts {
                for id in ids {
                    diesel::sql_query("DELETE FROM assets_fts WHERE id = ?")
                        .bind::<Text, _>(id.as_str())
                        .execute(conn)?;
                }
            }
            Ok(count)
        })
    }

    /// Returns false when no row has this id.
    pub fn set_rating(&self, id: &str, rating: i32) -> Result<bool> {
        if !(0..=5).contains(&rating) {
            return Err(DbError::Validation(format!("rating {} out of range 0..=5", rating)));
        }
        let mut conn = self.get_conn()?;
        let now = chrono::Local::now().to_rfc3339();
        let count = diesel::update(assets::table.find(id))
            .set((assets::rating.eq(rating), assets::updated_at.eq(&now)))
            .execute(&mut conn)?;
        Ok(count > 0)
    }

    pub fn set_tags(&self, id: &str, tags: &[String]) -> Result<bool> {
        let mut conn = self.get_conn()?;
        let now = chrono::Local::now().to_rfc3339();
        let tags_json = serde_json::to_string(tags)?;
        let count = diesel::update(assets::table.find(id))
            .set((assets::tags_json.eq(&tags_json), assets::updated_at.eq(&now)))
            .execute(&mut conn)?;
        Ok(count > 0)
    }

    // ========================================================================
    // Querying
    // ========================================================================

    fn filtered<'a>(filters: &'a AssetFilters) -> assets::BoxedQuery<'a, Sqlite> {
        let mut query = assets::table.into_boxed::<Sqlite>();
        if let Some(kind) = &filters.kind {
            query = query.filter(assets::kind.eq(kind));
        }
        if let Some(asset_type) = &filters.asset_type {
            query = query.filter(assets::asset_type.eq(asset_type));
        }
        if let Some(subfolder) = &filters.subfolder {
            query = query.filter(assets::subfolder.eq(subfolder));
        }
        if let Some(rating_min) = filters.rating_min {
            query = query.filter(assets::rating.ge(rating_min));
        }
        if let Some(has_workflow) = filters.has_workflow {
            query = query.filter(assets::has_workflow.eq(has_workflow));
        }
        if let Some(hash) = &filters.workflow_hash {
            query = query.filter(assets::workflow_hash.eq(hash));
        }
        for tag in &filters.tags {
            // exact, case-sensitive element of the tags_json array
            query = query.filter(
                sql::<Bool>("EXISTS (SELECT 1 FROM json_each(assets.tags_json) WHERE json_each.value = ")
                    .bind::<Text, _>(tag.clone())
                    .sql(")"),
            );
        }
        query
    }

    fn sorted<'a>(query: assets::BoxedQuery<'a, Sqlite>, sort: AssetSort) -> assets::BoxedQuery<'a, Sqlite> {
        let query = match sort {
            AssetSort::MtimeDesc => query.order(assets::mtime.desc()),
            AssetSort::MtimeAsc => query.order(assets::mtime.asc()),
            AssetSort::RatingDesc => query.order((assets::rating.desc(), assets::mtime.desc())),
            AssetSort::RatingAsc => query.order((assets::rating.asc(), assets::mtime.desc())),
            AssetSort::FilenameAsc => query.order(assets::filename.asc()),
            AssetSort::FilenameDesc => query.order(assets::filename.desc()),
        };
        query.then_order_by(assets::id.asc())
    }

    /// Filtered, optionally text-searched, sorted and paginated assets.
    ///
    /// With a text query and no explicit sort, results come back in FTS rank
    /// order. Without FTS the text matches as a substring of the filename or
    /// prompt.
    pub fn query_assets(
        &self,
        filters: &AssetFilters,
        text_query: Option<&str>,
        sort: Option<AssetSort>,
        limit: i64,
        offset: i64,
    ) -> Result<AssetPage> {
        let mut conn = self.get_conn()?;
        let limit = limit.max(0);
        let offset = offset.max(0);
        let text = match text_query.map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) if self.fts => TextMatch::Fts(fts_match_expr(t)),
            Some(t) => TextMatch::Substring(t.to_string()),
            None => TextMatch::Any,
        };

        let total: i64 = restrict_text(Self::filtered(filters), &text)
            .count()
            .get_result(&mut conn)?;

        let query = restrict_text(Self::filtered(filters), &text);
        let query = match (&text, sort) {
            (TextMatch::Fts(expr), None) => order_by_rank(query, expr),
            (_, sort) => Self::sorted(query, sort.unwrap_or_default()),
        };
        let assets = query.limit(limit).offset(offset).load::<AssetRecord>(&mut conn)?;

        Ok(AssetPage { assets, total, limit, offset })
    }

    // ========================================================================
    // Indexing Errors
    // ========================================================================

    pub fn upsert_indexing_error(&self, path: &str, reason: &str, details: Option<&str>) -> Result<()> {
        let mut conn = self.get_conn()?;
        let now = chrono::Local::now().to_rfc3339();
        let row = IndexingError {
            path: path.to_string(),
            reason: reason.to_string(),
            details: details.map(String::from),
            last_attempt_at: now,
        };
        diesel::insert_into(indexing_errors::table)
            .values(&row)
            .on_conflict(indexing_errors::path)
            .do_update()
            .set((
                indexing_errors::reason.eq(&row.reason),
                indexing_errors::details.eq(&row.details),
                indexing_errors::last_attempt_at.eq(&row.last_attempt_at),
            ))
            .execute(&mut conn)?;
        Ok(())
    }

    /// Returns true when a row was removed.
    pub fn clear_indexing_error(&self, path: &str) -> Result<bool> {
        let mut conn = self.get_conn()?;
        let count = diesel::delete(indexing_errors::table.find(path)).execute(&mut conn)?;
        Ok(count > 0)
    }

    pub fn delete_indexing_errors(&self, paths: &[String]) -> Result<usize> {
        if paths.is_empty() {
            return Ok(0);
        }
        let mut conn = self.get_conn()?;
        let count = diesel::delete(indexing_errors::table.filter(indexing_errors::path.eq_any(paths)))
            .execute(&mut conn)?;
        Ok(count)
    }

    /// Most recent first.
    pub fn list_indexing_errors(&self, limit: i64) -> Result<Vec<IndexingError>> {
        let mut conn = self.get_conn()?;
        let rows = indexing_errors::table
            .order(indexing_errors::last_attempt_at.desc())
            .limit(limit)
            .load::<IndexingError>(&mut conn)?;
        Ok(rows)
    }

    pub fn indexing_error_paths(&self) -> Result<Vec<String>> {
        let mut conn = self.get_conn()?;
        let paths = indexing_errors::table
            .select(indexing_errors::path)
            .load::<String>(&mut conn)?;
        Ok(paths)
    }

    pub fn count_indexing_errors(&self) -> Result<i64> {
        let mut conn = self.get_conn()?;
        Ok(indexing_errors::table.count().get_result(&mut conn)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_at(dir.path().join("index.db")).unwrap();
        (dir, db)
    }

    fn record(id: &str, filename: &str, mtime: f64) -> AssetRecord {
        AssetRecord {
            id: id.to_string(),
            asset_type: "output".into(),
            subfolder: String::new(),
            filename: filename.to_string(),
            ext: "png".into(),
            abs_path: format!("/out/{}", filename),
            mtime,
            size: 50,
            kind: "image".into(),
            width: Some(512),
            height: Some(512),
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
            created_at: "2024-01-01T00:00:00+00:00".into(),
            updated_at: "2024-01-01T00:00:00+00:00".into(),
        }
    }

    // ========================================================================
    // Schema
    // ========================================================================

    #[test]
    fn test_schema_registered_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.db");
        drop(Database::open_at(&path).unwrap());
        let db = Database::open_at(&path).unwrap();
        let schemas = db.stored_schemas().unwrap();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].version, CURRENT_SCHEMA.version_string());
        assert!(CURRENT_SCHEMA.has_feature("workflow_hash_sha256"));
        assert_eq!(CURRENT_SCHEMA.to_string(), "v1.0.0 (asset-index)");
    }

    // ========================================================================
    // Assets
    // ========================================================================

    #[test]
    fn test_upsert_and_get() {
        let (_dir, db) = open();
        let mut r = record("output||a.png", "a.png", 100.0);
        r.prompt = Some("a cat".into());
        r.seed = Some(-1);
        db.upsert_asset(&r).unwrap();
        assert_eq!(db.get_asset("output||a.png").unwrap(), Some(r.clone()));
        assert_eq!(db.get_asset_by_path("/out/a.png").unwrap().map(|r| r.id), Some(r.id.clone()));
        assert_eq!(db.count_assets().unwrap(), 1);
    }

    #[test]
    fn test_upsert_replaces_fields_keeps_created_at() {
        let (_dir, db) = open();
        let mut r = record("output||a.png", "a.png", 100.0);
        r.prompt = Some("old".into());
        db.upsert_asset(&r).unwrap();

        let mut changed = record("output||a.png", "a.png", 200.0);
        changed.created_at = "2030-01-01T00:00:00+00:00".into();
        changed.prompt = None;
        db.upsert_asset(&changed).unwrap();

        let stored = db.get_asset("output||a.png").unwrap().unwrap();
        assert_eq!(stored.mtime, 200.0);
        assert_eq!(stored.prompt, None);
        assert_eq!(stored.created_at, "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_delete_assets() {
        let (_dir, db) = open();
        db.upsert_asset(&record("output||a.png", "a.png", 1.0)).unwrap();
        db.upsert_asset(&record("output||b.png", "b.png", 2.0)).unwrap();
        assert_eq!(db.delete_assets(&["output||a.png".to_string()]).unwrap(), 1);
        assert_eq!(db.asset_ids_for_types(&["output".to_string()]).unwrap(), vec!["output||b.png"]);
        assert_eq!(db.delete_assets(&[]).unwrap(), 0);
    }

    #[test]
    fn test_rating_and_tags() {
        let (_dir, db) = open();
        db.upsert_asset(&record("output||a.png", "a.png", 1.0)).unwrap();
        assert!(db.set_rating("output||a.png", 4).unwrap());
        assert!(!db.set_rating("missing", 4).unwrap());
        assert!(db.set_rating("output||a.png", 9).is_err());
        assert!(db.set_tags("output||a.png", &["cat".into(), "best".into()]).unwrap());
        let stored = db.get_asset("output||a.png").unwrap().unwrap();
        assert_eq!(stored.rating, 4);
        assert_eq!(stored.tags(), vec!["cat", "best"]);
    }

    // ========================================================================
    // Querying
    // ========================================================================

    fn seeded() -> (TempDir, Database) {
        let (dir, db) = open();
        let mut a = record("output||cat.png", "cat.png", 300.0);
        a.prompt = Some("a fluffy cat on a sofa".into());
        a.rating = 5;
        a.tags_json = r#"["pets","best"]"#.into();
        a.has_workflow = true;
        a.workflow_hash = Some("h1".into());
        let mut b = record("output|sub|dog.png", "dog.png", 200.0);
        b.subfolder = "sub".into();
        b.prompt = Some("a dog".into());
        b.rating = 2;
        b.tags_json = r#"["pets"]"#.into();
        let mut c = record("input||clip.mp4", "clip.mp4", 100.0);
        c.asset_type = "input".into();
        c.kind = "video".into();
        c.prompt = Some("a cat running".into());
        for r in [a, b, c] {
            db.upsert_asset(&r).unwrap();
        }
        (dir, db)
    }

    fn ids(page: &AssetPage) -> Vec<&str> {
        page.assets.iter().map(|a| a.id.as_str()).collect()
    }

    #[test]
    fn test_default_sort_and_pagination() {
        let (_dir, db) = seeded();
        let page = db.query_assets(&AssetFilters::default(), None, None, 2, 0).unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(ids(&page), vec!["output||cat.png", "output|sub|dog.png"]);
        let page = db.query_assets(&AssetFilters::default(), None, None, 2, 2).unwrap();
        assert_eq!(ids(&page), vec!["input||clip.mp4"]);
    }

    #[test]
    fn test_filters_and_combined() {
        let (_dir, db) = seeded();
        let filters = AssetFilters {
            tags: vec!["pets".into()],
            rating_min: Some(3),
            ..Default::default()
        };
        let page = db.query_assets(&filters, None, None, 10, 0).unwrap();
        assert_eq!(ids(&page), vec!["output||cat.png"]);

        let filters = AssetFilters { kind: Some("video".into()), ..Default::default() };
        assert_eq!(db.query_assets(&filters, None, None, 10, 0).unwrap().total, 1);

        let filters = AssetFilters { subfolder: Some("sub".into()), ..Default::default() };
        assert_eq!(ids(&db.query_assets(&filters, None, None, 10, 0).unwrap()), vec!["output|sub|dog.png"]);

        let filters = AssetFilters { workflow_hash: Some("h1".into()), has_workflow: Some(true), ..Default::default() };
        assert_eq!(db.query_assets(&filters, None, None, 10, 0).unwrap().total, 1);
    }

    #[test]
    fn test_text_query() {
        let (_dir, db) = seeded();
        let page = db
            .query_assets(&AssetFilters::default(), Some("cat"), Some(AssetSort::FilenameAsc), 10, 0)
            .unwrap();
        assert_eq!(ids(&page), vec!["output||cat.png", "input||clip.mp4"]);

        let ranked = db.query_assets(&AssetFilters::default(), Some("cat"), None, 10, 0).unwrap();
        assert_eq!(ranked.total, 2);

        let filtered = db
            .query_assets(
                &AssetFilters { asset_type: Some("input".into()), ..Default::default() },
                Some("cat"),
                None,
                10,
                0,
            )
            .unwrap();
        assert_eq!(ids(&filtered), vec!["input||clip.mp4"]);
    }

    #[test]
    fn test_text_query_after_delete() {
        let (_dir, db) = seeded();
        db.delete_assets(&["output||cat.png".to_string()]).unwrap();
        let page = db.query_assets(&AssetFilters::default(), Some("fluffy"), None, 10, 0).unwrap();
        assert_eq!(page.total, 0);
    }

    #[test]
    fn test_text_query_ranked_and_paged_in_sql() {
        let (_dir, db) = open();
        let mut weak = record("output||x1.png", "x1.png", 1.0);
        weak.prompt = Some("a long description of a garden with a single cat somewhere among many flowers".into());
        let mut strong = record("output||x2.png", "x2.png", 2.0);
        strong.prompt = Some("cat".into());
        db.upsert_asset(&weak).unwrap();
        db.upsert_asset(&strong).unwrap();
        for i in 0..20 {
            db.upsert_asset(&record(&format!("output||n{}.png", i), &format!("n{}.png", i), 3.0)).unwrap();
        }

        let first = db.query_assets(&AssetFilters::default(), Some("cat"), None, 1, 0).unwrap();
        assert_eq!(first.total, 2);
        if db.has_fts() {
            assert_eq!(ids(&first), vec!["output||x2.png"]);
            let second = db.query_assets(&AssetFilters::default(), Some("cat"), None, 1, 1).unwrap();
            assert_eq!(ids(&second), vec!["output||x1.png"]);
        }
    }

    #[test]
    fn test_substring_fallback_escapes_wildcards() {
        let (_dir, mut db) = open();
        db.fts = false;
        let mut a = record("output||a.png", "100%_done.png", 1.0);
        a.prompt = Some("plain".into());
        let b = record("output||b.png", "100xxdone.png", 2.0);
        db.upsert_asset(&a).unwrap();
        db.upsert_asset(&b).unwrap();

        let page = db.query_assets(&AssetFilters::default(), Some("%_d"), None, 10, 0).unwrap();
        assert_eq!(ids(&page), vec!["output||a.png"]);
        let none = db.query_assets(&AssetFilters::default(), Some("0_x"), None, 10, 0).unwrap();
        assert_eq!(none.total, 0);
        let upper = db.query_assets(&AssetFilters::default(), Some("PLAIN"), None, 10, 0).unwrap();
        assert_eq!(ids(&upper), vec!["output||a.png"]);
    }

    #[test]
    fn test_tag_filter_is_exact() {
        let (_dir, db) = open();
        let mut a = record("output||a.png", "a.png", 1.0);
        a.tags_json = r#"["cat"]"#.into();
        let mut b = record("output||b.png", "b.png", 2.0);
        b.tags_json = r#"["c_t","Cat"]"#.into();
        db.upsert_asset(&a).unwrap();
        db.upsert_asset(&b).unwrap();

        let tagged = |tag: &str| {
            let filters = AssetFilters { tags: vec![tag.to_string()], ..Default::default() };
            db.query_assets(&filters, None, Some(AssetSort::FilenameAsc), 10, 0).unwrap()
        };
        assert_eq!(ids(&tagged("c_t")), vec!["output||b.png"]);
        assert_eq!(ids(&tagged("cat")), vec!["output||a.png"]);
        assert_eq!(ids(&tagged("Cat")), vec!["output||b.png"]);
        assert_eq!(tagged("ca%").total, 0);
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like(r"50%_a\b"), r"50\%\_a\\b");
    }

    #[test]
    fn test_sort_parse() {
        assert_eq!("rating_desc".parse::<AssetSort>().unwrap(), AssetSort::RatingDesc);
        assert!("size_desc".parse::<AssetSort>().is_err());
        for sort in AssetSort::ALL {
            assert_eq!(sort.as_str().parse::<AssetSort>().unwrap(), sort);
        }
    }

    #[test]
    fn test_fts_match_expr_quotes_terms() {
        assert_eq!(fts_match_expr("a \"cat\"  OR"), "\"a\" \"\"\"cat\"\"\" \"OR\"");
    }

    // ========================================================================
    // Indexing Errors
    // ========================================================================

    #[test]
    fn test_indexing_errors_upsert_not_append() {
        let (_dir, db) = open();
        db.upsert_indexing_error("/out/a.png", "io_error", Some("first")).unwrap();
        db.upsert_indexing_error("/out/a.png", "malformed_file", Some("second")).unwrap();
        let errors = db.list_indexing_errors(10).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].reason, "malformed_file");
        assert_eq!(errors[0].details.as_deref(), Some("second"));

        assert!(db.clear_indexing_error("/out/a.png").unwrap());
        assert!(!db.clear_indexing_error("/out/a.png").unwrap());
        assert_eq!(db.count_indexing_errors().unwrap(), 0);
    }

    #[test]
    fn test_delete_indexing_errors() {
        let (_dir, db) = open();
        db.upsert_indexing_error("/a", "io_error", None).unwrap();
        db.upsert_indexing_error("/b", "io_error", None).unwrap();
        assert_eq!(db.delete_indexing_errors(&["/a".to_string()]).unwrap(), 1);
        assert_eq!(db.indexing_error_paths().unwrap(), vec!["/b"]);
    }
}
