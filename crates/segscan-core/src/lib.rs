//! # `SegScan` Core
//!
//! Embedded single-column segment storage with bitmap predicate scans and
//! record-level write sessions.
//!
//! Every column lives in its own segment file: a 64-byte header followed by
//! fixed-width records addressed by 1-based position. Scans map a record
//! range and produce one bit per matching position; multi-column queries
//! scan every column in parallel and intersect the vectors. Writers stage
//! values under per-position locks and publish them at commit.
//!
//! ## Features
//!
//! - **Mapped scans**: one pass over a mapped range per column, with
//!   dedicated loops per encoding
//! - **Shared match vectors**: partitioned scans write disjoint bits of one
//!   atomic vector with no locking
//! - **Record locks**: sessions touching disjoint positions never wait on
//!   each other, with retry queues and rollback
//! - **Parallel queries**: sub-range fan-out on a rayon pool, per-column
//!   vectors and their intersection
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use segscan_core::{Encoding, Engine, Filter, RecordRange, SegmentSpec};
//!
//! let engine = Engine::open_path("./data")?;
//! engine.create_segment("region", SegmentSpec::dimension(Encoding::Int), 5)?;
//! engine.create_segment("qty", SegmentSpec::fact(Encoding::Long), 5)?;
//!
//! let mut session = engine.session("region")?;
//! session.stage_writes(&[1, 2, 3], &[3.into(), 7.into(), 7.into()], false, false)?;
//! session.commit()?;
//!
//! let bits = engine.scan("region", RecordRange::all(5)?, &Filter::eq(7))?;
//! assert_eq!(bits.positions(), vec![2, 3]);
//!
//! let hits = engine.intersect(
//!     &[("region", Filter::eq(7)), ("qty", Filter::gt(100))],
//!     RecordRange::all(5)?,
//! )?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
// =============================================================================
// NUMERIC CAST LINTS
// =============================================================================
// Positions are u32 and slot offsets are usize; the conversions between them
// are bounded by the record count. Prefer try_from() in new code that is not
// on a scan loop.
// =============================================================================
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
// =============================================================================
// STYLISTIC LINTS
// =============================================================================
#![allow(clippy::option_if_let_else)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::derive_partial_eq_without_eq)]
#![allow(clippy::redundant_pub_crate)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::wildcard_imports)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::unused_async)]

pub mod async_ops;
pub mod bitvec;
pub mod config;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod query;
pub mod scan;
pub mod storage;
pub mod sync;
pub mod writer;

pub use bitvec::BitVector;
pub use config::{
    ConfigError, EngineConfig, LoggingConfig, QueryConfig, ScanConfig, StorageConfig,
    WriterConfig,
};
pub use error::{Error, Result};
pub use filter::{Bound, BoundFilter, Comparison, Filter};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use query::{
    intersect, partition_range, ColumnPredicate, QueryOptions, QueryOrchestrator, QueryResult,
};
pub use scan::{ColumnScanner, RecordRange, ScanStats};
pub use storage::{
    Encoding, EncodingFamily, NullSentinels, Segment, SegmentKind, SegmentSpec, Value,
};
pub use writer::{
    LockRegistry, RejectedMap, Rejection, SessionOptions, SessionState, WriteMode, WriteSession,
};

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::sync::Arc;

/// Engine handle owning a data directory, its open segments, the record
/// lock tables and the operation counters.
///
/// Two engines never share lock state, even over the same directory.
pub struct Engine {
    /// Directory holding segment files
    data_dir: PathBuf,
    /// Validated configuration
    config: EngineConfig,
    /// Record lock tables, one per dataset
    locks: Arc<LockRegistry>,
    /// Operation counters
    metrics: Arc<EngineMetrics>,
    /// Orchestrator built from the configured query defaults
    orchestrator: QueryOrchestrator,
    /// Open segments by dataset name
    segments: RwLock<HashMap<String, Arc<Segment>>>,
    /// Shared by session creation, exclusive for truncation
    lifecycle: RwLock<()>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("data_dir", &self.data_dir)
            .field("db_name", &self.config.storage.db_name)
            .field("segments", &self.segments.read().len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Opens or creates the data directory named by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the directory
    /// cannot be created.
    pub fn open(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let data_dir = PathBuf::from(&config.storage.data_dir);
        std::fs::create_dir_all(&data_dir)?;

        let locks = Arc::new(LockRegistry::new());
        let metrics = Arc::new(EngineMetrics::new());
        let orchestrator = QueryOrchestrator::new(QueryOptions::from_config(
            &config.query,
            config.scan.read_dirty,
        ))?
        .with_locks(Arc::clone(&locks))
        .with_metrics(Arc::clone(&metrics));

        info!(
            data_dir = %data_dir.display(),
            db_name = %config.storage.db_name,
            "Engine opened"
        );

        Ok(Self {
            data_dir,
            config,
            locks,
            metrics,
            orchestrator,
            segments: RwLock::new(HashMap::new()),
            lifecycle: RwLock::new(()),
        })
    }

    /// Opens `path` with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(EngineConfig::with_data_dir(path))
    }

    /// Data directory.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Record lock tables.
    #[must_use]
    pub const fn locks(&self) -> &Arc<LockRegistry> {
        &self.locks
    }

    /// Operation counters.
    #[must_use]
    pub const fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    /// File path of dataset `name`.
    #[must_use]
    pub fn segment_path(&self, name: &str) -> PathBuf {
        self.data_dir
            .join(format!("{name}.{}", self.config.storage.file_extension))
    }

    /// Creates segment `name` with `capacity` null records.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidArgument` for an unusable name.
    /// - `Error::SegmentExists` if the file already exists.
    /// - `Error::Format` for an invalid spec.
    pub fn create_segment(
        &self,
        name: &str,
        spec: SegmentSpec,
        capacity: u32,
    ) -> Result<Arc<Segment>> {
        validate_name(name)?;
        let mut segments = self.segments.write();
        if segments.contains_key(name) {
            return Err(Error::SegmentExists(name.to_string()));
        }

        let segment = Arc::new(Segment::create(
            self.segment_path(name),
            &self.config.storage.db_name,
            spec,
            capacity,
            &self.config.nulls,
        )?);
        segments.insert(name.to_string(), Arc::clone(&segment));
        Ok(segment)
    }

    /// Opens segment `name`, validating its header on first use.
    ///
    /// # Errors
    ///
    /// - `Error::SegmentNotFound` if no file exists.
    /// - `Error::Format` if the header is invalid or belongs to another
    ///   database.
    pub fn open_segment(&self, name: &str) -> Result<Arc<Segment>> {
        validate_name(name)?;
        if let Some(segment) = self.segments.read().get(name) {
            return Ok(Arc::clone(segment));
        }

        let path = self.segment_path(name);
        if !path.is_file() {
            return Err(Error::SegmentNotFound(name.to_string()));
        }
        let segment = Arc::new(Segment::open(
            &path,
            &self.config.storage.db_name,
            &self.config.nulls,
        )?);

        let mut segments = self.segments.write();
        let entry = segments
            .entry(name.to_string())
            .or_insert_with(|| Arc::clone(&segment));
        Ok(Arc::clone(entry))
    }

    /// Dataset names with a segment file in the data directory, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn list_segments(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.data_dir)? {
            let path = entry?.path();
            let matches_ext = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == self.config.storage.file_extension);
            if path.is_file() && matches_ext {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort_unstable();
        Ok(names)
    }

    /// Resets segment `name` to zero records.
    ///
    /// # Errors
    ///
    /// - `Error::SessionState` while any session is open on the dataset or
    ///   any position is locked.
    /// - `Error::SegmentNotFound` if no file exists.
    pub fn truncate(&self, name: &str) -> Result<()> {
        let segment = self.open_segment(name)?;
        let _lifecycle = self.lifecycle.write();
        if let Some(table) = self.locks.get(name) {
            if table.open_sessions() > 0 || !table.is_empty() {
                return Err(Error::SessionState(format!(
                    "cannot truncate '{name}': {} open sessions, {} locked positions",
                    table.open_sessions(),
                    table.len()
                )));
            }
        }
        segment.truncate()
    }

    /// Scans dataset `name`, overlaying uncommitted writes when the
    /// configuration enables `scan.read_dirty`.
    ///
    /// # Errors
    ///
    /// Returns binding, range and I/O errors.
    pub fn scan(&self, name: &str, range: RecordRange, filter: &Filter) -> Result<BitVector> {
        self.scan_with(name, range, filter, self.config.scan.read_dirty)
    }

    /// Scans dataset `name` with an explicit overlay choice.
    ///
    /// # Errors
    ///
    /// Returns binding, range and I/O errors.
    pub fn scan_with(
        &self,
        name: &str,
        range: RecordRange,
        filter: &Filter,
        read_dirty: bool,
    ) -> Result<BitVector> {
        let segment = self.open_segment(name)?;
        let bound = filter.bind(segment.spec().encoding)?;
        let overlay = if read_dirty { self.locks.get(name) } else { None };

        let mut scanner = ColumnScanner::new(&segment).with_metrics(&self.metrics);
        if let Some(table) = overlay.as_deref() {
            scanner = scanner.with_overlay(table);
        }
        scanner.scan(range, &bound)
    }

    /// Opens a write session on `name` with the configured writer defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment cannot be opened.
    pub fn session(&self, name: &str) -> Result<WriteSession> {
        self.session_with(name, SessionOptions::from_config(&self.config.writer))
    }

    /// Opens a write session on `name` with explicit options.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment cannot be opened.
    pub fn session_with(&self, name: &str, options: SessionOptions) -> Result<WriteSession> {
        let segment = self.open_segment(name)?;
        let _lifecycle = self.lifecycle.read();
        let id = self.locks.next_session_id();
        debug!(session = id, dataset = name, "Opening session");
        Ok(WriteSession::new(
            id,
            segment,
            self.locks.dataset(name),
            Arc::clone(&self.metrics),
            options,
        ))
    }

    /// Runs a multi-column query with the configured defaults. Each column
    /// is keyed by its dataset name in the result.
    ///
    /// # Errors
    ///
    /// Returns binding, range and scan errors.
    pub fn query(&self, columns: &[(&str, Filter)], range: RecordRange) -> Result<QueryResult> {
        let columns = self.column_predicates(columns)?;
        self.orchestrator.run(&columns, range)
    }

    /// Runs a multi-column query with explicit options.
    ///
    /// # Errors
    ///
    /// Returns binding, range and scan errors, or `Error::InvalidArgument`
    /// for zero parallelism.
    pub fn query_with(
        &self,
        columns: &[(&str, Filter)],
        range: RecordRange,
        options: QueryOptions,
    ) -> Result<QueryResult> {
        let columns = self.column_predicates(columns)?;
        QueryOrchestrator::new(options)?
            .with_locks(Arc::clone(&self.locks))
            .with_metrics(Arc::clone(&self.metrics))
            .run(&columns, range)
    }

    /// Positions matching every column filter, ascending.
    ///
    /// # Errors
    ///
    /// See [`Engine::query`].
    pub fn intersect(&self, columns: &[(&str, Filter)], range: RecordRange) -> Result<Vec<u32>> {
        Ok(self.query(columns, range)?.positions())
    }

    fn column_predicates(&self, columns: &[(&str, Filter)]) -> Result<Vec<ColumnPredicate>> {
        columns
            .iter()
            .map(|(name, filter)| ColumnPredicate::new(*name, self.open_segment(name)?, filter))
            .collect()
    }
}

/// Dataset names become file stems and checksum input.
fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        && !name.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "invalid dataset name '{name}': use 1-128 ASCII letters, digits, '_', '-' or '.'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn engine() -> (tempfile::TempDir, Engine) {
        let dir = tempdir().unwrap();
        let engine = Engine::open_path(dir.path()).unwrap();
        (dir, engine)
    }

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().copied().map(Value::Int).collect()
    }

    #[test]
    fn test_engine_open() {
        let (_dir, engine) = engine();
        assert!(engine.list_segments().unwrap().is_empty());
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let dir = tempdir().unwrap();
        let mut config = EngineConfig::with_data_dir(dir.path());
        config.storage.db_name = String::new();

        assert!(matches!(Engine::open(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_create_and_list_segments() {
        let (_dir, engine) = engine();

        engine
            .create_segment("region", SegmentSpec::dimension(Encoding::Int), 5)
            .unwrap();
        engine
            .create_segment("price", SegmentSpec::fact(Encoding::Double), 5)
            .unwrap();

        assert_eq!(engine.list_segments().unwrap(), vec!["price", "region"]);
    }

    #[test]
    fn test_duplicate_segment_error() {
        let (_dir, engine) = engine();
        engine
            .create_segment("region", SegmentSpec::dimension(Encoding::Int), 5)
            .unwrap();

        let result = engine.create_segment("region", SegmentSpec::dimension(Encoding::Int), 5);

        assert!(matches!(result, Err(Error::SegmentExists(_))));
    }

    #[test]
    fn test_invalid_names_are_rejected() {
        let (_dir, engine) = engine();
        for name in ["", "../x", "a/b", ".hidden", "a|b"] {
            let result = engine.create_segment(name, SegmentSpec::dimension(Encoding::Int), 1);
            assert!(matches!(result, Err(Error::InvalidArgument(_))), "{name}");
        }
    }

    #[test]
    fn test_open_missing_segment() {
        let (_dir, engine) = engine();
        assert!(matches!(
            engine.open_segment("nope"),
            Err(Error::SegmentNotFound(_))
        ));
    }

    #[test]
    fn test_reopen_from_disk() {
        let dir = tempdir().unwrap();
        {
            let engine = Engine::open_path(dir.path()).unwrap();
            engine
                .create_segment("region", SegmentSpec::dimension(Encoding::Int), 3)
                .unwrap();
            let mut session = engine.session("region").unwrap();
            session.stage_writes(&[2], &ints(&[7]), false, false).unwrap();
            session.commit().unwrap();
        }

        let engine = Engine::open_path(dir.path()).unwrap();
        let bits = engine
            .scan("region", RecordRange::all(3).unwrap(), &Filter::eq(7))
            .unwrap();

        assert_eq!(bits.positions(), vec![2]);
    }

    #[test]
    fn test_other_database_cannot_open_segment() {
        let dir = tempdir().unwrap();
        {
            let engine = Engine::open_path(dir.path()).unwrap();
            engine
                .create_segment("region", SegmentSpec::dimension(Encoding::Int), 3)
                .unwrap();
        }
        let mut config = EngineConfig::with_data_dir(dir.path());
        config.storage.db_name = "other".to_string();
        let engine = Engine::open(config).unwrap();

        assert!(matches!(engine.open_segment("region"), Err(Error::Format(_))));
    }

    #[test]
    fn test_scenario_write_then_rescan() {
        // Arrange
        let (_dir, engine) = engine();
        engine
            .create_segment("region", SegmentSpec::dimension(Encoding::Int), 5)
            .unwrap();
        let mut loader = engine
            .session_with("region", SessionOptions::default().with_mode(WriteMode::Batch))
            .unwrap();
        loader
            .stage_writes(&[1, 2, 3, 4, 5], &ints(&[3, 7, 7, 1, 9]), false, false)
            .unwrap();
        loader.commit().unwrap();
        drop(loader);
        let all = RecordRange::all(5).unwrap();

        // Act
        let before = engine.scan("region", all, &Filter::eq(7)).unwrap();
        let between = engine.scan("region", all, &Filter::between(3, 7)).unwrap();
        let mut session = engine.session("region").unwrap();
        session.stage_writes(&[4], &ints(&[7]), false, false).unwrap();
        session.commit().unwrap();
        let after = engine.scan("region", all, &Filter::eq(7)).unwrap();

        // Assert
        assert_eq!(before.positions(), vec![2, 3]);
        assert_eq!(between.positions(), vec![1, 2, 3]);
        assert_eq!(after.positions(), vec![2, 3, 4]);
    }

    #[test]
    fn test_scan_with_read_dirty() {
        let (_dir, engine) = engine();
        engine
            .create_segment("region", SegmentSpec::dimension(Encoding::Int), 3)
            .unwrap();
        let mut session = engine.session("region").unwrap();
        session.stage_writes(&[1], &ints(&[7]), false, false).unwrap();
        let all = RecordRange::all(3).unwrap();

        let committed = engine.scan_with("region", all, &Filter::eq(7), false).unwrap();
        let dirty = engine.scan_with("region", all, &Filter::eq(7), true).unwrap();

        assert!(committed.positions().is_empty());
        assert_eq!(dirty.positions(), vec![1]);
    }

    #[test]
    fn test_truncate_requires_idle_dataset() {
        let (_dir, engine) = engine();
        engine
            .create_segment("region", SegmentSpec::dimension(Encoding::Int), 3)
            .unwrap();
        let session = engine.session("region").unwrap();

        assert!(matches!(
            engine.truncate("region"),
            Err(Error::SessionState(_))
        ));

        drop(session);
        engine.truncate("region").unwrap();
        engine.truncate("region").unwrap();
        assert_eq!(engine.open_segment("region").unwrap().record_count().unwrap(), 0);
    }

    #[test]
    fn test_query_and_intersect() {
        let (_dir, engine) = engine();
        engine
            .create_segment("region", SegmentSpec::dimension(Encoding::Int), 4)
            .unwrap();
        engine
            .create_segment("qty", SegmentSpec::fact(Encoding::Long), 4)
            .unwrap();
        let mut s1 = engine.session("region").unwrap();
        s1.stage_writes(&[1, 2, 3, 4], &ints(&[1, 2, 1, 2]), false, false)
            .unwrap();
        s1.commit().unwrap();
        let mut s2 = engine.session("qty").unwrap();
        s2.stage_writes(&[1, 3, 4], &ints(&[50, 500, 5000]), false, false)
            .unwrap();
        s2.commit().unwrap();
        let all = RecordRange::all(4).unwrap();
        let columns = [("region", Filter::eq(1)), ("qty", Filter::gt(100))];

        let result = engine.query(&columns, all).unwrap();
        let hits = engine.intersect(&columns, all).unwrap();
        let sequential = engine
            .query_with(
                &columns,
                all,
                QueryOptions::default()
                    .with_file_parallelism(1)
                    .with_concurrent_columns(false),
            )
            .unwrap();

        assert_eq!(result.column("qty").unwrap().positions(), vec![3, 4]);
        assert_eq!(hits, vec![3]);
        assert_eq!(sequential.positions(), hits);
        assert_eq!(engine.metrics().snapshot().queries, 3);
    }

    #[test]
    fn test_inverted_range_is_range_error() {
        let (_dir, engine) = engine();
        engine
            .create_segment("region", SegmentSpec::dimension(Encoding::Int), 8)
            .unwrap();
        let inverted = RecordRange { low: 5, high: 2 };
        let columns = [("region", Filter::eq(1))];

        let scanned = engine.scan("region", inverted, &Filter::eq(1));
        let queried = engine.query_with(
            &columns,
            inverted,
            QueryOptions::default().with_file_parallelism(2),
        );

        assert!(matches!(scanned, Err(Error::Range(_))));
        assert!(matches!(queried, Err(Error::Range(_))));
    }

    #[test]
    fn test_engines_do_not_share_locks() {
        let dir = tempdir().unwrap();
        let first = Engine::open_path(dir.path()).unwrap();
        first
            .create_segment("region", SegmentSpec::dimension(Encoding::Int), 3)
            .unwrap();
        let second = Engine::open_path(dir.path()).unwrap();
        let mut a = first.session("region").unwrap();
        a.stage_writes(&[1], &ints(&[5]), false, false).unwrap();

        let mut b = second.session("region").unwrap();
        let rejected = b.stage_writes(&[1], &ints(&[6]), false, false).unwrap();

        assert!(rejected.is_empty());
        assert!(second.locks().dataset("region").holder(1).is_some());
    }
}
