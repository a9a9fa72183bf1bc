//! Parallel multi-column query orchestration.
//!
//! A query evaluates one filter per column over a common record range. The
//! range is split into `file_parallelism` contiguous sub-ranges; every
//! column gets one output vector that all of its sub-range scans write into.
//! Sub-range scans run on a dedicated rayon pool in waves of at most
//! `segment_parallelism`, and columns run either concurrently (in waves of
//! `file_parallelism`) or one after another. The answer is the bitwise AND of
//! every column's vector.
//!
//! A failing scan stops new waves from being scheduled. Scans already in
//! the failing wave run to completion before the error is returned.

use indexmap::IndexMap;
use rayon::prelude::*;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::bitvec::BitVector;
use crate::config::QueryConfig;
use crate::error::{Error, Result};
use crate::filter::{BoundFilter, Filter};
use crate::metrics::EngineMetrics;
use crate::scan::{ColumnScanner, RecordRange};
use crate::storage::Segment;
use crate::sync::Arc;
use crate::writer::LockRegistry;

/// Per-query parallelism and visibility settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// Sub-ranges per column, and columns scanned concurrently.
    pub file_parallelism: usize,
    /// Sub-range scans in flight per column.
    pub segment_parallelism: usize,
    /// Scan columns concurrently.
    pub concurrent_columns: bool,
    /// Overlay uncommitted writes held in the lock tables.
    pub read_dirty: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self::from_config(&QueryConfig::default(), false)
    }
}

impl QueryOptions {
    /// Options taken from the query configuration section.
    #[must_use]
    pub fn from_config(config: &QueryConfig, read_dirty: bool) -> Self {
        Self {
            file_parallelism: config.file_parallelism,
            segment_parallelism: config.segment_parallelism,
            concurrent_columns: config.concurrent_columns,
            read_dirty,
        }
    }

    /// Builder: set the number of sub-ranges per column.
    #[must_use]
    pub fn with_file_parallelism(mut self, n: usize) -> Self {
        self.file_parallelism = n;
        self
    }

    /// Builder: set the scans in flight per column.
    #[must_use]
    pub fn with_segment_parallelism(mut self, n: usize) -> Self {
        self.segment_parallelism = n;
        self
    }

    /// Builder: scan columns concurrently or sequentially.
    #[must_use]
    pub fn with_concurrent_columns(mut self, on: bool) -> Self {
        self.concurrent_columns = on;
        self
    }

    /// Builder: overlay uncommitted writes.
    #[must_use]
    pub fn with_read_dirty(mut self, on: bool) -> Self {
        self.read_dirty = on;
        self
    }

    /// Rejects zero parallelism.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if either parallelism is zero.
    pub fn validate(&self) -> Result<()> {
        if self.file_parallelism == 0 || self.segment_parallelism == 0 {
            return Err(Error::InvalidArgument(format!(
                "parallelism must be at least 1 (file {}, segment {})",
                self.file_parallelism, self.segment_parallelism
            )));
        }
        Ok(())
    }
}

/// One column of a query: a segment and the filter bound to its encoding.
#[derive(Debug, Clone)]
pub struct ColumnPredicate {
    id: String,
    segment: Arc<Segment>,
    filter: BoundFilter,
}

impl ColumnPredicate {
    /// Binds `filter` to the segment's encoding.
    ///
    /// # Errors
    ///
    /// Propagates binding errors from [`Filter::bind`].
    pub fn new(id: impl Into<String>, segment: Arc<Segment>, filter: &Filter) -> Result<Self> {
        let filter = filter.bind(segment.spec().encoding)?;
        Ok(Self {
            id: id.into(),
            segment,
            filter,
        })
    }

    /// Column identifier used as the result key.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Segment scanned for this column.
    #[must_use]
    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    /// Bound filter.
    #[must_use]
    pub const fn filter(&self) -> &BoundFilter {
        &self.filter
    }
}

/// Splits `range` into at most `parts` contiguous, non-overlapping
/// sub-ranges covering it exactly. The last sub-range absorbs the
/// remainder. `parts` is capped at the range length and raised to 1.
#[must_use]
pub fn partition_range(range: RecordRange, parts: usize) -> Vec<RecordRange> {
    if range.is_empty() || range.low == 0 {
        return Vec::new();
    }
    let total = range.len();
    let parts = u32::try_from(parts).unwrap_or(u32::MAX).clamp(1, total);
    let size = total / parts;

    (0..parts)
        .map(|i| {
            let low = range.low + i * size;
            let high = if i + 1 == parts {
                range.high
            } else {
                low + size - 1
            };
            RecordRange { low, high }
        })
        .collect()
}

/// Bitwise AND of equally shaped vectors.
///
/// # Errors
///
/// - `Error::InvalidArgument` for an empty slice or mismatched shapes.
pub fn intersect(vectors: &[BitVector]) -> Result<BitVector> {
    let (first, rest) = vectors.split_first().ok_or_else(|| {
        Error::InvalidArgument("intersection needs at least one vector".to_string())
    })?;
    let out = first.clone();
    for vector in rest {
        out.and_assign(vector)?;
    }
    Ok(out)
}

/// Per-column vectors and their intersection.
#[derive(Debug, Clone)]
pub struct QueryResult {
    columns: IndexMap<String, BitVector>,
    intersection: BitVector,
    range: RecordRange,
    elapsed: Duration,
}

impl QueryResult {
    /// Column vectors in query order.
    #[must_use]
    pub const fn columns(&self) -> &IndexMap<String, BitVector> {
        &self.columns
    }

    /// Vector of one column.
    #[must_use]
    pub fn column(&self, id: &str) -> Option<&BitVector> {
        self.columns.get(id)
    }

    /// AND of every column vector.
    #[must_use]
    pub const fn intersection(&self) -> &BitVector {
        &self.intersection
    }

    /// Positions matching every column, ascending.
    #[must_use]
    pub fn positions(&self) -> Vec<u32> {
        self.intersection.positions()
    }

    /// Number of positions matching every column.
    #[must_use]
    pub fn matched_count(&self) -> usize {
        self.intersection.count_ones()
    }

    /// Range every column was scanned over, after clamping.
    #[must_use]
    pub const fn range(&self) -> RecordRange {
        self.range
    }

    /// Wall time of the whole query.
    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Consumes the result, returning the column vectors.
    #[must_use]
    pub fn into_columns(self) -> IndexMap<String, BitVector> {
        self.columns
    }
}

/// Runs multi-column queries on a dedicated thread pool.
pub struct QueryOrchestrator {
    pool: rayon::ThreadPool,
    options: QueryOptions,
    locks: Option<Arc<LockRegistry>>,
    metrics: Option<Arc<EngineMetrics>>,
}

impl std::fmt::Debug for QueryOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryOrchestrator")
            .field("threads", &self.pool.current_num_threads())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl QueryOrchestrator {
    /// Builds the pool for `options`.
    ///
    /// The pool holds enough threads for every column wave to have all of
    /// its sub-range scans in flight.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidArgument` for zero parallelism.
    /// - `Error::Internal` if the pool cannot be built.
    pub fn new(options: QueryOptions) -> Result<Self> {
        options.validate()?;
        let columns = if options.concurrent_columns {
            options.file_parallelism
        } else {
            1
        };
        let threads = columns
            .saturating_mul(options.segment_parallelism.min(options.file_parallelism))
            .max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("segscan-query-{i}"))
            .build()
            .map_err(|e| Error::Internal(format!("query pool: {e}")))?;

        Ok(Self {
            pool,
            options,
            locks: None,
            metrics: None,
        })
    }

    /// Lock tables consulted when `read_dirty` is set.
    #[must_use]
    pub fn with_locks(mut self, locks: Arc<LockRegistry>) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Counters updated per query and per scan.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Options this orchestrator was built with.
    #[must_use]
    pub const fn options(&self) -> &QueryOptions {
        &self.options
    }

    /// Scans every column over `range` and intersects the results.
    ///
    /// `range.high` is clamped to the smallest record count among the
    /// columns so every vector has the same shape.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidArgument` for no columns or duplicate column ids.
    /// - `Error::Range` if `range.low` is past the end of any column.
    /// - Any scan error, after the scans of its wave have finished.
    pub fn run(&self, columns: &[ColumnPredicate], range: RecordRange) -> Result<QueryResult> {
        let start = Instant::now();
        if columns.is_empty() {
            return Err(Error::InvalidArgument(
                "query needs at least one column".to_string(),
            ));
        }

        let mut records = u32::MAX;
        for (i, column) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.id == column.id) {
                return Err(Error::InvalidArgument(format!(
                    "column '{}' appears twice",
                    column.id
                )));
            }
            records = records.min(column.segment.record_count()?);
        }
        let range = range.clamp(records)?;
        let parts = partition_range(range, self.options.file_parallelism);
        let vectors: Vec<BitVector> = columns
            .iter()
            .map(|_| BitVector::for_range(range.low, range.high))
            .collect();

        self.pool.install(|| {
            let jobs: Vec<(&ColumnPredicate, &BitVector)> =
                columns.iter().zip(vectors.iter()).collect();
            if self.options.concurrent_columns {
                for wave in jobs.chunks(self.options.file_parallelism) {
                    let results: Vec<Result<()>> = wave
                        .par_iter()
                        .map(|(column, out)| self.scan_column(column, &parts, out))
                        .collect();
                    results.into_iter().collect::<Result<Vec<()>>>()?;
                }
            } else {
                for (column, out) in &jobs {
                    self.scan_column(column, &parts, out)?;
                }
            }
            Ok::<(), Error>(())
        })?;

        let intersection = intersect(&vectors)?;
        let columns: IndexMap<String, BitVector> = columns
            .iter()
            .map(|c| c.id.clone())
            .zip(vectors)
            .collect();

        let elapsed = start.elapsed();
        if let Some(metrics) = &self.metrics {
            metrics.record_query();
        }
        info!(
            columns = columns.len(),
            low = range.low,
            high = range.high,
            matched = intersection.count_ones(),
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "Query complete"
        );

        Ok(QueryResult {
            columns,
            intersection,
            range,
            elapsed,
        })
    }

    /// Scans every sub-range of one column into `out`, in waves.
    fn scan_column(
        &self,
        column: &ColumnPredicate,
        parts: &[RecordRange],
        out: &BitVector,
    ) -> Result<()> {
        let overlay = if self.options.read_dirty {
            self.locks
                .as_ref()
                .and_then(|registry| registry.get(column.segment.dataset()))
        } else {
            None
        };

        let mut scanner = ColumnScanner::new(&column.segment);
        if let Some(locks) = overlay.as_deref() {
            scanner = scanner.with_overlay(locks);
        }
        if let Some(metrics) = self.metrics.as_deref() {
            scanner = scanner.with_metrics(metrics);
        }

        for wave in parts.chunks(self.options.segment_parallelism) {
            let results: Vec<Result<u64>> = wave
                .par_iter()
                .map(|part| scanner.scan_into(*part, &column.filter, out).map(|s| s.matches))
                .collect();
            let matches: u64 = results.into_iter().sum::<Result<u64>>()?;
            debug!(column = %column.id, parts = wave.len(), matches, "Scan wave joined");
        }
        Ok(())
    }
}
