//! Async wrappers for blocking engine operations.
//!
//! Scans, queries and commits map files and may sleep in retry loops. Hosts
//! running on a Tokio runtime call these wrappers so the work runs on the
//! blocking thread pool instead of stalling the executor.
//!
//! # Usage
//!
//! ```rust,ignore
//! use segscan_core::async_ops;
//!
//! async fn refresh(engine: &Engine, filter: &Filter) -> segscan_core::Result<Vec<u32>> {
//!     let segment = engine.open_segment("region")?;
//!     let bound = filter.bind(segment.spec().encoding)?;
//!     let bits = async_ops::scan_async(segment, RecordRange::all(5)?, bound).await?;
//!     Ok(bits.positions())
//! }
//! ```

use parking_lot::Mutex;

use crate::bitvec::BitVector;
use crate::error::{Error, Result};
use crate::filter::BoundFilter;
use crate::query::{ColumnPredicate, QueryOrchestrator, QueryResult};
use crate::scan::{ColumnScanner, RecordRange};
use crate::storage::Segment;
use crate::sync::Arc;
use crate::writer::WriteSession;

fn join_error(e: &tokio::task::JoinError) -> Error {
    Error::Internal(format!("Task join error: {e}"))
}

/// Scans `range` of `segment` on the blocking pool.
///
/// # Errors
///
/// Returns the scan error, or `Error::Internal` if the task panicked.
pub async fn scan_async(
    segment: Arc<Segment>,
    range: RecordRange,
    filter: BoundFilter,
) -> Result<BitVector> {
    tokio::task::spawn_blocking(move || ColumnScanner::new(&segment).scan(range, &filter))
        .await
        .map_err(|e| join_error(&e))?
}

/// Runs a multi-column query on the blocking pool.
///
/// # Errors
///
/// Returns the query error, or `Error::Internal` if the task panicked.
pub async fn query_async(
    orchestrator: Arc<QueryOrchestrator>,
    columns: Vec<ColumnPredicate>,
    range: RecordRange,
) -> Result<QueryResult> {
    tokio::task::spawn_blocking(move || orchestrator.run(&columns, range))
        .await
        .map_err(|e| join_error(&e))?
}

/// Commits a shared session on the blocking pool.
///
/// The retry loop of an online commit sleeps between rounds, so this is
/// the wrapper to use whenever sessions may queue positions.
///
/// # Errors
///
/// Returns the commit error, or `Error::Internal` if the task panicked.
pub async fn commit_async(session: Arc<Mutex<WriteSession>>) -> Result<()> {
    tokio::task::spawn_blocking(move || session.lock().commit())
        .await
        .map_err(|e| join_error(&e))?
}

/// Rolls back a shared session on the blocking pool.
///
/// # Errors
///
/// Returns the rollback error, or `Error::Internal` if the task panicked.
pub async fn rollback_async(session: Arc<Mutex<WriteSession>>) -> Result<()> {
    tokio::task::spawn_blocking(move || session.lock().rollback())
        .await
        .map_err(|e| join_error(&e))?
}

/// Grows a segment by `additional` null records on the blocking pool.
///
/// # Errors
///
/// Returns the I/O error, or `Error::Internal` if the task panicked.
pub async fn reserve_records_async(segment: Arc<Segment>, additional: u32) -> Result<u32> {
    tokio::task::spawn_blocking(move || segment.reserve_records(additional))
        .await
        .map_err(|e| join_error(&e))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filter;
    use crate::metrics::EngineMetrics;
    use crate::storage::{Encoding, NullSentinels, SegmentMut, SegmentSpec, Value};
    use crate::writer::{DatasetLocks, SessionOptions};
    use tempfile::TempDir;

    fn segment(dir: &TempDir) -> Arc<Segment> {
        let segment = Segment::create(
            dir.path().join("region.seg"),
            "testdb",
            SegmentSpec::dimension(Encoding::Int),
            5,
            &NullSentinels::default(),
        )
        .unwrap();
        let mut view = SegmentMut::open(&segment).unwrap();
        for (i, v) in [3, 7, 7, 1, 9].into_iter().enumerate() {
            view.write_value(i as u32 + 1, &Value::Int(v)).unwrap();
        }
        view.flush().unwrap();
        drop(view);
        Arc::new(segment)
    }

    #[tokio::test]
    async fn test_scan_async() {
        let dir = TempDir::new().unwrap();
        let segment = segment(&dir);
        let filter = Filter::eq(7).bind(Encoding::Int).unwrap();

        let bits = scan_async(segment, RecordRange::all(5).unwrap(), filter)
            .await
            .unwrap();

        assert_eq!(bits.positions(), vec![2, 3]);
    }

    #[tokio::test]
    async fn test_query_async() {
        let dir = TempDir::new().unwrap();
        let segment = segment(&dir);
        let columns = vec![ColumnPredicate::new("region", segment, &Filter::gt(5)).unwrap()];
        let orchestrator = Arc::new(QueryOrchestrator::new(Default::default()).unwrap());

        let result = query_async(orchestrator, columns, RecordRange::all(5).unwrap())
            .await
            .unwrap();

        assert_eq!(result.positions(), vec![2, 3, 5]);
    }

    #[tokio::test]
    async fn test_commit_async() {
        let dir = TempDir::new().unwrap();
        let segment = segment(&dir);
        let session = WriteSession::new(
            1,
            Arc::clone(&segment),
            Arc::new(DatasetLocks::new("region")),
            Arc::new(EngineMetrics::new()),
            SessionOptions::default(),
        );
        let session = Arc::new(Mutex::new(session));
        session
            .lock()
            .stage_writes(&[4], &[Value::Int(7)], false, false)
            .unwrap();

        commit_async(Arc::clone(&session)).await.unwrap();

        assert_eq!(segment.read_value(4).unwrap(), Value::Int(7));
    }

    #[tokio::test]
    async fn test_reserve_records_async() {
        let dir = TempDir::new().unwrap();
        let segment = segment(&dir);

        let count = reserve_records_async(Arc::clone(&segment), 10).await.unwrap();

        assert_eq!(count, 15);
        assert_eq!(segment.read_value(15).unwrap(), Value::Null);
    }
}
