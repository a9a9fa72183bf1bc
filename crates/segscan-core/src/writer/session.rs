//! Write sessions: staged record writes with commit, retry and rollback.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use super::locks::{Acquire, DatasetLocks, SessionId};
use crate::config::WriterConfig;
use crate::error::{Error, Result};
use crate::metrics::EngineMetrics;
use crate::storage::{check_position, Segment, SegmentMut, Value};
use crate::sync::Arc;

/// How a session reaches the mapped file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// No lock table: values go straight to the mapping. The caller owns
    /// exclusivity; never mix with online sessions on the same dataset.
    Batch,
    /// Record locks, staged values, commit and rollback.
    #[default]
    Online,
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Opened, nothing staged yet.
    Inactive,
    /// Holding staged writes.
    Active,
    /// Last commit or rollback finished. Staging again re-activates.
    Complete,
    /// A commit failed. Only `rollback` remains valid.
    Failed,
}

/// Per-session settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Batch or online.
    pub mode: WriteMode,
    /// Commit after every successful stage call.
    pub auto_commit: bool,
    /// Total time commit spends retrying queued positions.
    pub retry_timeout: Duration,
    /// Pause between retry rounds.
    pub retry_interval: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&WriterConfig::default())
    }
}

impl SessionOptions {
    /// Options taken from the writer configuration section.
    #[must_use]
    pub fn from_config(config: &WriterConfig) -> Self {
        Self {
            mode: config.default_mode,
            auto_commit: false,
            retry_timeout: config.retry_timeout(),
            retry_interval: config.retry_interval(),
        }
    }

    /// Builder: set mode.
    #[must_use]
    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    /// Builder: enable or disable auto-commit.
    #[must_use]
    pub fn with_auto_commit(mut self, auto_commit: bool) -> Self {
        self.auto_commit = auto_commit;
        self
    }

    /// Builder: set the retry budget.
    #[must_use]
    pub fn with_retry_timeout(mut self, timeout: Duration) -> Self {
        self.retry_timeout = timeout;
        self
    }

    /// Builder: set the retry polling interval.
    #[must_use]
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }
}

/// Why a position was not staged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Held by another session and skipped (`allow_partial`).
    Locked {
        /// Current holder.
        holder: SessionId,
    },
    /// Held by another session and queued for retry at commit.
    Queued {
        /// Holder at stage time.
        holder: SessionId,
    },
}

/// Positions not staged by a call, keyed by position.
pub type RejectedMap = BTreeMap<u32, Rejection>;

/// One writer's scoped sequence of staged writes on one segment.
///
/// Staged values are invisible to plain scans until `commit` writes them
/// into the mapped file. Dropping a session with staged writes releases its
/// locks without writing anything.
pub struct WriteSession {
    id: SessionId,
    segment: Arc<Segment>,
    locks: Arc<DatasetLocks>,
    metrics: Arc<EngineMetrics>,
    options: SessionOptions,
    state: SessionState,
    held: BTreeSet<u32>,
    queued: BTreeMap<u32, Value>,
}

impl std::fmt::Debug for WriteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteSession")
            .field("id", &self.id)
            .field("dataset", &self.segment.dataset())
            .field("mode", &self.options.mode)
            .field("state", &self.state)
            .field("held", &self.held.len())
            .field("queued", &self.queued.len())
            .finish()
    }
}

impl WriteSession {
    pub(crate) fn new(
        id: SessionId,
        segment: Arc<Segment>,
        locks: Arc<DatasetLocks>,
        metrics: Arc<EngineMetrics>,
        options: SessionOptions,
    ) -> Self {
        locks.session_opened();
        debug!(session = id, dataset = %segment.dataset(), mode = ?options.mode, "Session opened");
        Self {
            id,
            segment,
            locks,
            metrics,
            options,
            state: SessionState::Inactive,
            held: BTreeSet::new(),
            queued: BTreeMap::new(),
        }
    }

    /// Session id.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Session options.
    #[must_use]
    pub const fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Segment this session writes to.
    #[must_use]
    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    /// Positions this session holds locks on, ascending.
    #[must_use]
    pub fn held_positions(&self) -> Vec<u32> {
        self.held.iter().copied().collect()
    }

    /// Positions waiting for another session's lock, ascending.
    #[must_use]
    pub fn queued_positions(&self) -> Vec<u32> {
        self.queued.keys().copied().collect()
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.state == SessionState::Failed {
            return Err(Error::SessionState(format!(
                "session {} failed and cannot be reused",
                self.id
            )));
        }
        Ok(())
    }

    /// Stages `values[i]` for `positions[i]`.
    ///
    /// Every position and value is validated before any lock is taken. A
    /// position held by another session is queued when `retry` is set,
    /// skipped when `allow_partial` is set, and otherwise aborts the call:
    /// locks taken by this call are released and `Error::Locked` is returned.
    ///
    /// In batch mode the values are written to the mapping immediately and
    /// the returned map is always empty.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidArgument` if the slices differ in length.
    /// - `Error::Range` for positions outside `[1, record_count]`.
    /// - `Error::InvalidValue` / `Error::TypeMismatch` for unstorable values.
    /// - `Error::Locked` when a conflict aborts the call.
    /// - `Error::SessionState` on a failed session.
    /// - `Error::Io` if the segment cannot be read or mapped; the session
    ///   becomes `Failed` after releasing this call's locks.
    /// - Any commit error when `auto_commit` is set.
    pub fn stage_writes(
        &mut self,
        positions: &[u32],
        values: &[Value],
        allow_partial: bool,
        retry: bool,
    ) -> Result<RejectedMap> {
        self.ensure_usable()?;
        if positions.len() != values.len() {
            return Err(Error::InvalidArgument(format!(
                "{} positions but {} values",
                positions.len(),
                values.len()
            )));
        }
        if positions.is_empty() {
            return Ok(RejectedMap::new());
        }

        let rejected = match self.stage_checked(positions, values, allow_partial, retry) {
            Ok(rejected) => rejected,
            Err(e) if is_storage_failure(&e) => {
                error!(session = self.id, error = %e, "Staging failed");
                self.state = SessionState::Failed;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        if self.options.auto_commit {
            self.commit()?;
        }
        Ok(rejected)
    }

    /// Stages null sentinels for `positions`.
    ///
    /// # Errors
    ///
    /// Same as [`WriteSession::stage_writes`].
    pub fn stage_deletes(
        &mut self,
        positions: &[u32],
        allow_partial: bool,
        retry: bool,
    ) -> Result<RejectedMap> {
        let nulls = vec![Value::Null; positions.len()];
        self.stage_writes(positions, &nulls, allow_partial, retry)
    }

    fn stage_checked(
        &mut self,
        positions: &[u32],
        values: &[Value],
        allow_partial: bool,
        retry: bool,
    ) -> Result<RejectedMap> {
        let count = self.segment.record_count()?;
        let layout = *self.segment.layout();
        for (&position, value) in positions.iter().zip(values) {
            check_position(position, count)?;
            layout.check_value(value)?;
        }

        self.state = SessionState::Active;
        match self.options.mode {
            WriteMode::Batch => {
                self.write_batch(positions, values)?;
                Ok(RejectedMap::new())
            }
            WriteMode::Online => self.stage_online(positions, values, allow_partial, retry),
        }
    }

    fn write_batch(&mut self, positions: &[u32], values: &[Value]) -> Result<()> {
        let segment = Arc::clone(&self.segment);
        let mut view = SegmentMut::open(&segment)?;
        for (&position, value) in positions.iter().zip(values) {
            view.write_value(position, value)?;
        }
        view.flush()
    }

    fn stage_online(
        &mut self,
        positions: &[u32],
        values: &[Value],
        allow_partial: bool,
        retry: bool,
    ) -> Result<RejectedMap> {
        let low = positions.iter().copied().min().unwrap_or(1);
        let high = positions.iter().copied().max().unwrap_or(low);
        let segment = Arc::clone(&self.segment);
        let window = segment.map_records(low, high)?;
        let layout = *self.segment.layout();
        let width = layout.width;

        // Undo log for this call: (position, pending value replaced, if any).
        let mut acquired: Vec<(u32, Option<Value>)> = Vec::new();
        let mut queued_now: Vec<u32> = Vec::new();
        let mut rejected = RejectedMap::new();

        for (&position, value) in positions.iter().zip(values) {
            let read_original = || {
                let start = (position - low) as usize * width;
                layout.decode(&window.bytes()[start..start + width])
            };
            let outcome = self
                .locks
                .try_lock(position, self.id, value.clone(), read_original);

            match outcome {
                Ok(Acquire::Granted) => {
                    self.held.insert(position);
                    self.queued.remove(&position);
                    acquired.push((position, None));
                }
                Ok(Acquire::Reacquired(previous)) => {
                    acquired.push((position, Some(previous)));
                }
                Ok(Acquire::Held { holder }) => {
                    self.metrics.record_conflict();
                    debug!(session = self.id, position, holder, "Position held by another session");
                    if retry {
                        if self.queued.insert(position, value.clone()).is_none() {
                            queued_now.push(position);
                        }
                        rejected.insert(position, Rejection::Queued { holder });
                    } else if allow_partial {
                        rejected.insert(position, Rejection::Locked { holder });
                    } else {
                        self.undo_stage(&acquired, &queued_now);
                        return Err(Error::Locked { position, holder });
                    }
                }
                Err(e) => {
                    self.undo_stage(&acquired, &queued_now);
                    return Err(e);
                }
            }
        }

        debug!(
            session = self.id,
            staged = acquired.len(),
            rejected = rejected.len(),
            "Writes staged"
        );
        Ok(rejected)
    }

    fn undo_stage(&mut self, acquired: &[(u32, Option<Value>)], queued_now: &[u32]) {
        for (position, previous) in acquired.iter().rev() {
            match previous {
                None => {
                    self.locks.release(self.id, &[*position]);
                    self.held.remove(position);
                }
                Some(value) => {
                    self.locks.set_pending(*position, self.id, value.clone());
                }
            }
        }
        for position in queued_now {
            self.queued.remove(position);
        }
        if self.held.is_empty() && self.queued.is_empty() {
            self.state = SessionState::Complete;
        }
    }

    /// Writes every staged value, retries queued positions, stamps the
    /// header and releases this session's locks.
    ///
    /// Queued positions are retried one by one every `retry_interval` until
    /// `retry_timeout` elapses. Positions still held by others then are
    /// dropped and reported in `Error::Timeout`; everything else is
    /// committed and the session stays usable.
    ///
    /// # Errors
    ///
    /// - `Error::Timeout` listing positions that never became free.
    /// - `Error::Io` (or another storage error): the session becomes
    ///   `Failed` and keeps its locks until `rollback` or drop. With
    ///   `auto_commit` the rollback runs immediately.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_usable()?;
        if self.state != SessionState::Active {
            return Ok(());
        }

        let result = match self.options.mode {
            WriteMode::Batch => self.commit_batch(),
            WriteMode::Online => self.commit_online(),
        };

        match result {
            Ok(()) => {
                self.state = SessionState::Complete;
                self.metrics.record_commit();
                debug!(session = self.id, dataset = %self.segment.dataset(), "Session committed");
                Ok(())
            }
            Err(Error::Timeout { positions }) => {
                self.state = SessionState::Complete;
                self.metrics.record_commit();
                self.metrics.record_timeout();
                warn!(
                    session = self.id,
                    dataset = %self.segment.dataset(),
                    ?positions,
                    "Commit gave up on positions still locked"
                );
                Err(Error::Timeout { positions })
            }
            Err(e) => {
                error!(session = self.id, error = %e, "Commit failed");
                self.state = SessionState::Failed;
                if self.options.auto_commit && self.options.mode == WriteMode::Online {
                    if let Err(rollback_err) = self.rollback() {
                        error!(session = self.id, error = %rollback_err, "Automatic rollback failed");
                    }
                }
                Err(e)
            }
        }
    }

    fn commit_batch(&mut self) -> Result<()> {
        let segment = Arc::clone(&self.segment);
        let mut view = SegmentMut::open(&segment)?;
        view.touch_timestamp();
        view.flush()
    }

    fn commit_online(&mut self) -> Result<()> {
        let segment = Arc::clone(&self.segment);
        let mut view = SegmentMut::open(&segment)?;

        for &position in &self.held {
            let entry = self
                .locks
                .entry(position)
                .filter(|e| e.session == self.id)
                .ok_or_else(|| {
                    Error::Internal(format!(
                        "session {} lost its lock on position {position}",
                        self.id
                    ))
                })?;
            view.write_value(position, &entry.pending)?;
        }

        if !self.queued.is_empty() {
            self.retry_queued(&mut view)?;
        }

        view.touch_timestamp();
        view.flush()?;
        drop(view);

        let held: Vec<u32> = std::mem::take(&mut self.held).into_iter().collect();
        self.locks.release(self.id, &held);

        if self.queued.is_empty() {
            Ok(())
        } else {
            let positions: Vec<u32> = std::mem::take(&mut self.queued).into_keys().collect();
            Err(Error::Timeout { positions })
        }
    }

    fn retry_queued(&mut self, view: &mut SegmentMut<'_>) -> Result<()> {
        let deadline = Instant::now() + self.options.retry_timeout;
        loop {
            let attempts: Vec<(u32, Value)> = self
                .queued
                .iter()
                .map(|(p, v)| (*p, v.clone()))
                .collect();
            for (position, value) in attempts {
                let outcome = {
                    let reader = &*view;
                    self.locks
                        .try_lock(position, self.id, value.clone(), || reader.read_value(position))?
                };
                if matches!(outcome, Acquire::Granted | Acquire::Reacquired(_)) {
                    view.write_value(position, &value)?;
                    self.held.insert(position);
                    self.queued.remove(&position);
                    debug!(session = self.id, position, "Queued position acquired");
                }
            }

            let now = Instant::now();
            if self.queued.is_empty() || now >= deadline {
                return Ok(());
            }
            self.metrics.record_retry();
            std::thread::sleep(self.options.retry_interval.min(deadline - now));
        }
    }

    /// Writes back the original value of every held position and releases
    /// this session's locks. Queued positions are dropped.
    ///
    /// Also valid on a session whose commit failed: its locks are kept until
    /// rollback (or drop) so the captured originals can be restored.
    ///
    /// # Errors
    ///
    /// - `Error::SessionState` in batch mode.
    /// - `Error::Io` if restoring fails; locks are released regardless and
    ///   the session becomes `Failed`.
    pub fn rollback(&mut self) -> Result<()> {
        if self.options.mode == WriteMode::Batch {
            return Err(Error::SessionState(
                "batch sessions write through and cannot roll back".to_string(),
            ));
        }
        if self.held.is_empty() && self.queued.is_empty() {
            if self.state == SessionState::Active {
                self.state = SessionState::Complete;
            }
            return Ok(());
        }

        let result = self.restore_originals();
        self.locks.release_all(self.id);
        self.held.clear();
        self.queued.clear();

        match result {
            Ok(()) => {
                if self.state != SessionState::Failed {
                    self.state = SessionState::Complete;
                }
                self.metrics.record_rollback();
                debug!(session = self.id, dataset = %self.segment.dataset(), "Session rolled back");
                Ok(())
            }
            Err(e) => {
                error!(session = self.id, error = %e, "Rollback failed");
                self.state = SessionState::Failed;
                Err(e)
            }
        }
    }

    fn restore_originals(&mut self) -> Result<()> {
        if self.held.is_empty() {
            return Ok(());
        }
        let segment = Arc::clone(&self.segment);
        let mut view = SegmentMut::open(&segment)?;
        for &position in &self.held {
            if let Some(entry) = self.locks.entry(position).filter(|e| e.session == self.id) {
                view.write_value(position, &entry.original)?;
            }
        }
        view.flush()
    }
}

impl Drop for WriteSession {
    fn drop(&mut self) {
        if !self.held.is_empty() || !self.queued.is_empty() {
            let released = self.locks.release_all(self.id);
            warn!(
                session = self.id,
                dataset = %self.segment.dataset(),
                released,
                dropped = self.queued.len(),
                "Session dropped with staged writes; locks released"
            );
        }
        self.locks.session_closed();
    }
}

/// Errors that leave the segment or the lock table in an unknown state.
fn is_storage_failure(err: &Error) -> bool {
    matches!(err, Error::Io(_) | Error::Format(_) | Error::Internal(_))
}
