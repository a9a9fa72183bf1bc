//! Record-level lock tables.
//!
//! Each dataset owns one [`DatasetLocks`] table mapping a record position to
//! the session holding it, the value that session wants to write, and the
//! value read from the segment when the lock was taken. Tables live in a
//! [`LockRegistry`] owned by the engine handle, so two engines (or two tests)
//! never share lock state.

use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::error::Result;
use crate::storage::Value;
use crate::sync::{Arc, AtomicU64, AtomicUsize, Ordering};

/// Write session identifier, unique within one registry.
pub type SessionId = u64;

/// State of one locked position.
#[derive(Debug, Clone, PartialEq)]
pub struct LockEntry {
    /// Session holding the lock.
    pub session: SessionId,
    /// Value to be written at commit.
    pub pending: Value,
    /// Value on disk when the lock was acquired, restored on rollback.
    pub original: Value,
}

/// Outcome of [`DatasetLocks::try_lock`].
#[derive(Debug, Clone, PartialEq)]
pub enum Acquire {
    /// The position was free and is now held by the caller.
    Granted,
    /// The caller already held the position; carries the replaced pending value.
    Reacquired(Value),
    /// Another session holds the position.
    Held {
        /// Current holder.
        holder: SessionId,
    },
}

/// Lock table for one dataset.
#[derive(Debug)]
pub struct DatasetLocks {
    dataset: String,
    entries: Mutex<FxHashMap<u32, LockEntry>>,
    open_sessions: AtomicUsize,
}

impl DatasetLocks {
    /// Creates an empty table.
    #[must_use]
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            entries: Mutex::new(FxHashMap::default()),
            open_sessions: AtomicUsize::new(0),
        }
    }

    /// Dataset this table guards.
    #[must_use]
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Attempts to lock `position` for `session`.
    ///
    /// The check and the insert happen under one guard. `read_original` runs
    /// under that guard only when the position is free, so the captured
    /// original is the value no other session can be changing.
    ///
    /// # Errors
    ///
    /// Propagates the error from `read_original`; the table is unchanged.
    pub fn try_lock<F>(
        &self,
        position: u32,
        session: SessionId,
        pending: Value,
        read_original: F,
    ) -> Result<Acquire>
    where
        F: FnOnce() -> Result<Value>,
    {
        let mut entries = self.entries.lock();
        match entries.get_mut(&position) {
            Some(entry) if entry.session == session => {
                let previous = std::mem::replace(&mut entry.pending, pending);
                Ok(Acquire::Reacquired(previous))
            }
            Some(entry) => Ok(Acquire::Held {
                holder: entry.session,
            }),
            None => {
                let original = read_original()?;
                entries.insert(
                    position,
                    LockEntry {
                        session,
                        pending,
                        original,
                    },
                );
                trace!(dataset = %self.dataset, position, session, "Position locked");
                Ok(Acquire::Granted)
            }
        }
    }

    /// Session holding `position`, if any.
    #[must_use]
    pub fn holder(&self, position: u32) -> Option<SessionId> {
        self.entries.lock().get(&position).map(|e| e.session)
    }

    /// Copy of the entry for `position`.
    #[must_use]
    pub fn entry(&self, position: u32) -> Option<LockEntry> {
        self.entries.lock().get(&position).cloned()
    }

    /// Replaces the pending value of a position held by `session`.
    ///
    /// Returns false if `session` does not hold the position.
    pub fn set_pending(&self, position: u32, session: SessionId, value: Value) -> bool {
        match self.entries.lock().get_mut(&position) {
            Some(entry) if entry.session == session => {
                entry.pending = value;
                true
            }
            _ => false,
        }
    }

    /// Releases the given positions held by `session`. Returns how many were
    /// released; positions held by other sessions are left alone.
    pub fn release(&self, session: SessionId, positions: &[u32]) -> usize {
        let mut entries = self.entries.lock();
        let mut released = 0;
        for position in positions {
            if entries.get(position).is_some_and(|e| e.session == session) {
                entries.remove(position);
                released += 1;
            }
        }
        released
    }

    /// Releases every position held by `session`.
    pub fn release_all(&self, session: SessionId) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.session != session);
        before - entries.len()
    }

    /// Pending values of locked positions in `low..=high`, ascending.
    ///
    /// Reads the current table state without waiting on any session.
    #[must_use]
    pub fn pending_in_range(&self, low: u32, high: u32) -> Vec<(u32, Value)> {
        let mut out: Vec<(u32, Value)> = self
            .entries
            .lock()
            .iter()
            .filter(|(p, _)| (low..=high).contains(*p))
            .map(|(p, e)| (*p, e.pending.clone()))
            .collect();
        out.sort_unstable_by_key(|(p, _)| *p);
        out
    }

    /// Number of locked positions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when no position is locked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Number of sessions currently open on this dataset.
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::Acquire)
    }

    pub(crate) fn session_opened(&self) {
        self.open_sessions.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn session_closed(&self) {
        self.open_sessions.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Per-engine registry of dataset lock tables.
#[derive(Debug)]
pub struct LockRegistry {
    tables: DashMap<String, Arc<DatasetLocks>>,
    next_session: AtomicU64,
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LockRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
            next_session: AtomicU64::new(1),
        }
    }

    /// Lock table for `dataset`, created on first use.
    #[must_use]
    pub fn dataset(&self, dataset: &str) -> Arc<DatasetLocks> {
        if let Some(table) = self.tables.get(dataset) {
            return Arc::clone(table.value());
        }
        Arc::clone(
            self.tables
                .entry(dataset.to_string())
                .or_insert_with(|| Arc::new(DatasetLocks::new(dataset)))
                .value(),
        )
    }

    /// Lock table for `dataset`, if one was ever created.
    #[must_use]
    pub fn get(&self, dataset: &str) -> Option<Arc<DatasetLocks>> {
        self.tables.get(dataset).map(|t| Arc::clone(t.value()))
    }

    /// Allocates a fresh session id.
    pub fn next_session_id(&self) -> SessionId {
        self.next_session.fetch_add(1, Ordering::Relaxed)
    }

    /// Names of datasets with a lock table.
    #[must_use]
    pub fn datasets(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.iter().map(|t| t.key().clone()).collect();
        names.sort_unstable();
        names
    }
}
