//! Concurrent record writer.
//!
//! - [`LockRegistry`] / [`DatasetLocks`]: per-dataset record lock tables
//! - [`WriteSession`]: staged writes with commit, retry and rollback
//!
//! Online sessions lock individual positions, so sessions touching disjoint
//! positions never wait on each other. Batch sessions bypass the lock table
//! entirely for bulk loads.

mod locks;
mod session;


pub use locks::{Acquire, DatasetLocks, LockEntry, LockRegistry, SessionId};
pub use session::{
    RejectedMap, Rejection, SessionOptions, SessionState, WriteMode, WriteSession,
};
