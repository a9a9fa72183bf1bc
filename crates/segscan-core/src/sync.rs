//! Synchronization primitives with loom support for concurrency testing.
//!
//! Lock tables and counters import their atomics and `Arc` from here so the
//! same code runs against loom's model checker under `--cfg loom`.
//!
//! ```bash
//! RUSTFLAGS="--cfg loom" cargo test --features loom --release loom
//! ```

#[cfg(loom)]
pub use loom::sync::Arc;

#[cfg(not(loom))]
pub use std::sync::Arc;

#[cfg(loom)]
pub use loom::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[cfg(not(loom))]
pub use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[cfg(loom)]
pub use loom::thread;

#[cfg(not(loom))]
pub use std::thread;
