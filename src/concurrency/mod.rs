//! Concurrency primitives the superstep engine is built on.
//!
//! Important: only the bitsets carry built-in synchronization. Everything
//! else relies on the executor's barrier and its disjoint chunk ownership.

pub mod bitset;
pub mod executor;

pub use bitset::AtomicBitset;
pub use executor::BatchExecutor;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks `mutex`, ignoring poisoning.
///
/// A poisoned lock means a task panicked mid-phase; that panic is already
/// reported as the round's failure, so the data is only read for cleanup.
#[inline]
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
