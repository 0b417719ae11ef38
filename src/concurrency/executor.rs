//! Fixed-size batch executor with dynamic chunk claiming.
//!
//! Every call splits `[0, bound)` into fixed-size chunks. All pool threads
//! claim chunks through one shared atomic cursor until the bound is
//! exhausted, which balances skewed active sets without a scheduler. The call
//! returns only after every thread has left its claim loop, so no two phases
//! of a superstep can overlap.
//!
//! Because the cursor hands out every chunk exactly once, the chunks can be
//! turned into disjoint `&mut` sub-slices of one buffer
//! ([`BatchExecutor::run_chunks_mut`]); concurrent writers never alias.

use core::sync::atomic::{AtomicUsize, Ordering};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};

use crossbeam_utils::CachePadded;
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::lock;
use crate::error::{BoxError, PieError, Result};

/// A reusable pool of `parallelism` threads driven by an atomic chunk cursor.
pub struct BatchExecutor {
    pool: ThreadPool,
    parallelism: usize,
    batch_size: usize,
}

impl BatchExecutor {
    /// Builds a pool of `parallelism` threads claiming `batch_size` indices at a time.
    ///
    /// # Errors
    /// Returns [`PieError::Config`] for zero sizes and [`PieError::ThreadPool`]
    /// if the threads cannot be spawned.
    pub fn new(parallelism: usize, batch_size: usize) -> Result<Self> {
        if parallelism == 0 {
            return Err(PieError::Config("parallelism must be > 0".into()));
        }
        if batch_size == 0 {
            return Err(PieError::Config("batch_size must be > 0".into()));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(parallelism)
            .thread_name(|i| format!("pie-worker-{i}"))
            .build()?;
        Ok(Self {
            pool,
            parallelism,
            batch_size,
        })
    }

    /// Number of pool threads.
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Default chunk size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Runs `task(start, end, thread)` over `[0, bound)` in chunks of [`batch_size`](Self::batch_size).
    ///
    /// # Errors
    /// The first task failure (error or panic) is returned as [`PieError::Task`]
    /// after all threads have joined.
    pub fn run<F, E>(&self, bound: usize, task: F) -> Result<()>
    where
        F: Fn(usize, usize, usize) -> core::result::Result<(), E> + Sync,
        E: Into<BoxError>,
    {
        self.run_with_batch(bound, self.batch_size, task)
    }

    /// Like [`run`](Self::run) with an explicit chunk size.
    ///
    /// # Errors
    /// See [`run`](Self::run).
    ///
    /// # Panics
    /// Panics if `batch == 0`.
    pub fn run_with_batch<F, E>(&self, bound: usize, batch: usize, task: F) -> Result<()>
    where
        F: Fn(usize, usize, usize) -> core::result::Result<(), E> + Sync,
        E: Into<BoxError>,
    {
        assert!(batch != 0, "batch must be > 0");
        if bound == 0 {
            return Ok(());
        }

        let cursor = CachePadded::new(AtomicUsize::new(0));
        let failure: Mutex<Option<PieError>> = Mutex::new(None);

        self.pool.broadcast(|ctx| {
            let thread = ctx.index();
            loop {
                let start = cursor.fetch_add(batch, Ordering::Relaxed);
                if start >= bound {
                    break;
                }
                let end = start.saturating_add(batch).min(bound);
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| task(start, end, thread)));
                let err = match outcome {
                    Ok(Ok(())) => continue,
                    Ok(Err(e)) => PieError::Task {
                        thread,
                        source: e.into(),
                    },
                    Err(payload) => PieError::Task {
                        thread,
                        source: Box::new(PieError::Panicked(panic_message(payload.as_ref()))),
                    },
                };
                let mut slot = lock(&failure);
                if slot.is_none() {
                    *slot = Some(err);
                }
                break;
            }
        });

        match failure.into_inner().unwrap_or_else(PoisonError::into_inner) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Runs `task(start, chunk, thread)` over disjoint mutable chunks of `data`.
    ///
    /// `chunk` is `data[start..start + chunk.len()]`.
    ///
    /// # Errors
    /// See [`run`](Self::run).
    pub fn run_chunks_mut<T, F, E>(&self, data: &mut [T], task: F) -> Result<()>
    where
        T: Send,
        F: Fn(usize, &mut [T], usize) -> core::result::Result<(), E> + Sync,
        E: Into<BoxError>,
    {
        let len = data.len();
        let base = SharedMutPtr(data.as_mut_ptr());
        self.run(len, |start, end, thread| {
            // SAFETY: the cursor yields each `[start, end)` exactly once and every
            // range lies inside `data`, so the sub-slices are disjoint and in bounds.
            // `data` stays mutably borrowed until `run` has joined all threads.
            let chunk = unsafe { core::slice::from_raw_parts_mut(base.get().add(start), end - start) };
            task(start, chunk, thread)
        })
    }
}

impl core::fmt::Debug for BatchExecutor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BatchExecutor")
            .field("parallelism", &self.parallelism)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

/// Raw base pointer shared by the chunk tasks of one `run_chunks_mut` call.
struct SharedMutPtr<T>(*mut T);

impl<T> SharedMutPtr<T> {
    // Accessed through a method so closures capture the whole wrapper.
    #[inline(always)]
    fn get(&self) -> *mut T {
        self.0
    }
}

// SAFETY: only used to derive disjoint sub-slices of a `&mut [T]` with `T: Send`.
unsafe impl<T: Send> Send for SharedMutPtr<T> {}
unsafe impl<T: Send> Sync for SharedMutPtr<T> {}

fn panic_message(payload: &(dyn core::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
