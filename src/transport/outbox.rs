//! Per-worker staging of outbound entries.

use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tracing::trace;

use super::{codec, FrameKind, MessageManager};
use crate::concurrency::{lock, BatchExecutor};
use crate::error::{PieError, Result};
use crate::fragment::{GlobalId, WorkerId};

/// Entries grouped by destination worker, filled concurrently by pool threads.
pub(crate) struct Outbox<T> {
    buckets: Box<[Mutex<Vec<(GlobalId, T)>>]>,
}

impl<T> Outbox<T> {
    pub(crate) fn new(workers: usize) -> Self {
        Self {
            buckets: (0..workers).map(|_| Mutex::new(Vec::new())).collect(),
        }
    }

    pub(crate) fn workers(&self) -> usize {
        self.buckets.len()
    }

    /// Appends a thread-local batch for `worker`.
    pub(crate) fn extend(&self, worker: WorkerId, entries: Vec<(GlobalId, T)>) {
        if !entries.is_empty() {
            lock(&self.buckets[worker]).extend(entries);
        }
    }

    /// Appends thread-local batches indexed by worker.
    pub(crate) fn extend_all(&self, local: Vec<Vec<(GlobalId, T)>>) {
        for (worker, entries) in local.into_iter().enumerate() {
            self.extend(worker, entries);
        }
    }
}

impl<T: Serialize + Send + Sync> Outbox<T> {
    /// Sends one `kind` frame to every worker with a non-empty bucket.
    ///
    /// Returns the number of entries sent.
    pub(crate) fn send<M: MessageManager>(
        self,
        transport: &M,
        executor: &BatchExecutor,
        kind: FrameKind,
        round: u32,
        source: WorkerId,
    ) -> Result<usize> {
        let buckets: Vec<Vec<(GlobalId, T)>> = self
            .buckets
            .into_vec()
            .into_iter()
            .map(|b| b.into_inner().unwrap_or_else(PoisonError::into_inner))
            .collect();
        let sent = AtomicUsize::new(0);
        executor.run_with_batch(buckets.len(), 1, |worker, _, _| {
            let entries = &buckets[worker];
            if entries.is_empty() {
                return Ok(());
            }
            let frame = codec::encode(kind, round, source, entries)?;
            trace!(to = worker, ?kind, entries = entries.len(), bytes = frame.len(), "sending frame");
            transport.send_message(worker, frame)?;
            sent.fetch_add(entries.len(), Ordering::Relaxed);
            Ok::<(), PieError>(())
        })?;
        Ok(sent.into_inner())
    }
}
