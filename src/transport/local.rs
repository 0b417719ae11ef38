//! In-process transport connecting several engines in one address space.
//!
//! Frames sent during a round are *staged* at the destination. They become
//! visible to `poll_inbound` only after the coordinator calls
//! [`LocalMesh::exchange`], which plays the role of the cluster-wide barrier
//! between two supersteps.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::trace;

use super::MessageManager;
use crate::concurrency::lock;
use crate::error::TransportError;
use crate::fragment::WorkerId;

#[derive(Default)]
struct Mailbox {
    staged: Mutex<Vec<Vec<u8>>>,
    delivered: Mutex<VecDeque<Vec<u8>>>,
}

/// A set of in-process mailboxes, one per worker.
#[derive(Clone)]
pub struct LocalMesh {
    mailboxes: Arc<[Mailbox]>,
}

impl LocalMesh {
    /// Creates a mesh for `workers` workers.
    pub fn new(workers: usize) -> Self {
        Self {
            mailboxes: (0..workers).map(|_| Mailbox::default()).collect(),
        }
    }

    /// Number of workers.
    pub fn workers(&self) -> usize {
        self.mailboxes.len()
    }

    /// Returns the endpoint of `worker`.
    ///
    /// # Errors
    /// [`TransportError::UnknownWorker`] if `worker` is not part of the mesh.
    pub fn endpoint(&self, worker: WorkerId) -> Result<LocalEndpoint, TransportError> {
        if worker >= self.workers() {
            return Err(TransportError::UnknownWorker(worker));
        }
        Ok(LocalEndpoint {
            worker,
            mesh: self.clone(),
            channels: AtomicUsize::new(0),
        })
    }

    /// Makes every staged frame deliverable. Returns the number of frames moved.
    pub fn exchange(&self) -> usize {
        let mut moved = 0;
        for (worker, mailbox) in self.mailboxes.iter().enumerate() {
            let staged = core::mem::take(&mut *lock(&mailbox.staged));
            if staged.is_empty() {
                continue;
            }
            trace!(worker, frames = staged.len(), "delivering staged frames");
            moved += staged.len();
            lock(&mailbox.delivered).extend(staged);
        }
        moved
    }

    /// Number of frames staged or delivered but not yet polled.
    pub fn in_flight(&self) -> usize {
        self.mailboxes
            .iter()
            .map(|m| lock(&m.staged).len() + lock(&m.delivered).len())
            .sum()
    }
}

impl core::fmt::Debug for LocalMesh {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LocalMesh")
            .field("workers", &self.workers())
            .finish()
    }
}

/// One worker's view of a [`LocalMesh`].
#[derive(Debug)]
pub struct LocalEndpoint {
    worker: WorkerId,
    mesh: LocalMesh,
    channels: AtomicUsize,
}

impl LocalEndpoint {
    /// Worker id of this endpoint.
    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    fn ensure_initialized(&self) -> Result<(), TransportError> {
        if self.channels.load(Ordering::Acquire) == 0 {
            return Err(TransportError::NotInitialized);
        }
        Ok(())
    }
}

impl MessageManager for LocalEndpoint {
    fn init_channels(&self, parallelism: usize) -> Result<(), TransportError> {
        self.channels.store(parallelism.max(1), Ordering::Release);
        Ok(())
    }

    fn send_message(&self, worker: WorkerId, payload: Vec<u8>) -> Result<(), TransportError> {
        self.ensure_initialized()?;
        let mailbox = self
            .mesh
            .mailboxes
            .get(worker)
            .ok_or(TransportError::UnknownWorker(worker))?;
        lock(&mailbox.staged).push(payload);
        Ok(())
    }

    fn poll_inbound(&self) -> Result<Option<Vec<u8>>, TransportError> {
        self.ensure_initialized()?;
        Ok(lock(&self.mesh.mailboxes[self.worker].delivered).pop_front())
    }
}
