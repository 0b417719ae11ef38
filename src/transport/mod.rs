//! Cross-worker message transport.
//!
//! The engine talks to the network only through [`MessageManager`]: it sends
//! encoded frames addressed to a worker and drains inbound frames until none
//! are buffered. [`LocalMesh`] is an in-process implementation.

pub mod codec;
pub mod local;
mod outbox;

pub use codec::{FrameHeader, FrameKind};
pub use local::{LocalEndpoint, LocalMesh};
pub(crate) use outbox::Outbox;

use crate::error::{PieError, Result, TransportError};
use crate::fragment::{Fragment, FragmentId, LocalId, WorkerId};

/// Network side of a partition.
pub trait MessageManager: Send + Sync {
    /// Prepares channels for `parallelism` concurrent senders.
    ///
    /// # Errors
    /// Transport specific.
    fn init_channels(&self, parallelism: usize) -> Result<(), TransportError>;

    /// Queues `payload` for delivery to `worker`.
    ///
    /// # Errors
    /// Transport specific; the engine treats every error as fatal.
    fn send_message(&self, worker: WorkerId, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Returns the next buffered inbound frame, or `None` when drained.
    ///
    /// # Errors
    /// Transport specific; the engine treats every error as fatal.
    fn poll_inbound(&self) -> Result<Option<Vec<u8>>, TransportError>;
}

/// Maps local vertices of a fragment to the workers that own them.
pub struct Router<'a, F> {
    fragment: &'a F,
    workers: &'a [WorkerId],
    worker_count: usize,
}

impl<'a, F: Fragment> Router<'a, F> {
    /// Builds a router over `workers`, the fragment-id to worker-id table.
    ///
    /// # Errors
    /// [`PieError::Config`] if the table does not cover every fragment.
    pub fn new(fragment: &'a F, workers: &'a [WorkerId]) -> Result<Self> {
        if workers.len() != fragment.fragment_count() {
            return Err(PieError::Config(format!(
                "worker table has {} entries for {} fragments",
                workers.len(),
                fragment.fragment_count()
            )));
        }
        let worker_count = workers.iter().copied().max().map_or(0, |w| w + 1);
        Ok(Self {
            fragment,
            workers,
            worker_count,
        })
    }

    /// The routed fragment.
    pub fn fragment(&self) -> &'a F {
        self.fragment
    }

    /// One past the largest worker id in the table.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Worker hosting fragment `fid`.
    #[inline]
    pub fn worker_of_fragment(&self, fid: FragmentId) -> WorkerId {
        self.workers[fid]
    }

    /// Worker owning the vertex `lid`.
    #[inline]
    pub fn worker_of(&self, lid: LocalId) -> WorkerId {
        self.workers[self.fragment.owner_fragment(lid)]
    }
}
