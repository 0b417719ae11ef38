//! Per-vertex message aggregation with inner/outer routing.
//!
//! Every local vertex has one optional message slot. Slots are grouped into
//! segments of [`SEGMENT_LEN`] consecutive ids, one lock per segment, so
//! concurrent merges from different pool threads only contend when they hit
//! the same segment.
//!
//! Messages are split when they are added: inner destinations are merged and
//! activated in the next-round set right away, outer destinations are merged
//! (sender-side combining) and marked for the flush that ships them to their
//! owning worker.

use std::sync::Mutex;

use crossbeam_utils::CachePadded;
use serde::Serialize;

use crate::concurrency::{lock, AtomicBitset, BatchExecutor};
use crate::error::{PieError, Result};
use crate::fragment::{Fragment, GlobalId, LocalId, WorkerId};
use crate::transport::{FrameKind, MessageManager, Outbox, Router};

/// Number of consecutive local ids guarded by one lock.
pub const SEGMENT_LEN: usize = 64;

type Segment<M> = CachePadded<Mutex<Box<[Option<M>]>>>;

/// Message slots for one fragment.
pub struct MessageStore<M> {
    inner: usize,
    total: usize,
    segments: Box<[Segment<M>]>,
    /// Outer slots holding a message, indexed by `lid - inner`.
    outer_touched: AtomicBitset,
}

impl<M> MessageStore<M> {
    /// Creates an empty store for `inner` owned and `total - inner` mirror vertices.
    ///
    /// # Panics
    /// Panics if `inner > total`.
    pub fn new(inner: usize, total: usize) -> Self {
        assert!(inner <= total, "inner count {inner} exceeds total {total}");
        let segments = (0..total.div_ceil(SEGMENT_LEN))
            .map(|s| {
                let len = SEGMENT_LEN.min(total - s * SEGMENT_LEN);
                let slots: Box<[Option<M>]> = (0..len).map(|_| None).collect();
                CachePadded::new(Mutex::new(slots))
            })
            .collect();
        Self {
            inner,
            total,
            segments,
            outer_touched: AtomicBitset::new(total - inner),
        }
    }

    /// Number of inner slots.
    pub fn inner_count(&self) -> usize {
        self.inner
    }

    /// Number of slots.
    pub fn total_count(&self) -> usize {
        self.total
    }

    #[inline]
    fn segment(&self, lid: LocalId) -> (&Mutex<Box<[Option<M>]>>, usize) {
        assert!(lid < self.total, "vertex {lid} out of range for {} slots", self.total);
        (&self.segments[lid / SEGMENT_LEN], lid % SEGMENT_LEN)
    }

    /// Merges `message` into the slot of `lid`. Returns `true` if the slot was empty.
    ///
    /// # Panics
    /// Panics if `lid` is out of range.
    pub fn merge_into(&self, lid: LocalId, message: M, merge: &impl Fn(M, M) -> M) -> bool {
        let (segment, offset) = self.segment(lid);
        let mut slots = lock(segment);
        let slot = &mut slots[offset];
        match slot.take() {
            Some(old) => {
                *slot = Some(merge(old, message));
                false
            }
            None => {
                *slot = Some(message);
                true
            }
        }
    }

    /// Merges a batch of generated messages.
    ///
    /// Inner destinations are activated in `next`; outer destinations are
    /// buffered for [`flush`](Self::flush) and never activated locally.
    /// Returns the number of messages consumed.
    pub fn add_messages<I>(&self, messages: I, merge: &impl Fn(M, M) -> M, next: &AtomicBitset) -> usize
    where
        I: IntoIterator<Item = (LocalId, M)>,
    {
        let mut count = 0;
        for (lid, message) in messages {
            self.merge_into(lid, message, merge);
            if lid < self.inner {
                next.set(lid);
            } else {
                self.outer_touched.set(lid - self.inner);
            }
            count += 1;
        }
        count
    }

    /// Removes and returns the message of `lid`.
    pub fn take(&self, lid: LocalId) -> Option<M> {
        let (segment, offset) = self.segment(lid);
        lock(segment)[offset].take()
    }

    /// Returns `true` if `lid` has a pending message.
    pub fn has_message(&self, lid: LocalId) -> bool {
        let (segment, offset) = self.segment(lid);
        lock(segment)[offset].is_some()
    }

    /// Number of outer vertices waiting to be flushed.
    pub fn pending_outer(&self) -> usize {
        self.outer_touched.cardinality()
    }

    /// Drops every pending message.
    pub fn clear_all(&self) {
        for segment in self.segments.iter() {
            lock(segment).iter_mut().for_each(|slot| *slot = None);
        }
        self.outer_touched.clear_all();
    }
}

impl<M: Clone> MessageStore<M> {
    /// Returns a copy of the message of `lid` without consuming it.
    pub fn get(&self, lid: LocalId) -> Option<M> {
        let (segment, offset) = self.segment(lid);
        lock(segment)[offset].clone()
    }
}

impl<M: Clone + Send + Sync> MessageStore<M> {
    /// Merges inbound `(gid, message)` entries into inner slots and marks them in `active`.
    ///
    /// Returns the number of entries digested. An empty batch changes nothing.
    ///
    /// # Errors
    /// A [`PieError::Task`] wrapping [`PieError::Misrouted`] if an entry does not
    /// address an inner vertex of `fragment`.
    pub fn digest<F: Fragment>(
        &self,
        fragment: &F,
        entries: &[(GlobalId, M)],
        merge: &(impl Fn(M, M) -> M + Sync),
        active: &AtomicBitset,
        executor: &BatchExecutor,
    ) -> Result<usize> {
        executor.run(entries.len(), |start, end, _| {
            for (gid, message) in &entries[start..end] {
                let lid = fragment
                    .global_to_local(*gid)
                    .filter(|&lid| fragment.is_inner(lid))
                    .ok_or(PieError::Misrouted(*gid))?;
                self.merge_into(lid, message.clone(), merge);
                active.set(lid);
            }
            Ok::<(), PieError>(())
        })?;
        Ok(entries.len())
    }
}

impl<M: Clone + Send + Sync + Serialize> MessageStore<M> {
    /// Ships every buffered outer message to its owning worker, one frame per worker.
    ///
    /// Returns the number of messages sent. Must run after the scatter barrier.
    ///
    /// # Errors
    /// Encoding and transport failures, wrapped in [`PieError::Task`].
    pub fn flush<F: Fragment, T: MessageManager>(
        &self,
        router: &Router<'_, F>,
        transport: &T,
        executor: &BatchExecutor,
        round: u32,
        source: WorkerId,
    ) -> Result<usize> {
        if self.outer_touched.is_empty() {
            return Ok(0);
        }
        let fragment = router.fragment();
        let outbox = Outbox::new(router.worker_count());

        executor.run(self.total - self.inner, |start, end, _| {
            let mut local: Vec<Vec<(GlobalId, M)>> = vec![Vec::new(); outbox.workers()];
            for offset in self.outer_touched.iter_ones_in(start, end) {
                let lid = self.inner + offset;
                if let Some(message) = self.take(lid) {
                    local[router.worker_of(lid)].push((fragment.local_to_global(lid), message));
                }
            }
            outbox.extend_all(local);
            Ok::<(), PieError>(())
        })?;
        self.outer_touched.clear_all();

        outbox.send(transport, executor, FrameKind::Messages, round, source)
    }
}

impl<M> core::fmt::Debug for MessageStore<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MessageStore")
            .field("inner", &self.inner)
            .field("total", &self.total)
            .field("pending_outer", &self.pending_outer())
            .finish()
    }
}
