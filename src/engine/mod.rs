//! The per-partition superstep engine.
//!
//! One [`SuperstepEngine`] owns one fragment and drives the PEval/IncEval
//! protocol over it:
//!
//! 1. [`init`](SuperstepEngine::init): build stores, `current = all`, round 0.
//! 2. [`sync_outer_vertex_data`](SuperstepEngine::sync_outer_vertex_data):
//!    ship inner values to mirror holders, round 1.
//! 3. [`parallel_peval`](SuperstepEngine::parallel_peval): receive, update
//!    every vertex with the initial message, scatter, flush, round 2.
//! 4. [`parallel_inc_eval`](SuperstepEngine::parallel_inc_eval): receive,
//!    update the active vertices, scatter, flush, round + 1. Repeated until
//!    the partition converges locally or the iteration budget is spent.
//!
//! Every phase is one [`BatchExecutor`] call, so phases never overlap. The
//! active set is a pair of bitsets: `current` is what runs this round and
//! `next` collects the vertices messaged this round. At the end of each round
//! `next` becomes `current` and `next` is left empty.

use core::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, info, trace, warn};

use crate::concurrency::{AtomicBitset, BatchExecutor};
use crate::config::EngineConfig;
use crate::error::{Phase, PieError, Result};
use crate::fragment::{Fragment, GlobalId, LocalId, WorkerId};
use crate::program::{EdgeTriplet, MessageSink, UpdateContext, VertexProgram};
use crate::store::{ArrayStore, MessageStore};
use crate::transport::{codec, FrameKind, MessageManager, Outbox, Router};

mod state;

pub use state::{EngineState, RoundStats};

/// Active set that digested messages are marked in.
#[derive(Clone, Copy)]
enum Activate {
    Current,
    Next,
}

/// Runs a [`VertexProgram`] over one fragment in lock-stepped rounds.
pub struct SuperstepEngine<F, P: VertexProgram, T> {
    config: EngineConfig,
    worker_id: WorkerId,
    fragment: F,
    program: P,
    transport: T,
    worker_table: Box<[WorkerId]>,
    executor: BatchExecutor,
    values: ArrayStore<Option<P::VertexData>>,
    edges: ArrayStore<P::EdgeData>,
    messages: MessageStore<P::Message>,
    current: AtomicBitset,
    next: AtomicBitset,
    round: u32,
    state: EngineState,
    stats: RoundStats,
}

impl<F, P, T> SuperstepEngine<F, P, T>
where
    F: Fragment<VertexData = P::VertexData, EdgeData = P::EdgeData>,
    P: VertexProgram,
    T: MessageManager,
{
    /// Builds an engine for `fragment`.
    ///
    /// `worker_table[fid]` is the worker hosting fragment `fid`; this
    /// engine's own worker id is looked up in it.
    ///
    /// # Errors
    /// Configuration errors ([`PieError::Config`], [`PieError::LengthMismatch`])
    /// when the config, the table or the fragment's arrays are inconsistent,
    /// and pool or transport failures. Nothing is kept on failure.
    pub fn init(
        fragment: F,
        program: P,
        transport: T,
        config: EngineConfig,
        worker_table: impl Into<Box<[WorkerId]>>,
    ) -> Result<Self> {
        config.validate()?;
        let worker_table = worker_table.into();
        let fid = fragment.fragment_id();
        if worker_table.len() != fragment.fragment_count() {
            return Err(PieError::Config(format!(
                "worker table has {} entries for {} fragments",
                worker_table.len(),
                fragment.fragment_count()
            )));
        }
        let worker_id = *worker_table
            .get(fid)
            .ok_or_else(|| PieError::Config(format!("fragment id {fid} is outside the worker table")))?;

        let inner = fragment.inner_vertex_count();
        let total = fragment.total_vertex_count();
        if fragment.inner_vertex_values().len() != inner {
            return Err(PieError::Config(format!(
                "fragment has {inner} inner vertices but {} initial values",
                fragment.inner_vertex_values().len()
            )));
        }
        let edges = ArrayStore::wrap(fragment.edge_values());
        if edges.len() != fragment.edge_count() {
            return Err(PieError::Config(format!(
                "fragment has {} edges but {} edge values",
                fragment.edge_count(),
                edges.len()
            )));
        }
        let values = ArrayStore::copy_expand(fragment.inner_vertex_values(), total)?;

        let executor = BatchExecutor::new(config.parallelism, config.batch_size)?;
        transport.init_channels(config.parallelism)?;

        let current = AtomicBitset::new(total);
        current.set_all();

        info!(
            worker = worker_id,
            fragment = fid,
            inner,
            total,
            edges = edges.len(),
            parallelism = config.parallelism,
            "engine initialized"
        );

        Ok(Self {
            config,
            worker_id,
            messages: MessageStore::new(inner, total),
            fragment,
            program,
            transport,
            worker_table,
            executor,
            values,
            edges,
            current,
            next: AtomicBitset::new(total),
            round: 0,
            state: EngineState::Initialized,
            stats: RoundStats::default(),
        })
    }

    /// Sends every inner value to each worker holding a mirror of it. Round becomes 1.
    ///
    /// # Errors
    /// [`PieError::InvalidState`] unless freshly initialized; a
    /// [`PieError::Superstep`] on encoding or transport failure.
    pub fn sync_outer_vertex_data(&mut self) -> Result<()> {
        self.require(self.state == EngineState::Initialized, "an initialized engine")?;
        let sent = self
            .ship_mirror_values()
            .map_err(|e| self.fail(Phase::MirrorSync, e))?;

        self.round = 1;
        self.state = EngineState::Synced;
        self.stats = RoundStats {
            round: self.round,
            messages_sent: sent,
            ..RoundStats::default()
        };
        debug!(worker = self.worker_id, sent, "mirror values shipped");
        Ok(())
    }

    /// Runs the first superstep over every vertex. Round becomes 2.
    ///
    /// # Errors
    /// [`PieError::InvalidState`] unless synced; a [`PieError::Superstep`] if
    /// any phase fails, after which the engine is [`EngineState::Failed`].
    pub fn parallel_peval(&mut self) -> Result<()> {
        self.require(self.state == EngineState::Synced, "a synced engine")?;
        let mut stats = RoundStats::default();

        self.receive(Activate::Next, &mut stats)
            .map_err(|e| self.fail(Phase::Receive, e))?;

        self.current.set_all();
        stats.active = self.current.cardinality();
        let initial = self.program.initial_message();
        stats.updated = self
            .update_pass(Some(&initial))
            .map_err(|e| self.fail(Phase::Update, e))?;
        stats.messages_generated = self.scatter().map_err(|e| self.fail(Phase::Scatter, e))?;
        stats.messages_sent = self.flush().map_err(|e| self.fail(Phase::Flush, e))?;
        self.advance();

        self.round = 2;
        self.state = EngineState::PartialEval;
        self.finish_round(stats);
        Ok(())
    }

    /// Runs one incremental superstep over the active vertices.
    ///
    /// Returns `true` if this partition has converged locally: either the
    /// iteration budget is spent (nothing is touched) or no vertex is active
    /// after digesting inbound messages. A converged partition must keep being
    /// called while other partitions are still working.
    ///
    /// # Errors
    /// [`PieError::InvalidState`] before PEval or after a failure; a
    /// [`PieError::Superstep`] if any phase fails.
    pub fn parallel_inc_eval(&mut self) -> Result<bool> {
        if let EngineState::Failed(_) = self.state {
            return Err(self.invalid_state("an engine that has not failed"));
        }
        if self.is_exhausted() {
            if self.state != EngineState::Terminated {
                info!(worker = self.worker_id, round = self.round, "iteration budget spent");
                self.state = EngineState::Terminated;
            }
            return Ok(true);
        }
        self.require(self.state.is_evaluating(), "a completed PEval")?;

        self.current.union_with(&self.next);
        self.next.clear_all();
        debug_assert!(self.next.is_empty(), "next-round set must start empty");

        let mut stats = RoundStats::default();
        self.receive(Activate::Current, &mut stats)
            .map_err(|e| self.fail(Phase::Receive, e))?;

        let rounds_done = match self.state {
            EngineState::IncrementalEval(n) => n + 1,
            _ => 1,
        };
        stats.active = self.current.cardinality();
        if stats.active == 0 {
            self.round += 1;
            self.state = EngineState::IncrementalEval(rounds_done);
            stats.round = self.round;
            self.stats = stats;
            debug!(worker = self.worker_id, round = self.round, "no active vertices");
            return Ok(true);
        }

        stats.updated = self.update_pass(None).map_err(|e| self.fail(Phase::Update, e))?;
        stats.messages_generated = self.scatter().map_err(|e| self.fail(Phase::Scatter, e))?;
        stats.messages_sent = self.flush().map_err(|e| self.fail(Phase::Flush, e))?;
        self.advance();

        self.round += 1;
        self.state = EngineState::IncrementalEval(rounds_done);
        self.finish_round(stats);
        Ok(false)
    }

    /// Schedules the inner vertex `lid` for the next round.
    ///
    /// Its `update` runs in the next IncEval even if no message arrives, with
    /// `None` as the message. Returns `true` if it was not scheduled yet.
    ///
    /// # Panics
    /// Panics if `lid` is not an inner vertex.
    pub fn activate(&self, lid: LocalId) -> bool {
        assert!(self.fragment.is_inner(lid), "vertex {lid} is not an inner vertex");
        self.next.set(lid)
    }

    /// Current round counter.
    pub fn cur_round(&self) -> u32 {
        self.round
    }

    /// Current protocol state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Vertex values by local id; mirror slots are `None` until synchronized.
    pub fn vertex_values(&self) -> &[Option<P::VertexData>] {
        self.values.as_slice()
    }

    /// Value of `lid`, if defined.
    pub fn value(&self, lid: LocalId) -> Option<&P::VertexData> {
        self.values.get(lid).and_then(Option::as_ref)
    }

    /// Vertices scheduled for the coming round.
    pub fn active_count(&self) -> usize {
        self.current.cardinality()
    }

    /// Vertices activated for the round after the coming one.
    pub fn next_active_count(&self) -> usize {
        self.next.cardinality()
    }

    /// Counters of the last completed step.
    pub fn last_round_stats(&self) -> &RoundStats {
        &self.stats
    }

    /// The fragment this engine runs over.
    pub fn fragment(&self) -> &F {
        &self.fragment
    }

    /// Worker id of this partition.
    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns `true` once the round counter reached `max_iterations`.
    pub fn is_exhausted(&self) -> bool {
        self.round >= self.config.max_iterations
    }

    fn require(&self, ok: bool, expected: &'static str) -> Result<()> {
        if ok {
            Ok(())
        } else {
            Err(self.invalid_state(expected))
        }
    }

    fn invalid_state(&self, expected: &'static str) -> PieError {
        PieError::InvalidState {
            expected,
            actual: self.state.to_string(),
        }
    }

    fn fail(&mut self, phase: Phase, source: PieError) -> PieError {
        warn!(
            worker = self.worker_id,
            round = self.round,
            %phase,
            error = %source,
            "superstep failed"
        );
        self.state = EngineState::Failed(self.round);
        source.in_superstep(self.round, phase, self.worker_id)
    }

    fn finish_round(&mut self, mut stats: RoundStats) {
        stats.round = self.round;
        info!(
            worker = self.worker_id,
            round = self.round,
            active = stats.active,
            updated = stats.updated,
            received = stats.messages_received,
            generated = stats.messages_generated,
            sent = stats.messages_sent,
            next_active = self.current.cardinality(),
            "superstep complete"
        );
        self.stats = stats;
    }

    /// `current <- next; next <- {}`.
    fn advance(&self) {
        self.current.clear_all();
        self.current.union_with(&self.next);
        self.next.clear_all();
        debug_assert!(self.next.is_empty());
    }

    fn ship_mirror_values(&self) -> Result<usize> {
        let router = Router::new(&self.fragment, &self.worker_table)?;
        let fragment = &self.fragment;
        let values = self.values.as_slice();
        let outbox = Outbox::new(router.worker_count());

        self.executor.run(fragment.inner_vertex_count(), |start, end, _| {
            let mut local: Vec<Vec<(GlobalId, P::VertexData)>> = vec![Vec::new(); outbox.workers()];
            for lid in start..end {
                let mirrors = fragment.mirror_fragments(lid);
                if mirrors.is_empty() {
                    continue;
                }
                let Some(value) = values[lid].as_ref() else {
                    continue;
                };
                let gid = fragment.local_to_global(lid);
                for &fid in mirrors {
                    local[router.worker_of_fragment(fid)].push((gid, value.clone()));
                }
            }
            outbox.extend_all(local);
            Ok::<(), PieError>(())
        })?;

        outbox.send(
            &self.transport,
            &self.executor,
            FrameKind::MirrorSync,
            self.round,
            self.worker_id,
        )
    }

    /// Drains the transport. Mirror values are stored, messages are digested
    /// and their destinations marked in `into`.
    ///
    /// Mirror values are staged per outer slot first, so a misrouted entry
    /// fails the round before any value is written.
    fn receive(&mut self, into: Activate, stats: &mut RoundStats) -> Result<()> {
        let inner = self.fragment.inner_vertex_count();
        let mut inbound: Vec<(GlobalId, P::Message)> = Vec::new();
        let mut staged: Vec<Option<P::VertexData>> = Vec::new();
        while let Some(frame) = self.transport.poll_inbound()? {
            let header = codec::decode_header(&frame)?;
            trace!(
                worker = self.worker_id,
                from = header.source,
                kind = ?header.kind,
                entries = header.entries,
                "frame received"
            );
            stats.frames_received += 1;
            match header.kind {
                FrameKind::MirrorSync => {
                    let entries = codec::decode_entries::<P::VertexData>(&frame, &header)?;
                    if staged.is_empty() {
                        staged.resize_with(self.fragment.outer_vertex_count(), || None);
                    }
                    for (gid, value) in entries {
                        let lid = self
                            .fragment
                            .global_to_local(gid)
                            .filter(|&lid| !self.fragment.is_inner(lid))
                            .ok_or(PieError::Misrouted(gid))?;
                        staged[lid - inner] = Some(value);
                        stats.mirror_updates += 1;
                    }
                }
                FrameKind::Messages => {
                    inbound.extend(codec::decode_entries::<P::Message>(&frame, &header)?);
                }
            }
        }

        if !staged.is_empty() {
            let values = self.values.as_mut_slice()?;
            let mut slots: Vec<_> = values[inner..].iter_mut().zip(staged).collect();
            self.executor.run_chunks_mut(&mut slots, |_, chunk, _| {
                for (slot, value) in chunk {
                    if let Some(value) = value.take() {
                        **slot = Some(value);
                    }
                }
                Ok::<(), PieError>(())
            })?;
        }

        let active = match into {
            Activate::Current => &self.current,
            Activate::Next => &self.next,
        };
        let program = &self.program;
        let merge = |a: P::Message, b: P::Message| program.merge(a, b);
        stats.messages_received = self
            .messages
            .digest(&self.fragment, &inbound, &merge, active, &self.executor)?;
        Ok(())
    }

    /// Runs `update` over every active vertex with a defined value.
    ///
    /// With `initial` set every vertex gets that message; otherwise the
    /// vertex's merged message is taken from the store, `None` if it has none.
    fn update_pass(&mut self, initial: Option<&P::Message>) -> Result<usize> {
        let round = self.round;
        let first_round = initial.is_some();
        let fragment = &self.fragment;
        let program = &self.program;
        let messages = &self.messages;
        let active = &self.current;
        let updated = AtomicUsize::new(0);

        let values = self.values.as_mut_slice()?;
        self.executor.run_chunks_mut(values, |start, chunk, _| {
            let mut count = 0;
            for lid in active.iter_ones_in(start, start + chunk.len()) {
                let Some(value) = chunk[lid - start].as_mut() else {
                    continue;
                };
                let taken;
                let message = match initial {
                    Some(message) => Some(message),
                    None => {
                        taken = messages.take(lid);
                        taken.as_ref()
                    }
                };
                let ctx = UpdateContext {
                    lid,
                    gid: fragment.local_to_global(lid),
                    round,
                    first_round,
                };
                program.update(&ctx, value, message)?;
                count += 1;
            }
            updated.fetch_add(count, Ordering::Relaxed);
            Ok::<(), anyhow::Error>(())
        })?;

        let updated = updated.into_inner();
        debug!(worker = self.worker_id, round, updated, "update pass done");
        Ok(updated)
    }

    /// Calls `generate` for every out edge of an active inner vertex whose
    /// endpoints are both defined. Returns the number of messages emitted.
    fn scatter(&self) -> Result<usize> {
        let fragment = &self.fragment;
        let program = &self.program;
        let values = self.values.as_slice();
        let edge_values = self.edges.as_slice();
        let merge = |a: P::Message, b: P::Message| program.merge(a, b);
        let generated = AtomicUsize::new(0);

        self.executor.run(fragment.inner_vertex_count(), |start, end, _| {
            let mut out: Vec<(LocalId, P::Message)> = Vec::new();
            let mut count = 0;
            for lid in self.current.iter_ones_in(start, end) {
                let Some(src_value) = values[lid].as_ref() else {
                    continue;
                };
                let src_id = fragment.local_to_global(lid);
                for edge in fragment.out_edges(lid) {
                    // Undefined destination: mirror not synchronized yet.
                    let Some(dst_value) = values[edge.neighbor].as_ref() else {
                        continue;
                    };
                    let triplet = EdgeTriplet {
                        src_id,
                        src_value,
                        dst_id: fragment.local_to_global(edge.neighbor),
                        dst_value,
                        edge_value: &edge_values[edge.edge],
                    };
                    program.generate(&triplet, &mut MessageSink::new(lid, edge.neighbor, &mut out))?;
                }
                count += self.messages.add_messages(out.drain(..), &merge, &self.next);
            }
            generated.fetch_add(count, Ordering::Relaxed);
            Ok::<(), anyhow::Error>(())
        })?;

        let generated = generated.into_inner();
        debug!(worker = self.worker_id, round = self.round, generated, "scatter done");
        Ok(generated)
    }

    fn flush(&self) -> Result<usize> {
        let router = Router::new(&self.fragment, &self.worker_table)?;
        let sent = self
            .messages
            .flush(&router, &self.transport, &self.executor, self.round, self.worker_id)?;
        debug!(worker = self.worker_id, round = self.round, sent, "outer messages flushed");
        Ok(sent)
    }
}

impl<F, P: VertexProgram, T> core::fmt::Debug for SuperstepEngine<F, P, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SuperstepEngine")
            .field("worker_id", &self.worker_id)
            .field("round", &self.round)
            .field("state", &self.state)
            .field("active", &self.current.cardinality())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::CsrFragment;
    use crate::transport::LocalMesh;

    /// Propagates the largest value along edges.
    #[derive(Clone)]
    struct MaxValue;

    impl VertexProgram for MaxValue {
        type VertexData = i64;
        type EdgeData = ();
        type Message = i64;

        fn initial_message(&self) -> i64 {
            i64::MIN
        }

        fn update(&self, _: &UpdateContext, value: &mut i64, message: Option<&i64>) -> anyhow::Result<()> {
            if let Some(&message) = message {
                *value = (*value).max(message);
            }
            Ok(())
        }

        fn generate(
            &self,
            triplet: &EdgeTriplet<'_, i64, ()>,
            sink: &mut MessageSink<'_, i64>,
        ) -> anyhow::Result<()> {
            if triplet.src_value > triplet.dst_value {
                sink.send_to_dst(*triplet.src_value);
            }
            Ok(())
        }

        fn merge(&self, left: i64, right: i64) -> i64 {
            left.max(right)
        }
    }

    fn single_engine(
        values: &[i64],
        adjacency: &[Vec<usize>],
        config: EngineConfig,
    ) -> SuperstepEngine<CsrFragment<i64, ()>, MaxValue, crate::transport::LocalEndpoint> {
        let fragment = CsrFragment::from_adjacency(values, adjacency).unwrap();
        let mesh = LocalMesh::new(1);
        let endpoint = mesh.endpoint(0).unwrap();
        SuperstepEngine::init(fragment, MaxValue, endpoint, config, vec![0]).unwrap()
    }

    #[test]
    fn protocol_order_is_enforced() {
        let config = EngineConfig::new().with_parallelism(2).with_batch_size(2);
        let mut engine = single_engine(&[1, 2], &[vec![1], vec![]], config);
        assert_eq!(engine.state(), EngineState::Initialized);
        assert_eq!(engine.active_count(), 2);

        assert!(matches!(engine.parallel_peval(), Err(PieError::InvalidState { .. })));
        assert!(matches!(engine.parallel_inc_eval(), Err(PieError::InvalidState { .. })));

        engine.sync_outer_vertex_data().unwrap();
        assert_eq!(engine.cur_round(), 1);
        assert!(engine.sync_outer_vertex_data().is_err());

        engine.parallel_peval().unwrap();
        assert_eq!(engine.cur_round(), 2);
        assert_eq!(engine.state(), EngineState::PartialEval);
        // 1 -> 2 sends nothing: 1 is not larger than 2.
        assert_eq!(engine.active_count(), 0);
        assert!(engine.parallel_inc_eval().unwrap());
        assert_eq!(engine.cur_round(), 3);
    }

    #[test]
    fn chain_converges_within_budget() {
        let config = EngineConfig::new().with_parallelism(3).with_batch_size(2);
        let adjacency: Vec<Vec<usize>> = (0..6).map(|i| if i < 5 { vec![i + 1] } else { vec![] }).collect();
        let mut engine = single_engine(&[9, 0, 0, 0, 0, 0], &adjacency, config);
        engine.sync_outer_vertex_data().unwrap();
        engine.parallel_peval().unwrap();
        let mut rounds = 0;
        while !engine.parallel_inc_eval().unwrap() {
            rounds += 1;
            assert_eq!(engine.next_active_count(), 0);
        }
        assert_eq!(rounds, 5);
        assert!(engine.vertex_values().iter().all(|v| *v == Some(9)));
        assert_eq!(engine.state(), EngineState::IncrementalEval(6));
    }

    #[test]
    fn manual_activation_runs_next_round() {
        let config = EngineConfig::new().with_parallelism(1);
        let mut engine = single_engine(&[3, 1], &[vec![1], vec![]], config);
        engine.sync_outer_vertex_data().unwrap();
        engine.parallel_peval().unwrap();
        // PEval scattered 3 -> 1.
        assert_eq!(engine.active_count(), 1);
        assert!(!engine.parallel_inc_eval().unwrap());
        assert_eq!(engine.value(1), Some(&3));

        // Vertex 0 has no message but still runs its update.
        assert!(engine.activate(0));
        assert!(!engine.parallel_inc_eval().unwrap());
        assert_eq!(engine.last_round_stats().active, 1);
        assert_eq!(engine.last_round_stats().updated, 1);
        assert_eq!(engine.value(0), Some(&3));
        assert!(engine.parallel_inc_eval().unwrap());
    }

    #[test]
    fn rejects_inconsistent_worker_table() {
        let fragment = CsrFragment::from_adjacency(&[0i64], &[vec![]]).unwrap();
        let mesh = LocalMesh::new(1);
        let err = SuperstepEngine::init(
            fragment,
            MaxValue,
            mesh.endpoint(0).unwrap(),
            EngineConfig::new(),
            vec![0, 1],
        )
        .unwrap_err();
        assert!(err.is_config());
    }
}
