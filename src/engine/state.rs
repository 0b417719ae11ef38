//! Protocol state and per-round diagnostics.

use core::fmt;

/// Where an engine is in the superstep protocol.
///
/// An engine only exists once it is initialized, so there is no
/// uninitialized state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    /// Stores are built; nothing has been sent.
    Initialized,
    /// Inner values were shipped to mirror holders.
    Synced,
    /// PEval has run.
    PartialEval,
    /// `n` IncEval rounds have run.
    IncrementalEval(u32),
    /// The iteration budget is spent.
    Terminated,
    /// A superstep failed in the given round; the engine accepts no more work.
    Failed(u32),
}

impl EngineState {
    /// Returns `true` once PEval has completed and the engine is still usable.
    pub fn is_evaluating(self) -> bool {
        matches!(
            self,
            EngineState::PartialEval | EngineState::IncrementalEval(_) | EngineState::Terminated
        )
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Initialized => f.write_str("initialized"),
            EngineState::Synced => f.write_str("synced"),
            EngineState::PartialEval => f.write_str("partial-eval"),
            EngineState::IncrementalEval(n) => write!(f, "incremental-eval({n})"),
            EngineState::Terminated => f.write_str("terminated"),
            EngineState::Failed(round) => write!(f, "failed in round {round}"),
        }
    }
}

/// Counters of the last completed phase sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundStats {
    /// Round counter after the round.
    pub round: u32,
    /// Vertices in the active set when the update pass started.
    pub active: usize,
    /// Vertices the update pass ran on.
    pub updated: usize,
    /// Inbound frames drained.
    pub frames_received: usize,
    /// Inbound messages digested.
    pub messages_received: usize,
    /// Mirror values received.
    pub mirror_updates: usize,
    /// Messages emitted by the vertex program.
    pub messages_generated: usize,
    /// Messages (or mirror values) shipped to other workers after combining.
    pub messages_sent: usize,
}
