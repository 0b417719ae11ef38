//! Error types for the superstep engine.
//!
//! Configuration problems are reported before any engine state exists.
//! Everything that goes wrong inside a superstep is wrapped in
//! [`PieError::Superstep`] so the coordinator sees the round, the phase and
//! the partition that failed.

use core::fmt;

use thiserror::Error;

use crate::fragment::{GlobalId, WorkerId};

/// Boxed error used for failures coming out of user callbacks and tasks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T, E = PieError> = core::result::Result<T, E>;

/// The phase of a superstep in which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Shipping inner vertex values to mirror holders.
    MirrorSync,
    /// Draining and digesting inbound frames.
    Receive,
    /// Running the vertex update callable.
    Update,
    /// Edge iteration and message generation.
    Scatter,
    /// Shipping outer-vertex messages.
    Flush,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::MirrorSync => "mirror-sync",
            Phase::Receive => "receive",
            Phase::Update => "update",
            Phase::Scatter => "scatter",
            Phase::Flush => "flush",
        };
        f.write_str(name)
    }
}

/// Errors raised by a [`MessageManager`](crate::transport::MessageManager).
#[derive(Debug, Error)]
pub enum TransportError {
    /// A frame was addressed to a worker the transport does not know.
    #[error("unknown destination worker {0}")]
    UnknownWorker(WorkerId),

    /// The transport was used before `init_channels`.
    #[error("transport channels are not initialized")]
    NotInitialized,

    /// The peer side of a channel went away.
    #[error("channel to worker {0} is disconnected")]
    Disconnected(WorkerId),

    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Top-level error type of the engine.
#[derive(Debug, Error)]
pub enum PieError {
    /// Invalid configuration or mismatched collaborator tables.
    #[error("configuration error: {0}")]
    Config(String),

    /// A snapshot is longer than the array it is copied into.
    #[error("snapshot holds {snapshot} values but the target array has {target} slots")]
    LengthMismatch {
        /// Length of the source snapshot.
        snapshot: usize,
        /// Requested target length.
        target: usize,
    },

    /// Attempt to write through a read-only array store.
    #[error("array store is read-only")]
    ReadOnly,

    /// A pool thread failed while running its claimed range.
    #[error("worker thread {thread} failed: {source}")]
    Task {
        /// Index of the pool thread.
        thread: usize,
        /// The callback or task error.
        #[source]
        source: BoxError,
    },

    /// A task panicked; the payload message is preserved.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// A superstep failed; the round is aborted for this partition.
    #[error("round {round} failed during {phase} on worker {partition}")]
    Superstep {
        /// Round counter at the time of the failure.
        round: u32,
        /// Phase that failed.
        phase: Phase,
        /// Worker id of the partition.
        partition: WorkerId,
        /// The underlying failure.
        #[source]
        source: Box<PieError>,
    },

    /// An operation was called in the wrong protocol state.
    #[error("operation requires {expected}, engine is {actual}")]
    InvalidState {
        /// Human readable description of the accepted states.
        expected: &'static str,
        /// The state the engine was in.
        actual: String,
    },

    /// An inbound entry addressed a vertex this partition does not own.
    #[error("misrouted entry for global vertex {0}")]
    Misrouted(GlobalId),

    /// A frame could not be parsed.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Body (de)serialization failure.
    #[error("failed to encode or decode frame body: {0}")]
    Codec(#[from] bincode::Error),

    /// Transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The worker pool could not be started.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl PieError {
    /// Wraps `self` as a failure of `phase` in `round` on `partition`.
    pub fn in_superstep(self, round: u32, phase: Phase, partition: WorkerId) -> Self {
        PieError::Superstep {
            round,
            phase,
            partition,
            source: Box::new(self),
        }
    }

    /// Round of a superstep failure, if this is one.
    pub fn round(&self) -> Option<u32> {
        match self {
            PieError::Superstep { round, .. } => Some(*round),
            _ => None,
        }
    }

    /// Pool thread that originated the failure, searching through superstep wrappers.
    pub fn thread(&self) -> Option<usize> {
        match self {
            PieError::Task { thread, .. } => Some(*thread),
            PieError::Superstep { source, .. } => source.thread(),
            _ => None,
        }
    }

    /// Returns `true` for errors reported before any run state was created.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            PieError::Config(_) | PieError::LengthMismatch { .. } | PieError::ReadOnly
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn superstep_wrapper_exposes_round_and_thread() {
        let task = PieError::Task {
            thread: 3,
            source: anyhow::anyhow!("boom").into(),
        };
        let err = task.in_superstep(7, Phase::Update, 1);
        assert_eq!(err.round(), Some(7));
        assert_eq!(err.thread(), Some(3));
        assert_eq!(err.to_string(), "round 7 failed during update on worker 1");
        assert!(!err.is_config());
    }

    #[test]
    fn config_errors_are_classified() {
        assert!(PieError::ReadOnly.is_config());
        assert!(PieError::LengthMismatch { snapshot: 4, target: 2 }.is_config());
        assert!(!PieError::Misrouted(9).is_config());
    }
}
