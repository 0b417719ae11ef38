//! # `pie-engine` - Partitioned Superstep Graph Engine
//!
//! A bulk-synchronous graph computation engine. Each worker owns one fragment
//! of a graph and runs a user vertex program over it in lock-stepped rounds,
//! exchanging per-vertex messages with the other partitions between rounds
//! until convergence or an iteration budget is exhausted.
//!
//! ## Protocol
//!
//! Every partition runs the same sequence, separated by a cluster-wide barrier:
//!
//! 1. **Init**: vertex values are copied from the fragment snapshot into an
//!    array with extra slots for mirror vertices, every vertex is active.
//! 2. **Mirror sync**: inner values are shipped to every partition that holds
//!    a mirror of them.
//! 3. **PEval**: every vertex is updated with the program's initial message,
//!    then every inner vertex scatters along its out edges.
//! 4. **IncEval** (repeated): only vertices that received a message are
//!    updated and scatter. A partition whose active set is empty has
//!    converged locally.
//!
//! ## Concurrency Model
//!
//! Inside a partition every phase is one call on a [`BatchExecutor`]:
//! - **Dynamic chunking**: pool threads claim fixed-size index chunks from an
//!   atomic cursor, so skewed active sets balance themselves.
//! - **Barrier per phase**: a call returns only after every thread is done,
//!   so no phase overlaps the next.
//! - **Disjoint ownership**: the vertex-value array is split into per-chunk
//!   `&mut` slices. Concurrent writers cannot alias by construction.
//!
//! Activation uses [`AtomicBitset`] (word-level `fetch_or`), message slots are
//! merged under per-segment locks in the [`MessageStore`], and messages to
//! mirrors are combined on the sender before they are flushed.
//!
//! ## Core Abstractions
//!
//! 1. **[`Fragment`]**: the partition storage (ids, CSR out edges, mirror
//!    ownership). [`CsrFragment`] is the in-memory implementation.
//! 2. **[`VertexProgram`]**: `update`, `generate` and an associative,
//!    commutative `merge`.
//! 3. **[`MessageManager`]**: the network seam. [`LocalMesh`] connects
//!    engines in one process.
//! 4. **[`SuperstepEngine`]**: the protocol state machine for one partition.
//! 5. **[`LocalCluster`]**: drives several engines and decides global
//!    convergence.
//!
//! ## Example
//!
//! ```rust
//! use pie_engine::{
//!     CsrFragment, EdgeTriplet, EngineConfig, LocalCluster, MessageSink, UpdateContext,
//!     VertexProgram,
//! };
//!
//! /// Every vertex ends up with the largest id that can reach it.
//! #[derive(Clone)]
//! struct MaxReach;
//!
//! impl VertexProgram for MaxReach {
//!     type VertexData = u64;
//!     type EdgeData = ();
//!     type Message = u64;
//!
//!     fn initial_message(&self) -> u64 {
//!         0
//!     }
//!
//!     fn update(&self, _: &UpdateContext, value: &mut u64, message: Option<&u64>) -> anyhow::Result<()> {
//!         if let Some(&message) = message {
//!             *value = (*value).max(message);
//!         }
//!         Ok(())
//!     }
//!
//!     fn generate(
//!         &self,
//!         t: &EdgeTriplet<'_, u64, ()>,
//!         sink: &mut MessageSink<'_, u64>,
//!     ) -> anyhow::Result<()> {
//!         if t.src_value > t.dst_value {
//!             sink.send_to_dst(*t.src_value);
//!         }
//!         Ok(())
//!     }
//!
//!     fn merge(&self, a: u64, b: u64) -> u64 {
//!         a.max(b)
//!     }
//! }
//!
//! let edges: Vec<(u64, u64, ())> = vec![(3, 0, ()), (0, 1, ()), (1, 2, ())];
//! let fragments = CsrFragment::partition(&[0, 1, 2, 3], &edges, 2).unwrap();
//! let config = EngineConfig::new().with_parallelism(2).with_max_iterations(20);
//! let mut cluster = LocalCluster::new(fragments, MaxReach, config).unwrap();
//!
//! let report = cluster.run().unwrap();
//! assert!(report.converged);
//! assert!(cluster.values().values().all(|&v| v == 3));
//! ```

#![warn(missing_docs, clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod cluster;
pub mod concurrency;
pub mod config;
pub mod engine;
pub mod error;
pub mod fragment;
pub mod program;
pub mod store;
pub mod transport;

pub use cluster::{ClusterReport, LocalCluster};
pub use concurrency::{AtomicBitset, BatchExecutor};
pub use config::EngineConfig;
pub use engine::{EngineState, RoundStats, SuperstepEngine};
pub use error::{BoxError, Phase, PieError, Result, TransportError};
pub use fragment::{CsrFragment, EdgeRef, Fragment, FragmentId, GlobalId, LocalId, WorkerId};
pub use program::{EdgeTriplet, MessageSink, UpdateContext, VertexProgram};
pub use store::{ArrayStore, MessageStore};
pub use transport::{LocalEndpoint, LocalMesh, MessageManager};

// Compile-time assertions for the wire layout.
const _: () = {
    // The frame header is fixed at 16 bytes; peers rely on it.
    assert!(transport::codec::HEADER_LEN == 16);
    // Message slots are segmented by whole bitset words.
    assert!(store::message::SEGMENT_LEN % usize::BITS as usize == 0);
};
