//! Graph fragments: one partition's worth of a graph.
//!
//! The engine only consumes the [`Fragment`] trait. [`CsrFragment`] is a
//! compact in-memory implementation used by the local cluster, tests and
//! benchmarks.

use std::sync::Arc;

pub mod csr;

pub use csr::CsrFragment;

/// Dense per-fragment vertex id. `[0, inner)` are owned, `[inner, total)` are mirrors.
pub type LocalId = usize;

/// Cluster-wide vertex id.
pub type GlobalId = u64;

/// Index of a fragment in the partitioning.
pub type FragmentId = usize;

/// Index of a worker process; fragments are mapped to workers by a flat table.
pub type WorkerId = usize;

/// An out-edge of a local vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeRef {
    /// Local id of the neighbor (inner or mirror).
    pub neighbor: LocalId,
    /// Local edge id, indexing the fragment's edge values.
    pub edge: usize,
}

/// The partition storage the engine runs over.
pub trait Fragment: Sync {
    /// Vertex value type stored in the snapshot.
    type VertexData: Clone + Send + Sync;
    /// Edge value type.
    type EdgeData: Send + Sync;

    /// Id of this fragment.
    fn fragment_id(&self) -> FragmentId;

    /// Number of fragments in the partitioning.
    fn fragment_count(&self) -> usize;

    /// Number of vertices owned by this fragment.
    fn inner_vertex_count(&self) -> usize;

    /// Number of owned plus mirror vertices.
    fn total_vertex_count(&self) -> usize;

    /// Number of mirror vertices.
    fn outer_vertex_count(&self) -> usize {
        self.total_vertex_count() - self.inner_vertex_count()
    }

    /// Returns `true` if `lid` is owned by this fragment.
    #[inline]
    fn is_inner(&self, lid: LocalId) -> bool {
        lid < self.inner_vertex_count()
    }

    /// Number of local edges.
    fn edge_count(&self) -> usize;

    /// Translates a local id to its global id.
    fn local_to_global(&self, lid: LocalId) -> GlobalId;

    /// Translates a global id to a local id, if the vertex is present here.
    fn global_to_local(&self, gid: GlobalId) -> Option<LocalId>;

    /// Out-edges of an inner vertex.
    fn out_edges(&self, lid: LocalId) -> impl Iterator<Item = EdgeRef> + '_;

    /// Fragment that owns `lid`.
    fn owner_fragment(&self, lid: LocalId) -> FragmentId;

    /// Fragments holding a mirror of the inner vertex `lid`.
    fn mirror_fragments(&self, lid: LocalId) -> &[FragmentId];

    /// Initial values of the inner vertices, indexed by local id.
    fn inner_vertex_values(&self) -> &[Self::VertexData];

    /// Edge values, indexed by local edge id.
    fn edge_values(&self) -> Arc<[Self::EdgeData]>;
}
