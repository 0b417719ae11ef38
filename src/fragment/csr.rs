//! A compact CSR (compressed sparse row) fragment with an edge cut on the source.
//!
//! Layout per fragment:
//! - `offsets`: `Vec<usize>` of length `inner + 1`
//! - `neighbors`: contiguous local ids; the position doubles as the local edge id
//! - `edge_values`: shared snapshot aligned with `neighbors`
//!
//! Vertices are hash-partitioned by `gid % fragments`. A fragment stores the
//! out-edges of its inner vertices; every destination owned elsewhere gets a
//! mirror slot after the inner range.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::{EdgeRef, Fragment, FragmentId, GlobalId, LocalId};
use crate::error::{PieError, Result};

/// A CSR-backed graph fragment.
#[derive(Debug, Clone)]
pub struct CsrFragment<VD, ED> {
    fid: FragmentId,
    fnum: usize,
    inner: usize,
    gids: Vec<GlobalId>,
    index: HashMap<GlobalId, LocalId>,
    offsets: Vec<usize>,
    neighbors: Vec<LocalId>,
    edge_values: Arc<[ED]>,
    values: Vec<VD>,
    mirrors: Vec<Vec<FragmentId>>,
}

impl<VD: Clone, ED: Clone> CsrFragment<VD, ED> {
    /// Partitions a global graph into `fragments` fragments.
    ///
    /// Vertex `gid` has value `values[gid]` and is owned by fragment
    /// `gid % fragments`. Each edge `(src, dst, value)` is stored in the
    /// fragment owning `src`.
    ///
    /// # Errors
    /// [`PieError::Config`] if `fragments == 0` or an edge references a vertex
    /// outside `[0, values.len())`.
    pub fn partition(
        values: &[VD],
        edges: &[(GlobalId, GlobalId, ED)],
        fragments: usize,
    ) -> Result<Vec<Self>> {
        if fragments == 0 {
            return Err(PieError::Config("fragment count must be > 0".into()));
        }
        let n = values.len() as u64;
        let fnum = fragments as u64;
        for &(src, dst, _) in edges {
            if src >= n || dst >= n {
                return Err(PieError::Config(format!(
                    "edge {src}->{dst} is out of bounds for n={n}"
                )));
            }
        }

        // Out-adjacency in input order, grouped by owning fragment.
        let mut adjacency: Vec<Vec<Vec<(GlobalId, ED)>>> = (0..fragments)
            .map(|f| vec![Vec::new(); inner_count(n, fnum, f as u64)])
            .collect();
        for (src, dst, value) in edges {
            let owner = (src % fnum) as usize;
            adjacency[owner][(src / fnum) as usize].push((*dst, value.clone()));
        }

        let mut mirrors: Vec<Vec<Vec<FragmentId>>> = adjacency
            .iter()
            .map(|adj| vec![Vec::new(); adj.len()])
            .collect();

        let mut out = Vec::with_capacity(fragments);
        for (fid, adj) in adjacency.into_iter().enumerate() {
            let inner = adj.len();
            let mut gids: Vec<GlobalId> = (0..inner as u64).map(|i| i * fnum + fid as u64).collect();

            let outer: BTreeSet<GlobalId> = adj
                .iter()
                .flatten()
                .map(|&(dst, _)| dst)
                .filter(|dst| dst % fnum != fid as u64)
                .collect();
            for &g in &outer {
                mirrors[(g % fnum) as usize][(g / fnum) as usize].push(fid);
            }
            gids.extend(outer);

            let index: HashMap<GlobalId, LocalId> =
                gids.iter().enumerate().map(|(lid, &g)| (g, lid)).collect();

            let mut offsets = Vec::with_capacity(inner + 1);
            offsets.push(0);
            let mut neighbors = Vec::new();
            let mut edge_values = Vec::new();
            for nbrs in adj {
                for (dst, value) in nbrs {
                    neighbors.push(index[&dst]);
                    edge_values.push(value);
                }
                offsets.push(neighbors.len());
            }

            let values = gids[..inner]
                .iter()
                .map(|&g| values[g as usize].clone())
                .collect();

            out.push(Self {
                fid,
                fnum: fragments,
                inner,
                gids,
                index,
                offsets,
                neighbors,
                edge_values: edge_values.into(),
                values,
                mirrors: Vec::new(),
            });
        }

        for (frag, m) in out.iter_mut().zip(mirrors) {
            frag.mirrors = m;
        }
        Ok(out)
    }

    /// Builds a single fragment holding the whole graph.
    ///
    /// # Errors
    /// See [`partition`](Self::partition).
    pub fn single(values: &[VD], edges: &[(GlobalId, GlobalId, ED)]) -> Result<Self> {
        let mut frags = Self::partition(values, edges, 1)?;
        frags
            .pop()
            .ok_or_else(|| PieError::Config("partitioning produced no fragment".into()))
    }
}

impl<VD: Clone> CsrFragment<VD, ()> {
    /// Builds a single unweighted fragment from an adjacency list.
    ///
    /// # Errors
    /// [`PieError::Config`] if any edge references a vertex out of bounds.
    pub fn from_adjacency(values: &[VD], adjacency: &[Vec<usize>]) -> Result<Self> {
        let edges: Vec<(GlobalId, GlobalId, ())> = adjacency
            .iter()
            .enumerate()
            .flat_map(|(u, nbrs)| nbrs.iter().map(move |&v| (u as GlobalId, v as GlobalId, ())))
            .collect();
        Self::single(values, &edges)
    }
}

impl<VD, ED> CsrFragment<VD, ED> {
    /// Returns the out-neighbors of the inner vertex `lid`.
    pub fn neighbors(&self, lid: LocalId) -> &[LocalId] {
        &self.neighbors[self.offsets[lid]..self.offsets[lid + 1]]
    }

    /// Returns the out-degree of the inner vertex `lid`.
    ///
    /// # Panics
    /// Panics if `lid` is not an inner vertex.
    pub fn degree(&self, lid: LocalId) -> usize {
        assert!(lid < self.inner, "vertex {lid} is not an inner vertex");
        self.offsets[lid + 1] - self.offsets[lid]
    }
}

impl<VD, ED> Fragment for CsrFragment<VD, ED>
where
    VD: Clone + Send + Sync,
    ED: Send + Sync,
{
    type VertexData = VD;
    type EdgeData = ED;

    fn fragment_id(&self) -> FragmentId {
        self.fid
    }

    fn fragment_count(&self) -> usize {
        self.fnum
    }

    fn inner_vertex_count(&self) -> usize {
        self.inner
    }

    fn total_vertex_count(&self) -> usize {
        self.gids.len()
    }

    fn edge_count(&self) -> usize {
        self.neighbors.len()
    }

    #[inline]
    fn local_to_global(&self, lid: LocalId) -> GlobalId {
        self.gids[lid]
    }

    fn global_to_local(&self, gid: GlobalId) -> Option<LocalId> {
        self.index.get(&gid).copied()
    }

    fn out_edges(&self, lid: LocalId) -> impl Iterator<Item = EdgeRef> + '_ {
        let (start, end) = if lid < self.inner {
            (self.offsets[lid], self.offsets[lid + 1])
        } else {
            (0, 0)
        };
        (start..end).map(move |edge| EdgeRef {
            neighbor: self.neighbors[edge],
            edge,
        })
    }

    #[inline]
    fn owner_fragment(&self, lid: LocalId) -> FragmentId {
        (self.gids[lid] % self.fnum as u64) as FragmentId
    }

    fn mirror_fragments(&self, lid: LocalId) -> &[FragmentId] {
        self.mirrors.get(lid).map_or(&[][..], Vec::as_slice)
    }

    fn inner_vertex_values(&self) -> &[VD] {
        &self.values
    }

    fn edge_values(&self) -> Arc<[ED]> {
        Arc::clone(&self.edge_values)
    }
}

fn inner_count(n: u64, fnum: u64, fid: u64) -> usize {
    if fid >= n {
        0
    } else {
        ((n - fid).div_ceil(fnum)) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_fragment_has_no_mirrors() {
        // 0 -> 1,2 ; 1 -> 3 ; 2 -> 3 ; 3 -> (none)
        let adj = vec![vec![1, 2], vec![3], vec![3], vec![]];
        let g = CsrFragment::from_adjacency(&[0u32, 1, 2, 3], &adj).unwrap();
        assert_eq!(g.inner_vertex_count(), 4);
        assert_eq!(g.total_vertex_count(), 4);
        assert_eq!(g.edge_count(), 4);
        assert_eq!(g.neighbors(0), &[1, 2]);
        assert_eq!(g.degree(3), 0);
        assert!(g.mirror_fragments(0).is_empty());
    }

    #[test]
    fn partition_builds_mirrors_and_routing() {
        // Ring 0->1->2->3->0 split over two fragments (even / odd).
        let edges: Vec<(GlobalId, GlobalId, u32)> = (0..4).map(|i| (i, (i + 1) % 4, 1)).collect();
        let frags = CsrFragment::partition(&[10, 11, 12, 13], &edges, 2).unwrap();
        let (even, odd) = (&frags[0], &frags[1]);

        assert_eq!(even.inner_vertex_count(), 2);
        assert_eq!(even.total_vertex_count(), 4);
        assert_eq!(even.inner_vertex_values(), &[10, 12]);
        assert_eq!(even.local_to_global(0), 0);
        assert_eq!(even.local_to_global(1), 2);

        // Mirrors of even live at lids 2.. and are owned by fragment 1.
        let lid_of_1 = even.global_to_local(1).unwrap();
        assert!(!even.is_inner(lid_of_1));
        assert_eq!(even.owner_fragment(lid_of_1), 1);

        // Vertex 1 (inner on odd) is mirrored on even.
        let lid = odd.global_to_local(1).unwrap();
        assert_eq!(odd.mirror_fragments(lid), &[0]);

        let edges_of_0: Vec<_> = even.out_edges(0).collect();
        assert_eq!(edges_of_0.len(), 1);
        assert_eq!(even.local_to_global(edges_of_0[0].neighbor), 1);
        assert_eq!(even.edge_values().len(), even.edge_count());
    }

    #[test]
    fn partition_rejects_out_of_bounds_edges() {
        let err = CsrFragment::partition(&[0u8, 1], &[(0, 5, ())], 1).unwrap_err();
        assert!(matches!(err, PieError::Config(_)));
    }
}
