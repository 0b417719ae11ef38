//! In-process coordinator driving one engine per fragment.
//!
//! The coordinator owns the cluster-wide barrier: after every step of every
//! engine it calls [`LocalMesh::exchange`], so frames sent in round `n` are
//! visible to all partitions in round `n + 1`. Engines only report local
//! convergence; the run stops once every engine converged in the same round
//! and no frame is in flight, or once every engine spent its budget.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::engine::SuperstepEngine;
use crate::error::{PieError, Result};
use crate::fragment::{Fragment, GlobalId, WorkerId};
use crate::program::VertexProgram;
use crate::transport::{LocalEndpoint, LocalMesh};

/// Outcome of [`LocalCluster::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterReport {
    /// IncEval rounds executed on every engine.
    pub rounds: u32,
    /// `true` if the run stopped because no partition had work left,
    /// `false` if the iteration budget ran out first.
    pub converged: bool,
}

/// A set of engines, fragment `i` hosted by worker `i`, wired by a [`LocalMesh`].
pub struct LocalCluster<F, P: VertexProgram> {
    mesh: LocalMesh,
    engines: Vec<SuperstepEngine<F, P, LocalEndpoint>>,
}

impl<F, P> LocalCluster<F, P>
where
    F: Fragment<VertexData = P::VertexData, EdgeData = P::EdgeData>,
    P: VertexProgram + Clone,
{
    /// Builds one engine per fragment. Fragments must be ordered by fragment id.
    ///
    /// # Errors
    /// [`PieError::Config`] for an empty or misordered fragment list, and any
    /// engine initialization error.
    pub fn new(fragments: Vec<F>, program: P, config: EngineConfig) -> Result<Self> {
        if fragments.is_empty() {
            return Err(PieError::Config("a cluster needs at least one fragment".into()));
        }
        let mesh = LocalMesh::new(fragments.len());
        let table: Vec<WorkerId> = (0..fragments.len()).collect();
        let engines = fragments
            .into_iter()
            .enumerate()
            .map(|(worker, fragment)| {
                if fragment.fragment_id() != worker {
                    return Err(PieError::Config(format!(
                        "fragment {} found at position {worker}",
                        fragment.fragment_id()
                    )));
                }
                let endpoint = mesh.endpoint(worker)?;
                SuperstepEngine::init(fragment, program.clone(), endpoint, config.clone(), table.clone())
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { mesh, engines })
    }

    /// The engines, indexed by worker id.
    pub fn engines(&self) -> &[SuperstepEngine<F, P, LocalEndpoint>] {
        &self.engines
    }

    /// The mesh connecting the engines.
    pub fn mesh(&self) -> &LocalMesh {
        &self.mesh
    }

    /// Runs mirror sync, PEval and IncEval rounds until global convergence or budget.
    ///
    /// # Errors
    /// The first engine failure; the run stops there.
    pub fn run(&mut self) -> Result<ClusterReport> {
        for engine in &mut self.engines {
            engine.sync_outer_vertex_data()?;
        }
        self.mesh.exchange();

        for engine in &mut self.engines {
            engine.parallel_peval()?;
        }
        self.mesh.exchange();

        let mut rounds = 0;
        let converged = loop {
            if self.engines.iter().all(|e| e.is_exhausted()) {
                break false;
            }
            let mut all_converged = true;
            for engine in &mut self.engines {
                all_converged &= engine.parallel_inc_eval()?;
            }
            let moved = self.mesh.exchange();
            rounds += 1;
            debug!(rounds, moved, all_converged, "cluster round done");
            if all_converged && moved == 0 {
                break true;
            }
        };

        info!(workers = self.engines.len(), rounds, converged, "cluster run finished");
        Ok(ClusterReport { rounds, converged })
    }

    /// Inner vertex values of every partition keyed by global id.
    pub fn values(&self) -> BTreeMap<GlobalId, P::VertexData> {
        let mut out = BTreeMap::new();
        for engine in &self.engines {
            let fragment = engine.fragment();
            for lid in 0..fragment.inner_vertex_count() {
                if let Some(value) = engine.value(lid) {
                    out.insert(fragment.local_to_global(lid), value.clone());
                }
            }
        }
        out
    }
}

impl<F, P: VertexProgram> core::fmt::Debug for LocalCluster<F, P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LocalCluster")
            .field("mesh", &self.mesh)
            .field("engines", &self.engines)
            .finish()
    }
}
