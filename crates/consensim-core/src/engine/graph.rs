//! # Agent graph snapshot
//!
//! In-memory graph the engines run over: an id-keyed arena of [`Agent`]s and
//! an undirected adjacency relation without self-loops.
//!
//! ## Design
//!
//! - O(1) agent and neighbor lookups via `FxHashMap` indexes
//! - A sorted id list gives stable, deterministic iteration, so a seeded run
//!   draws the same agents every time
//! - Neighbor lists are kept sorted and stored inline for small degrees
//! - Estimates are mutated in place by whichever engine owns the snapshot;
//!   one engine runs at a time
//!
//! Identifiers are index-stable: removing an agent never renumbers the others,
//! so anything positional (mixing matrices, Laplacians) is rebuilt from
//! [`AgentGraph::agent_ids`] after membership changes.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::engine::errors::ConsensusError;
use crate::engine::numeric_kernels::DenseMatrix;

/// Inline capacity of a neighbor list before it spills to the heap.
const INLINE_NEIGHBORS: usize = 8;

/// Sorted neighbor list of one agent.
pub type NeighborList = SmallVec<[AgentId; INLINE_NEIGHBORS]>;

/// A unique identifier for an agent.
///
/// AgentId implements Ord/PartialOrd for stable, deterministic iteration.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AgentId(pub u32);

/// One sensor agent.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Agent {
    pub id: AgentId,
    /// Private initial value.
    pub measurement: f64,
    /// Current local estimate of the network mean.
    pub estimate: f64,
    /// Placement used by the topology collaborator; opaque to the engines.
    pub position: Vec<f64>,
}

impl Agent {
    pub fn new(id: AgentId, measurement: f64, position: Vec<f64>) -> Self {
        Self {
            id,
            measurement,
            estimate: measurement,
            position,
        }
    }
}

/// Undirected agent graph snapshot.
#[derive(Debug, Clone, Default)]
pub struct AgentGraph {
    agents: FxHashMap<AgentId, Agent>,
    adjacency: FxHashMap<AgentId, NeighborList>,
    order: Vec<AgentId>,
    edge_count: usize,
    /// Never decreases, so ids of removed agents are not handed out again.
    next_id: u32,
}

impl AgentGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an isolated agent. Fails if the id is already present.
    pub fn insert_agent(&mut self, agent: Agent) -> Result<(), ConsensusError> {
        let id = agent.id;
        if !agent.measurement.is_finite() {
            return Err(ConsensusError::Graph(format!(
                "agent {:?} has non-finite measurement {}",
                id, agent.measurement
            )));
        }
        match self.order.binary_search(&id) {
            Ok(_) => Err(ConsensusError::Graph(format!(
                "agent {:?} already exists",
                id
            ))),
            Err(pos) => {
                self.order.insert(pos, id);
                self.next_id = self.next_id.max(id.0.saturating_add(1));
                self.agents.insert(id, agent);
                self.adjacency.insert(id, NeighborList::new());
                Ok(())
            }
        }
    }

    /// Adds an undirected edge. Returns `false` if the edge already existed.
    pub fn add_edge(&mut self, a: AgentId, b: AgentId) -> Result<bool, ConsensusError> {
        if a == b {
            return Err(ConsensusError::Graph(format!(
                "self-loop on agent {:?} is not allowed",
                a
            )));
        }
        for id in [a, b] {
            if !self.agents.contains_key(&id) {
                return Err(ConsensusError::Graph(format!("unknown agent {:?}", id)));
            }
        }
        let added = insert_sorted(self.adjacency.entry(a).or_default(), b);
        if !added {
            return Ok(false);
        }
        insert_sorted(self.adjacency.entry(b).or_default(), a);
        self.edge_count += 1;
        Ok(true)
    }

    /// Removes an agent and all its incident edges.
    pub fn remove_agent(&mut self, id: AgentId) -> Result<Agent, ConsensusError> {
        let agent = self
            .agents
            .remove(&id)
            .ok_or_else(|| ConsensusError::Graph(format!("unknown agent {:?}", id)))?;
        let neighbors = self.adjacency.remove(&id).unwrap_or_default();
        for other in &neighbors {
            if let Some(list) = self.adjacency.get_mut(other) {
                if let Ok(pos) = list.binary_search(&id) {
                    list.remove(pos);
                }
            }
        }
        self.edge_count -= neighbors.len();
        if let Ok(pos) = self.order.binary_search(&id) {
            self.order.remove(pos);
        }
        Ok(agent)
    }

    pub fn contains(&self, id: AgentId) -> bool {
        self.agents.contains_key(&id)
    }

    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(&id)
    }

    pub fn agent_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        self.agents.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// All agent ids in ascending order.
    pub fn agent_ids(&self) -> &[AgentId] {
        &self.order
    }

    /// Agents in ascending id order.
    pub fn agents(&self) -> impl Iterator<Item = &Agent> + '_ {
        self.order.iter().filter_map(|id| self.agents.get(id))
    }

    /// Agents with at least one neighbor, ascending. Only these may be drawn
    /// by randomized selection.
    pub fn active_agent_ids(&self) -> Vec<AgentId> {
        self.order
            .iter()
            .copied()
            .filter(|id| self.degree(*id) > 0)
            .collect()
    }

    /// Sorted neighbors of `id`; empty for unknown agents.
    pub fn neighbors(&self, id: AgentId) -> &[AgentId] {
        self.adjacency.get(&id).map(|n| n.as_slice()).unwrap_or(&[])
    }

    pub fn degree(&self, id: AgentId) -> usize {
        self.neighbors(id).len()
    }

    pub fn has_edge(&self, a: AgentId, b: AgentId) -> bool {
        self.neighbors(a).binary_search(&b).is_ok()
    }

    /// Edges as `(low, high)` pairs in ascending order.
    pub fn edges(&self) -> Vec<(AgentId, AgentId)> {
        let mut out = Vec::with_capacity(self.edge_count);
        for &a in &self.order {
            for &b in self.neighbors(a) {
                if a < b {
                    out.push((a, b));
                }
            }
        }
        out
    }

    /// One past the largest id ever inserted, including removed agents.
    pub fn next_agent_id(&self) -> AgentId {
        AgentId(self.next_id)
    }

    /// Sets every estimate back to its agent's measurement.
    pub fn reset_estimates(&mut self) {
        for agent in self.agents.values_mut() {
            agent.estimate = agent.measurement;
        }
    }

    pub fn estimate(&self, id: AgentId) -> Option<f64> {
        self.agents.get(&id).map(|a| a.estimate)
    }

    pub fn set_estimate(&mut self, id: AgentId, value: f64) -> Result<(), ConsensusError> {
        if !value.is_finite() {
            return Err(ConsensusError::Numerical(format!(
                "non-finite estimate {} for agent {:?}",
                value, id
            )));
        }
        let agent = self
            .agents
            .get_mut(&id)
            .ok_or_else(|| ConsensusError::Graph(format!("unknown agent {:?}", id)))?;
        agent.estimate = value;
        Ok(())
    }

    /// Estimates in ascending id order.
    pub fn estimates(&self) -> Vec<f64> {
        self.agents().map(|a| a.estimate).collect()
    }

    /// Measurements in ascending id order.
    pub fn measurements(&self) -> Vec<f64> {
        self.agents().map(|a| a.measurement).collect()
    }

    /// Graph Laplacian `D - A` indexed by `order`.
    ///
    /// Neighbors outside `order` are ignored, which makes the result the
    /// Laplacian of the induced subgraph.
    pub fn laplacian(&self, order: &[AgentId]) -> DenseMatrix {
        let index = index_of(order);
        let mut l = DenseMatrix::zeros(order.len());
        for (row, id) in order.iter().enumerate() {
            let mut degree = 0.0;
            for other in self.neighbors(*id) {
                if let Some(&col) = index.get(other) {
                    l.set(row, col, -1.0);
                    degree += 1.0;
                }
            }
            l.set(row, row, degree);
        }
        l
    }
}

/// Position lookup for an agent ordering.
pub fn index_of(order: &[AgentId]) -> FxHashMap<AgentId, usize> {
    order.iter().enumerate().map(|(i, id)| (*id, i)).collect()
}

fn insert_sorted(list: &mut NeighborList, id: AgentId) -> bool {
    match list.binary_search(&id) {
        Ok(_) => false,
        Err(pos) => {
            list.insert(pos, id);
            true
        }
    }
}
