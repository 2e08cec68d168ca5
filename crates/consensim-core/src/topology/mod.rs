//! Topology and measurement collaborators.
//!
//! The engines only consume an [`AgentGraph`]; this module builds one. It
//! provides random geometric graphs (agents scattered in the unit cube, joined
//! when closer than a radius), a few fixed shapes used by tests and
//! benchmarks, and the [`Topology`] hook the fault injector calls to place an
//! agent that joins mid-experiment.

use std::collections::VecDeque;

use rand::{Rng, RngCore};

use crate::engine::errors::ConsensusError;
use crate::engine::graph::{Agent, AgentGraph, AgentId};

/// Placement retries before a joining agent is accepted without neighbors.
const MAX_PLACEMENT_ATTEMPTS: usize = 64;

/// Connectivity rule used when agents join a running graph.
pub trait Topology {
    /// Inserts agent `id` with `measurement` and connects it to the existing
    /// agents according to this topology's rule.
    fn attach(
        &self,
        graph: &mut AgentGraph,
        id: AgentId,
        measurement: f64,
        rng: &mut dyn RngCore,
    ) -> Result<(), ConsensusError>;
}

/// Produces private scalar measurements.
pub trait MeasurementSource {
    fn sample(&self, rng: &mut dyn RngCore) -> f64;

    fn generate(&self, count: usize, rng: &mut dyn RngCore) -> Vec<f64> {
        (0..count).map(|_| self.sample(rng)).collect()
    }
}

/// Uniform readings in `[low, high)`, e.g. temperature sensors.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UniformMeasurements {
    pub low: f64,
    pub high: f64,
}

impl Default for UniformMeasurements {
    fn default() -> Self {
        Self {
            low: 15.0,
            high: 25.0,
        }
    }
}

impl UniformMeasurements {
    pub fn new(low: f64, high: f64) -> Result<Self, ConsensusError> {
        if !(low.is_finite() && high.is_finite() && low < high) {
            return Err(ConsensusError::Validation(format!(
                "measurement range [{}, {}) is empty or non-finite",
                low, high
            )));
        }
        Ok(Self { low, high })
    }
}

impl MeasurementSource for UniformMeasurements {
    fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        rng.gen_range(self.low..self.high)
    }
}

/// Agents placed uniformly in `[0, 1)^dimension`, joined when closer than
/// `radius`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RandomGeometricTopology {
    pub radius: f64,
    pub dimension: usize,
}

/// Radius `sqrt(ln(2n) / n)`, which makes a 2-D random geometric graph
/// connected with high probability.
pub fn connectivity_radius(agents: usize) -> f64 {
    let n = agents.max(1) as f64;
    ((2.0 * n).ln() / n).sqrt()
}

impl RandomGeometricTopology {
    pub fn new(radius: f64, dimension: usize) -> Result<Self, ConsensusError> {
        if !radius.is_finite() || radius <= 0.0 {
            return Err(ConsensusError::Validation(format!(
                "radius must be finite and > 0, got {}",
                radius
            )));
        }
        if dimension == 0 {
            return Err(ConsensusError::Validation("dimension must be > 0".into()));
        }
        Ok(Self { radius, dimension })
    }

    /// Builds a graph with one agent per measurement, ids `0..n`.
    pub fn generate(
        &self,
        measurements: &[f64],
        rng: &mut dyn RngCore,
    ) -> Result<AgentGraph, ConsensusError> {
        let mut graph = AgentGraph::new();
        for (i, &m) in measurements.iter().enumerate() {
            let position = self.random_position(rng);
            graph.insert_agent(Agent::new(AgentId(i as u32), m, position))?;
        }
        let ids = graph.agent_ids().to_vec();
        for (offset, &a) in ids.iter().enumerate() {
            for &b in &ids[offset + 1..] {
                if self.within_reach(&graph, a, b) {
                    graph.add_edge(a, b)?;
                }
            }
        }
        Ok(graph)
    }

    fn random_position(&self, rng: &mut dyn RngCore) -> Vec<f64> {
        (0..self.dimension).map(|_| rng.gen::<f64>()).collect()
    }

    fn within_reach(&self, graph: &AgentGraph, a: AgentId, b: AgentId) -> bool {
        match (graph.agent(a), graph.agent(b)) {
            (Some(x), Some(y)) => distance(&x.position, &y.position) < self.radius,
            _ => false,
        }
    }
}

impl Topology for RandomGeometricTopology {
    fn attach(
        &self,
        graph: &mut AgentGraph,
        id: AgentId,
        measurement: f64,
        rng: &mut dyn RngCore,
    ) -> Result<(), ConsensusError> {
        let mut position = self.random_position(rng);
        for _ in 1..MAX_PLACEMENT_ATTEMPTS {
            let reachable = graph
                .agents()
                .any(|other| distance(&other.position, &position) < self.radius);
            if reachable || graph.is_empty() {
                break;
            }
            position = self.random_position(rng);
        }

        graph.insert_agent(Agent::new(id, measurement, position))?;
        let others: Vec<AgentId> = graph
            .agent_ids()
            .iter()
            .copied()
            .filter(|other| *other != id)
            .collect();
        for other in others {
            if self.within_reach(graph, id, other) {
                graph.add_edge(id, other)?;
            }
        }
        Ok(())
    }
}

/// Joining agents connect to every existing agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompleteTopology;

impl Topology for CompleteTopology {
    fn attach(
        &self,
        graph: &mut AgentGraph,
        id: AgentId,
        measurement: f64,
        _rng: &mut dyn RngCore,
    ) -> Result<(), ConsensusError> {
        let others = graph.agent_ids().to_vec();
        graph.insert_agent(Agent::new(id, measurement, Vec::new()))?;
        for other in others {
            graph.add_edge(id, other)?;
        }
        Ok(())
    }
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Graph with ids `0..n` and the given undirected edges.
pub fn graph_from_edges(
    measurements: &[f64],
    edges: &[(u32, u32)],
) -> Result<AgentGraph, ConsensusError> {
    let mut graph = AgentGraph::new();
    for (i, &m) in measurements.iter().enumerate() {
        graph.insert_agent(Agent::new(AgentId(i as u32), m, Vec::new()))?;
    }
    for &(a, b) in edges {
        graph.add_edge(AgentId(a), AgentId(b))?;
    }
    Ok(graph)
}

/// Ring `0 - 1 - ... - (n-1) - 0`.
pub fn cycle_graph(measurements: &[f64]) -> Result<AgentGraph, ConsensusError> {
    let n = measurements.len() as u32;
    let edges: Vec<(u32, u32)> = if n < 3 {
        (1..n).map(|i| (i - 1, i)).collect()
    } else {
        (0..n).map(|i| (i, (i + 1) % n)).collect()
    };
    graph_from_edges(measurements, &edges)
}

/// Every pair of agents connected.
pub fn complete_graph(measurements: &[f64]) -> Result<AgentGraph, ConsensusError> {
    let n = measurements.len() as u32;
    let mut edges = Vec::new();
    for a in 0..n {
        for b in (a + 1)..n {
            edges.push((a, b));
        }
    }
    graph_from_edges(measurements, &edges)
}

/// Breadth-first reachability over the whole agent set. An empty graph counts
/// as connected.
pub fn is_connected(graph: &AgentGraph) -> bool {
    let Some(&start) = graph.agent_ids().first() else {
        return true;
    };
    let mut seen = rustc_hash::FxHashSet::default();
    let mut queue = VecDeque::from([start]);
    seen.insert(start);
    while let Some(id) = queue.pop_front() {
        for &next in graph.neighbors(id) {
            if seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    seen.len() == graph.len()
}
