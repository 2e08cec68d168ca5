//! Primal-dual method of multipliers for averaging.
//!
//! Averaging is posed as `min sum_i 1/2 (x_i - a_i)^2` subject to
//! `A_ij x_i + A_ji x_j = 0` on every edge, with `A_ij = +1` when `i < j`
//! and `-1` otherwise. Agent `i` holds one dual `z_{i|j}` per neighbor.
//!
//! An activation of `i`:
//!
//! ```text
//! x_i     = (a_i - sum_j A_ij z_{i|j}) / (1 + c * deg(i))
//! y_{i|j} = z_{i|j} + 2c * A_ij * x_i        (sent to j)
//! z_{j|i} = y_{i|j}                          (on delivery)
//! ```
//!
//! The synchronous engine activates every agent per round from the same dual
//! snapshot and charges `2|E|`; the asynchronous engine activates one agent
//! and charges `deg(i)`. A lost message leaves `z_{j|i}` untouched.

use rand::Rng;
use rustc_hash::FxHashMap;
use tracing::{debug, info, info_span, trace};

use crate::engine::errors::ConsensusError;
use crate::engine::faults::{ChurnEvent, FaultInjector};
use crate::engine::graph::{AgentGraph, AgentId};
use crate::engine::numeric_kernels::mean;
use crate::engine::run::{
    draw_active_agent, loop_state, loop_state_with_churn, reported_estimate, require_agents,
    warn_if_capped, LoopState, RunConfig,
};
use crate::metrics::{MetricsRecorder, RunMetrics};

/// PDMM parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PdmmConfig {
    /// Exchange rate. Larger values speed up early progress but add
    /// transient oscillation.
    pub c: f64,
}

impl Default for PdmmConfig {
    fn default() -> Self {
        Self { c: 0.4 }
    }
}

impl PdmmConfig {
    pub fn new(c: f64) -> Self {
        Self { c }
    }

    pub fn validate(self) -> Result<Self, ConsensusError> {
        if !self.c.is_finite() || self.c <= 0.0 {
            return Err(ConsensusError::Validation(format!(
                "PDMM exchange rate c must be finite and > 0, got {}",
                self.c
            )));
        }
        Ok(self)
    }
}

/// The two duals of one edge: `low` is held by the lower-id endpoint, `high`
/// by the other.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct EdgeDuals {
    low: f64,
    high: f64,
}

/// Edge-keyed dual variables.
///
/// Only an endpoint of an edge can deliver into it, and a delivery only ever
/// writes the receiving endpoint's side.
#[derive(Debug, Clone, Default)]
pub struct DualState {
    edges: FxHashMap<(AgentId, AgentId), EdgeDuals>,
}

#[inline]
fn edge_key(a: AgentId, b: AgentId) -> (AgentId, AgentId) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// `A_ij`.
#[inline]
fn sign(i: AgentId, j: AgentId) -> f64 {
    if i < j {
        1.0
    } else {
        -1.0
    }
}

impl DualState {
    /// Zero duals on every edge of `graph`.
    pub fn new(graph: &AgentGraph) -> Self {
        let edges = graph
            .edges()
            .into_iter()
            .map(|edge| (edge, EdgeDuals::default()))
            .collect();
        Self { edges }
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// `z_{owner|neighbor}`, if the edge exists.
    pub fn held_by(&self, owner: AgentId, neighbor: AgentId) -> Option<f64> {
        let duals = self.edges.get(&edge_key(owner, neighbor))?;
        Some(if owner < neighbor { duals.low } else { duals.high })
    }

    /// Delivers `sender`'s message on the shared edge: sets
    /// `z_{receiver|sender}`.
    pub fn deliver(
        &mut self,
        sender: AgentId,
        receiver: AgentId,
        value: f64,
    ) -> Result<(), ConsensusError> {
        let duals = self.edges.get_mut(&edge_key(sender, receiver)).ok_or_else(|| {
            ConsensusError::Graph(format!(
                "no dual state between {:?} and {:?}",
                sender, receiver
            ))
        })?;
        if receiver < sender {
            duals.low = value;
        } else {
            duals.high = value;
        }
        Ok(())
    }

    /// Zero duals for every edge of a joining agent.
    pub fn seed_agent(&mut self, graph: &AgentGraph, id: AgentId) {
        for &neighbor in graph.neighbors(id) {
            self.edges.entry(edge_key(id, neighbor)).or_default();
        }
    }

    /// Drops every dual on an edge of a departed agent.
    pub fn forget_agent(&mut self, id: AgentId) {
        self.edges.retain(|(a, b), _| *a != id && *b != id);
    }

    fn apply_churn(&mut self, graph: &AgentGraph, event: &ChurnEvent) {
        match event {
            ChurnEvent::Dropped(agent) => self.forget_agent(agent.id),
            ChurnEvent::Added(id) => self.seed_agent(graph, *id),
        }
    }
}

/// New primal value of `agent` from its measurement and held duals.
fn primal_update(
    graph: &AgentGraph,
    duals: &DualState,
    c: f64,
    agent: AgentId,
) -> Result<f64, ConsensusError> {
    let measurement = graph
        .agent(agent)
        .map(|a| a.measurement)
        .ok_or_else(|| ConsensusError::Graph(format!("unknown agent {:?}", agent)))?;
    let neighbors = graph.neighbors(agent);
    let mut weighted = 0.0;
    for &j in neighbors {
        let z = duals.held_by(agent, j).ok_or_else(|| {
            ConsensusError::Internal(format!("missing dual for edge {:?}-{:?}", agent, j))
        })?;
        weighted += sign(agent, j) * z;
    }
    Ok((measurement - weighted) / (1.0 + c * neighbors.len() as f64))
}

/// Outgoing dual `y_{agent|neighbor}` for primal value `x`.
fn outgoing_dual(
    duals: &DualState,
    c: f64,
    agent: AgentId,
    neighbor: AgentId,
    x: f64,
) -> Result<f64, ConsensusError> {
    let z = duals.held_by(agent, neighbor).ok_or_else(|| {
        ConsensusError::Internal(format!("missing dual for edge {:?}-{:?}", agent, neighbor))
    })?;
    Ok(z + 2.0 * c * sign(agent, neighbor) * x)
}

/// Synchronous PDMM: every agent updates from the same dual snapshot.
pub fn run_pdmm_sync(
    graph: &mut AgentGraph,
    config: &RunConfig,
    pdmm: &PdmmConfig,
) -> Result<RunMetrics, ConsensusError> {
    let config = config.validate()?;
    let c = pdmm.validate()?.c;
    require_agents(graph, 2)?;
    let span = info_span!("pdmm_sync", agents = graph.len(), edges = graph.edge_count(), c);
    let _guard = span.enter();

    graph.reset_estimates();
    let mut duals = DualState::new(graph);
    let order = graph.agent_ids().to_vec();
    let cost = 2 * graph.edge_count() as u64;
    let mut recorder = MetricsRecorder::new(mean(&graph.measurements()), &graph.estimates());
    let mut outgoing = Vec::with_capacity(2 * graph.edge_count());

    let state = loop {
        let state = loop_state(&recorder, &config);
        if state != LoopState::Continue {
            break state;
        }
        let primal = order
            .iter()
            .map(|id| primal_update(graph, &duals, c, *id))
            .collect::<Result<Vec<_>, _>>()?;

        outgoing.clear();
        for (&id, &x) in order.iter().zip(&primal) {
            graph.set_estimate(id, x)?;
            for &j in graph.neighbors(id) {
                outgoing.push((id, j, outgoing_dual(&duals, c, id, j, x)?));
            }
        }
        for &(sender, receiver, y) in &outgoing {
            duals.deliver(sender, receiver, y)?;
        }
        recorder.charge(cost);
        recorder.record(&graph.estimates())?;
    };
    warn_if_capped("pdmm_sync", state, &recorder);
    info!(
        rounds = recorder.iterations(),
        transmissions = recorder.transmissions(),
        "synchronous PDMM run finished"
    );
    Ok(recorder.finish(reported_estimate(graph), state == LoopState::Converged))
}

/// Asynchronous PDMM without faults.
pub fn run_pdmm_async<R: Rng>(
    graph: &mut AgentGraph,
    config: &RunConfig,
    pdmm: &PdmmConfig,
    rng: &mut R,
) -> Result<RunMetrics, ConsensusError> {
    run_pdmm_async_with_faults(graph, config, pdmm, &mut FaultInjector::none(), rng)
}

/// Asynchronous PDMM under message loss and membership churn.
///
/// After a churn event the duals of departed edges are discarded, new edges
/// start at zero and the reference mean becomes the mean of the current
/// members' measurements, which is the new fixed point.
pub fn run_pdmm_async_with_faults<R: Rng>(
    graph: &mut AgentGraph,
    config: &RunConfig,
    pdmm: &PdmmConfig,
    injector: &mut FaultInjector<'_>,
    rng: &mut R,
) -> Result<RunMetrics, ConsensusError> {
    let config = config.validate()?;
    let c = pdmm.validate()?.c;
    require_agents(graph, 2)?;
    let span = info_span!(
        "pdmm_async",
        agents = graph.len(),
        edges = graph.edge_count(),
        c,
        failure_rate = injector.config().failure_rate
    );
    let _guard = span.enter();

    injector.prepare(graph, rng)?;
    graph.reset_estimates();
    let mut duals = DualState::new(graph);
    let mut active = graph.active_agent_ids();
    let mut recorder = MetricsRecorder::new(mean(&graph.measurements()), &graph.estimates());

    let state = loop {
        let state = loop_state_with_churn(&recorder, &config, injector);
        if state != LoopState::Continue {
            break state;
        }
        if let Some(event) = injector.step(graph, rng)? {
            duals.apply_churn(graph, &event);
            active = graph.active_agent_ids();
            recorder.retarget(mean(&graph.measurements()), &graph.estimates());
            debug!(duals = duals.edge_count(), "dual state rebuilt after churn");
        }

        let agent = draw_active_agent(graph, &active, rng)?;
        let x = primal_update(graph, &duals, c, agent)?;
        graph.set_estimate(agent, x)?;
        for &j in graph.neighbors(agent) {
            let y = outgoing_dual(&duals, c, agent, j, x)?;
            if injector.transmission_fails(rng) {
                trace!(from = agent.0, to = j.0, "PDMM message dropped");
                recorder.note_dropped();
            } else {
                duals.deliver(agent, j, y)?;
            }
        }
        recorder.charge(graph.degree(agent) as u64);
        recorder.record(&graph.estimates())?;
    };
    warn_if_capped("pdmm_async", state, &recorder);
    info!(
        activations = recorder.iterations(),
        transmissions = recorder.transmissions(),
        remaining_agents = graph.len(),
        "asynchronous PDMM run finished"
    );
    Ok(recorder.finish(reported_estimate(graph), state == LoopState::Converged))
}
