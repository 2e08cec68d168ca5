//! Randomized pairwise gossip.
//!
//! Each iteration draws an agent `i` with at least one neighbor, then one
//! neighbor `j` of `i`, both uniformly; `i` and `j` replace their estimates by
//! their mean. One edge is used once, so every attempt costs one
//! transmission, including attempts lost to injected failures.

use rand::Rng;
use tracing::{info, info_span, trace};

use crate::engine::errors::ConsensusError;
use crate::engine::faults::FaultInjector;
use crate::engine::graph::{AgentGraph, AgentId};
use crate::engine::numeric_kernels::mean;
use crate::engine::run::{
    draw_active_agent, loop_state_with_churn, reported_estimate, require_agents,
    retarget_to_estimates, warn_if_capped, LoopState, RunConfig,
};
use crate::metrics::{MetricsRecorder, RunMetrics};

/// Random gossip without faults.
pub fn run_random_gossip<R: Rng>(
    graph: &mut AgentGraph,
    config: &RunConfig,
    rng: &mut R,
) -> Result<RunMetrics, ConsensusError> {
    run_random_gossip_with_faults(graph, config, &mut FaultInjector::none(), rng)
}

/// Random gossip under transmission failure and membership churn.
pub fn run_random_gossip_with_faults<R: Rng>(
    graph: &mut AgentGraph,
    config: &RunConfig,
    injector: &mut FaultInjector<'_>,
    rng: &mut R,
) -> Result<RunMetrics, ConsensusError> {
    let config = config.validate()?;
    require_agents(graph, 2)?;
    let span = info_span!(
        "random_gossip",
        agents = graph.len(),
        edges = graph.edge_count(),
        failure_rate = injector.config().failure_rate
    );
    let _guard = span.enter();

    injector.prepare(graph, rng)?;
    graph.reset_estimates();
    let mut active = graph.active_agent_ids();
    let mut recorder = MetricsRecorder::new(mean(&graph.measurements()), &graph.estimates());

    let state = loop {
        let state = loop_state_with_churn(&recorder, &config, injector);
        if state != LoopState::Continue {
            break state;
        }
        if injector.step(graph, rng)?.is_some() {
            active = graph.active_agent_ids();
            retarget_to_estimates(graph, &mut recorder);
        }

        let i = draw_active_agent(graph, &active, rng)?;
        let j = draw_neighbor(graph, i, rng)?;
        recorder.charge(1);
        if injector.transmission_fails(rng) {
            trace!(from = i.0, to = j.0, "gossip exchange dropped");
            recorder.note_dropped();
        } else {
            exchange(graph, i, j)?;
        }
        recorder.record(&graph.estimates())?;
    };
    warn_if_capped("random_gossip", state, &recorder);
    info!(
        attempts = recorder.iterations(),
        transmissions = recorder.transmissions(),
        remaining_agents = graph.len(),
        "gossip run finished"
    );
    Ok(recorder.finish(reported_estimate(graph), state == LoopState::Converged))
}

fn draw_neighbor<R: Rng>(
    graph: &AgentGraph,
    agent: AgentId,
    rng: &mut R,
) -> Result<AgentId, ConsensusError> {
    let neighbors = graph.neighbors(agent);
    if neighbors.is_empty() {
        return Err(ConsensusError::Internal(format!(
            "agent {:?} was drawn without neighbors",
            agent
        )));
    }
    Ok(neighbors[rng.gen_range(0..neighbors.len())])
}

fn exchange(graph: &mut AgentGraph, i: AgentId, j: AgentId) -> Result<(), ConsensusError> {
    let (Some(xi), Some(xj)) = (graph.estimate(i), graph.estimate(j)) else {
        return Err(ConsensusError::Internal(format!(
            "gossip pair {:?}-{:?} is not in the graph",
            i, j
        )));
    };
    let average = (xi + xj) / 2.0;
    graph.set_estimate(i, average)?;
    graph.set_estimate(j, average)
}
