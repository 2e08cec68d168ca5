//! Single-activation averaging.
//!
//! Each iteration wakes one agent drawn uniformly from the agents that have a
//! neighbor; the agent and its neighbors all move to the mean of their
//! estimates. Two renditions share that rule:
//!
//! - [`run_async_matrix`] builds and validates the per-activation mixing
//!   matrix and multiplies the whole estimate vector by it. It is `O(N^3)`
//!   per activation and exists to check the direct rendition;
//! - [`run_async_direct`] writes the neighborhood mean in place.
//!
//! Both charge `deg(i) + 1` transmissions per activation.

use rand::Rng;
use smallvec::SmallVec;
use tracing::{info, info_span, trace};

use crate::engine::errors::ConsensusError;
use crate::engine::faults::FaultInjector;
use crate::engine::graph::{AgentGraph, AgentId};
use crate::engine::numeric_kernels::mean;
use crate::engine::run::{
    draw_active_agent, loop_state, loop_state_with_churn, reported_estimate, require_agents,
    retarget_to_estimates, warn_if_capped, LoopState, RunConfig,
};
use crate::engine::weights::WeightMatrixBuilder;
use crate::metrics::{MetricsRecorder, RunMetrics};

/// Matrix-based asynchronous averaging.
pub fn run_async_matrix<R: Rng>(
    graph: &mut AgentGraph,
    config: &RunConfig,
    rng: &mut R,
) -> Result<RunMetrics, ConsensusError> {
    let config = config.validate()?;
    require_agents(graph, 2)?;
    let span = info_span!("async_matrix", agents = graph.len(), edges = graph.edge_count());
    let _guard = span.enter();

    graph.reset_estimates();
    let builder = WeightMatrixBuilder::new(graph);
    let active = graph.active_agent_ids();
    let mut recorder = MetricsRecorder::new(mean(&graph.measurements()), &graph.estimates());

    let state = loop {
        let state = loop_state(&recorder, &config);
        if state != LoopState::Continue {
            break state;
        }
        let agent = draw_active_agent(graph, &active, rng)?;
        let mixing = builder.local_activation(graph, agent)?;
        mixing.validate(config.matrix_tolerance)?;
        mixing.apply(graph)?;
        recorder.charge(graph.degree(agent) as u64 + 1);
        recorder.record(&graph.estimates())?;
    };
    warn_if_capped("async_matrix", state, &recorder);
    info!(
        activations = recorder.iterations(),
        transmissions = recorder.transmissions(),
        "matrix-based asynchronous run finished"
    );
    Ok(recorder.finish(reported_estimate(graph), state == LoopState::Converged))
}

/// Direct asynchronous averaging without faults.
pub fn run_async_direct<R: Rng>(
    graph: &mut AgentGraph,
    config: &RunConfig,
    rng: &mut R,
) -> Result<RunMetrics, ConsensusError> {
    run_async_direct_with_faults(graph, config, &mut FaultInjector::none(), rng)
}

/// Direct asynchronous averaging under injected faults.
///
/// A neighbor whose link fails is left out of that activation's averaging set
/// and keeps its estimate; the link's transmission is still charged. After
/// each churn event the reference mean moves to the mean of the current
/// estimates.
pub fn run_async_direct_with_faults<R: Rng>(
    graph: &mut AgentGraph,
    config: &RunConfig,
    injector: &mut FaultInjector<'_>,
    rng: &mut R,
) -> Result<RunMetrics, ConsensusError> {
    let config = config.validate()?;
    require_agents(graph, 2)?;
    let span = info_span!("async_direct", agents = graph.len(), edges = graph.edge_count());
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

        let agent = draw_active_agent(graph, &active, rng)?;
        let mut group: SmallVec<[AgentId; 9]> = SmallVec::new();
        group.push(agent);
        for &neighbor in graph.neighbors(agent) {
            if injector.transmission_fails(rng) {
                trace!(from = agent.0, to = neighbor.0, "link dropped");
                recorder.note_dropped();
            } else {
                group.push(neighbor);
            }
        }
        average_in_place(graph, &group)?;
        recorder.charge(graph.degree(agent) as u64 + 1);
        recorder.record(&graph.estimates())?;
    };
    warn_if_capped("async_direct", state, &recorder);
    info!(
        activations = recorder.iterations(),
        transmissions = recorder.transmissions(),
        remaining_agents = graph.len(),
        "direct asynchronous run finished"
    );
    Ok(recorder.finish(reported_estimate(graph), state == LoopState::Converged))
}

/// Sets every agent in `group` to the mean of their estimates.
fn average_in_place(graph: &mut AgentGraph, group: &[AgentId]) -> Result<(), ConsensusError> {
    let mut values: SmallVec<[f64; 9]> = SmallVec::with_capacity(group.len());
    for id in group {
        let value = graph
            .estimate(*id)
            .ok_or_else(|| ConsensusError::Internal(format!("agent {:?} vanished", id)))?;
        values.push(value);
    }
    let average = mean(&values);
    for id in group {
        graph.set_estimate(*id, average)?;
    }
    Ok(())
}
