//! Global-clock averaging: `x <- W x` with the optimal fixed mixing matrix.

use tracing::{info, info_span};

use crate::engine::errors::{ConsensusError, MixingCheck};
use crate::engine::graph::AgentGraph;
use crate::engine::numeric_kernels::mean;
use crate::engine::run::{
    loop_state, reported_estimate, require_agents, warn_if_capped, LoopState, RunConfig,
};
use crate::engine::weights::WeightMatrixBuilder;
use crate::metrics::{MetricsRecorder, RunMetrics};

/// Runs synchronous averaging until the squared error drops to the tolerance.
///
/// Every round uses every edge once, so each round costs `|E|` transmissions.
/// The optimal matrix is checked against [`MixingCheck::GLOBAL`]: negative
/// diagonal entries are allowed, an asymmetric or non-stochastic matrix or one
/// with an eigenvalue outside the unit disc fails with
/// [`ConsensusError::InvalidMixingMatrix`].
pub fn run_synchronous(
    graph: &mut AgentGraph,
    config: &RunConfig,
) -> Result<RunMetrics, ConsensusError> {
    let config = config.validate()?;
    require_agents(graph, 2)?;
    let span = info_span!("synchronous", agents = graph.len(), edges = graph.edge_count());
    let _guard = span.enter();

    graph.reset_estimates();
    let builder = WeightMatrixBuilder::new(graph);
    let mixing = builder.synchronous(graph)?;
    mixing.validate_checks(config.matrix_tolerance, MixingCheck::GLOBAL)?;
    let factor = mixing.asymptotic_convergence_factor()?;

    let mut recorder = MetricsRecorder::new(mean(&graph.measurements()), &graph.estimates());
    let cost = graph.edge_count() as u64;
    let state = loop {
        let state = loop_state(&recorder, &config);
        if state != LoopState::Continue {
            break state;
        }
        mixing.apply(graph)?;
        recorder.charge(cost);
        recorder.record(&graph.estimates())?;
    };
    warn_if_capped("synchronous", state, &recorder);
    info!(
        rounds = recorder.iterations(),
        transmissions = recorder.transmissions(),
        convergence_factor = factor,
        "synchronous run finished"
    );

    let mut metrics = recorder.finish(reported_estimate(graph), state == LoopState::Converged);
    metrics.asymptotic_convergence_factor = Some(factor);
    Ok(metrics)
}
