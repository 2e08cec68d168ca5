//! Run configuration and loop plumbing shared by every engine.

use rand::Rng;
use tracing::warn;

use crate::engine::errors::ConsensusError;
use crate::engine::faults::FaultInjector;
use crate::engine::graph::{AgentGraph, AgentId};
use crate::engine::numeric_kernels::mean;
use crate::metrics::MetricsRecorder;

/// Stopping and validation parameters for one engine call.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RunConfig {
    /// The loop runs while `||x - mean * 1||^2` exceeds this value.
    pub tolerance: f64,
    /// Optional iteration cap. Without one, a run on a disconnected graph
    /// never terminates.
    pub max_iterations: Option<u64>,
    /// Slack used by mixing-matrix validation (sums, symmetry, spectrum).
    pub matrix_tolerance: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-12,
            max_iterations: None,
            matrix_tolerance: 1e-9,
        }
    }
}

impl RunConfig {
    pub fn with_tolerance(tolerance: f64) -> Self {
        Self {
            tolerance,
            ..Self::default()
        }
    }

    pub fn with_max_iterations(mut self, cap: u64) -> Self {
        self.max_iterations = Some(cap);
        self
    }

    pub fn validate(self) -> Result<Self, ConsensusError> {
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(ConsensusError::Validation(
                "tolerance must be finite and > 0".into(),
            ));
        }
        if !self.matrix_tolerance.is_finite() || self.matrix_tolerance < 0.0 {
            return Err(ConsensusError::Validation(
                "matrix_tolerance must be finite and >= 0".into(),
            ));
        }
        if self.max_iterations == Some(0) {
            return Err(ConsensusError::Validation(
                "max_iterations must be > 0 when set".into(),
            ));
        }
        Ok(self)
    }
}

/// Loop guard: `Continue` while the error is above tolerance and the cap has
/// not been reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopState {
    Continue,
    Converged,
    CapReached,
}

pub(crate) fn loop_state(recorder: &MetricsRecorder, config: &RunConfig) -> LoopState {
    if recorder.current_error() <= config.tolerance {
        return LoopState::Converged;
    }
    match config.max_iterations {
        Some(cap) if recorder.iterations() >= cap => LoopState::CapReached,
        _ => LoopState::Continue,
    }
}

/// [`loop_state`] for runs with sequential churn: a converged run keeps
/// iterating while membership changes are still pending.
pub(crate) fn loop_state_with_churn(
    recorder: &MetricsRecorder,
    config: &RunConfig,
    injector: &FaultInjector<'_>,
) -> LoopState {
    match loop_state(recorder, config) {
        LoopState::Converged if injector.has_pending_churn() => LoopState::Continue,
        state => state,
    }
}

/// After churn, averaging protocols can only reach the mean of the estimates
/// the current members hold.
pub(crate) fn retarget_to_estimates(graph: &AgentGraph, recorder: &mut MetricsRecorder) {
    let estimates = graph.estimates();
    recorder.retarget(mean(&estimates), &estimates);
}

pub(crate) fn warn_if_capped(protocol: &str, state: LoopState, recorder: &MetricsRecorder) {
    if state == LoopState::CapReached {
        warn!(
            protocol,
            iterations = recorder.iterations(),
            error = recorder.current_error(),
            "iteration cap reached before convergence"
        );
    }
}

/// Fails when the graph has nothing to average.
pub(crate) fn require_agents(graph: &AgentGraph, min: usize) -> Result<(), ConsensusError> {
    if graph.len() < min {
        return Err(ConsensusError::Validation(format!(
            "graph has {} agents, at least {} required",
            graph.len(),
            min
        )));
    }
    Ok(())
}

/// Uniform draw from agents with at least one neighbor.
pub(crate) fn draw_active_agent<R: Rng + ?Sized>(
    graph: &AgentGraph,
    active: &[AgentId],
    rng: &mut R,
) -> Result<AgentId, ConsensusError> {
    if active.is_empty() {
        return Err(ConsensusError::Validation(format!(
            "no agent with a neighbor among {} agents",
            graph.len()
        )));
    }
    Ok(active[rng.gen_range(0..active.len())])
}

/// Scalar reported back to the caller: the lowest-id active agent's estimate,
/// or the lowest-id agent's when every agent is isolated.
pub(crate) fn reported_estimate(graph: &AgentGraph) -> f64 {
    graph
        .agent_ids()
        .iter()
        .find(|id| graph.degree(**id) > 0)
        .or_else(|| graph.agent_ids().first())
        .and_then(|id| graph.estimate(*id))
        .unwrap_or(0.0)
}
