//! Run instrumentation.
//!
//! [`MetricsRecorder`] accumulates, keyed by cumulative transmission count,
//! the squared error of the current estimates against the reference mean and
//! their dispersion (population standard deviation). Each engine call owns a
//! fresh recorder and turns it into [`RunMetrics`] when the loop exits.
//!
//! Notes:
//! - Trace points are pushed after the iteration's cost is charged, so a
//!   point reads "state reached after spending N transmissions".
//! - The transmission counter only ever grows; dropped transmissions are
//!   charged like delivered ones.

use crate::engine::errors::ConsensusError;
use crate::engine::numeric_kernels::{population_std_dev, squared_distance_to};

/// One sample of a trace.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TracePoint {
    pub transmissions: u64,
    pub value: f64,
}

/// Result of one engine call.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RunMetrics {
    /// Estimate of the lowest-id active agent at termination.
    pub estimate: f64,
    /// Dispersion of all estimates at termination.
    pub final_dispersion: f64,
    /// Squared error against the reference mean at termination.
    pub final_error: f64,
    /// Reference mean the run was converging to when it stopped.
    pub reference_mean: f64,
    pub dispersion_trace: Vec<TracePoint>,
    pub error_trace: Vec<TracePoint>,
    pub transmissions: u64,
    /// Attempted transmissions lost to injected failures (already counted in
    /// `transmissions`).
    pub dropped_transmissions: u64,
    pub iterations: u64,
    /// False when the run stopped on the iteration cap.
    pub converged: bool,
    /// Spectral radius of `W - 11^T/N`; reported by the synchronous engine.
    pub asymptotic_convergence_factor: Option<f64>,
}

/// Per-run accumulator. Never shared across runs.
#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    reference: f64,
    transmissions: u64,
    dropped: u64,
    iterations: u64,
    last_error: f64,
    last_dispersion: f64,
    errors: Vec<TracePoint>,
    dispersion: Vec<TracePoint>,
}

impl MetricsRecorder {
    /// Starts a recorder converging to `reference`, seeded with the error of
    /// the initial estimates (no trace point is recorded for them).
    pub fn new(reference: f64, initial: &[f64]) -> Self {
        Self {
            reference,
            transmissions: 0,
            dropped: 0,
            iterations: 0,
            last_error: squared_distance_to(initial, reference),
            last_dispersion: population_std_dev(initial),
            errors: Vec::new(),
            dispersion: Vec::new(),
        }
    }

    pub fn reference(&self) -> f64 {
        self.reference
    }

    /// Changes the reference mean after a membership change and re-evaluates
    /// the current error against it.
    pub fn retarget(&mut self, reference: f64, estimates: &[f64]) {
        self.reference = reference;
        self.last_error = squared_distance_to(estimates, reference);
        self.last_dispersion = population_std_dev(estimates);
    }

    /// Charges `cost` transmissions.
    pub fn charge(&mut self, cost: u64) {
        self.transmissions += cost;
    }

    /// Marks one already-charged transmission as lost.
    pub fn note_dropped(&mut self) {
        self.dropped += 1;
    }

    /// Closes one iteration: samples error and dispersion at the current
    /// transmission count.
    pub fn record(&mut self, estimates: &[f64]) -> Result<(), ConsensusError> {
        let error = squared_distance_to(estimates, self.reference);
        if !error.is_finite() {
            return Err(ConsensusError::Numerical(format!(
                "squared error became non-finite after {} transmissions",
                self.transmissions
            )));
        }
        let dispersion = population_std_dev(estimates);
        self.iterations += 1;
        self.last_error = error;
        self.last_dispersion = dispersion;
        self.errors.push(TracePoint {
            transmissions: self.transmissions,
            value: error,
        });
        self.dispersion.push(TracePoint {
            transmissions: self.transmissions,
            value: dispersion,
        });
        Ok(())
    }

    /// Squared error after the most recent update.
    pub fn current_error(&self) -> f64 {
        self.last_error
    }

    pub fn transmissions(&self) -> u64 {
        self.transmissions
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn finish(self, estimate: f64, converged: bool) -> RunMetrics {
        RunMetrics {
            estimate,
            final_dispersion: self.last_dispersion,
            final_error: self.last_error,
            reference_mean: self.reference,
            dispersion_trace: self.dispersion,
            error_trace: self.errors,
            transmissions: self.transmissions,
            dropped_transmissions: self.dropped,
            iterations: self.iterations,
            converged,
            asymptotic_convergence_factor: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_after_charging() {
        let mut rec = MetricsRecorder::new(2.5, &[1.0, 2.0, 3.0, 4.0]);
        assert!((rec.current_error() - 5.0).abs() < 1e-15);
        rec.charge(4);
        rec.record(&[2.5, 2.5, 2.5, 2.5]).unwrap();
        rec.charge(4);
        rec.record(&[2.5, 2.5, 2.5, 2.5]).unwrap();

        let metrics = rec.finish(2.5, true);
        assert_eq!(metrics.transmissions, 8);
        assert_eq!(metrics.iterations, 2);
        assert_eq!(
            metrics
                .error_trace
                .iter()
                .map(|p| p.transmissions)
                .collect::<Vec<_>>(),
            vec![4, 8]
        );
        assert_eq!(metrics.final_error, 0.0);
        assert_eq!(metrics.final_dispersion, 0.0);
    }

    #[test]
    fn retarget_reevaluates_error() {
        let mut rec = MetricsRecorder::new(0.0, &[1.0, 1.0]);
        assert_eq!(rec.current_error(), 2.0);
        rec.retarget(1.0, &[1.0, 1.0]);
        assert_eq!(rec.current_error(), 0.0);
        assert_eq!(rec.reference(), 1.0);
    }

    #[test]
    fn non_finite_error_is_reported() {
        let mut rec = MetricsRecorder::new(0.0, &[0.0]);
        assert!(rec.record(&[f64::INFINITY]).is_err());
    }
}
