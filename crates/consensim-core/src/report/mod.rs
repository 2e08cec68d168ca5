//! Plain data handed to the reporting collaborator.
//!
//! Nothing here renders; the CLI serializes these to JSON or prints the
//! [`RunSummary`] display form.

use std::fmt;

use crate::metrics::{RunMetrics, TracePoint};

/// A labelled trace, e.g. the error curve of one protocol.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ErrorSeries {
    pub label: String,
    pub points: Vec<TracePoint>,
}

impl ErrorSeries {
    pub fn errors(label: impl Into<String>, metrics: &RunMetrics) -> Self {
        Self {
            label: label.into(),
            points: metrics.error_trace.clone(),
        }
    }

    pub fn dispersion(label: impl Into<String>, metrics: &RunMetrics) -> Self {
        Self {
            label: label.into(),
            points: metrics.dispersion_trace.clone(),
        }
    }
}

/// Transmissions needed to converge for one exchange-rate value.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SweepPoint {
    pub c: f64,
    pub transmissions: u64,
    pub converged: bool,
}

/// `(c, transmissions)` pairs for one protocol.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CostSweep {
    pub label: String,
    pub points: Vec<SweepPoint>,
}

impl CostSweep {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            points: Vec::new(),
        }
    }

    pub fn push(&mut self, c: f64, metrics: &RunMetrics) {
        self.points.push(SweepPoint {
            c,
            transmissions: metrics.transmissions,
            converged: metrics.converged,
        });
    }

    /// Cheapest converged point, first one on ties.
    pub fn cheapest(&self) -> Option<SweepPoint> {
        self.points
            .iter()
            .filter(|p| p.converged)
            .fold(None, |best: Option<SweepPoint>, p| match best {
                Some(b) if b.transmissions <= p.transmissions => Some(b),
                _ => Some(*p),
            })
    }
}

/// Scalar outcome of one run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RunSummary {
    pub protocol: String,
    pub agents: usize,
    pub estimate: f64,
    pub reference_mean: f64,
    pub final_error: f64,
    pub final_dispersion: f64,
    pub transmissions: u64,
    pub dropped_transmissions: u64,
    pub iterations: u64,
    pub converged: bool,
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub asymptotic_convergence_factor: Option<f64>,
}

impl RunSummary {
    /// `agents` is the population when the run ended.
    pub fn new(protocol: impl Into<String>, agents: usize, metrics: &RunMetrics) -> Self {
        Self {
            protocol: protocol.into(),
            agents,
            estimate: metrics.estimate,
            reference_mean: metrics.reference_mean,
            final_error: metrics.final_error,
            final_dispersion: metrics.final_dispersion,
            transmissions: metrics.transmissions,
            dropped_transmissions: metrics.dropped_transmissions,
            iterations: metrics.iterations,
            converged: metrics.converged,
            asymptotic_convergence_factor: metrics.asymptotic_convergence_factor,
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "protocol:       {}", self.protocol)?;
        writeln!(f, "agents:         {}", self.agents)?;
        writeln!(f, "estimate:       {:.9}", self.estimate)?;
        writeln!(f, "true mean:      {:.9}", self.reference_mean)?;
        writeln!(f, "squared error:  {:.3e}", self.final_error)?;
        writeln!(f, "dispersion:     {:.3e}", self.final_dispersion)?;
        writeln!(f, "iterations:     {}", self.iterations)?;
        write!(f, "transmissions:  {}", self.transmissions)?;
        if self.dropped_transmissions > 0 {
            write!(f, " ({} dropped)", self.dropped_transmissions)?;
        }
        if let Some(factor) = self.asymptotic_convergence_factor {
            write!(f, "\nconv. factor:   {:.6}", factor)?;
        }
        if !self.converged {
            write!(f, "\nstopped on the iteration cap")?;
        }
        Ok(())
    }
}
