//! Fault injection shared by the engines.
//!
//! Two independent fault models:
//! - transmission failure: each attempted exchange is lost with probability
//!   `failure_rate`; the caller still charges its cost;
//! - membership churn: `round(drop_rate * N)` agents are removed and
//!   `round(add_rate * N)` agents join, either all before the run (bulk) or
//!   one event at a time while the run progresses (sequential).
//!
//! Drop and add rates are not expected to be nonzero together. The
//! combination is not rejected; drops are applied before adds.

use rand::{Rng, RngCore};
use tracing::debug;

use crate::engine::errors::ConsensusError;
use crate::engine::graph::{Agent, AgentGraph, AgentId};
use crate::topology::{MeasurementSource, Topology};

/// When membership changes are applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ChurnMode {
    /// Every change applied once, before estimates are initialised.
    #[default]
    Bulk,
    /// Changes interleaved stochastically with iterations.
    Sequential,
}

/// Fault parameters for one run.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FaultConfig {
    /// Probability that a single transmission is lost.
    pub failure_rate: f64,
    /// Fraction of the initial population removed.
    pub drop_rate: f64,
    /// Fraction of the initial population added.
    pub add_rate: f64,
    pub churn_mode: ChurnMode,
    /// Per-iteration probability that a pending sequential churn event fires.
    pub churn_event_probability: f64,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            failure_rate: 0.0,
            drop_rate: 0.0,
            add_rate: 0.0,
            churn_mode: ChurnMode::Bulk,
            churn_event_probability: 0.01,
        }
    }
}

impl FaultConfig {
    /// No faults at all.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate;
        self
    }

    pub fn with_drop(mut self, rate: f64, mode: ChurnMode) -> Self {
        self.drop_rate = rate;
        self.churn_mode = mode;
        self
    }

    pub fn with_add(mut self, rate: f64, mode: ChurnMode) -> Self {
        self.add_rate = rate;
        self.churn_mode = mode;
        self
    }

    pub fn with_churn_event_probability(mut self, probability: f64) -> Self {
        self.churn_event_probability = probability;
        self
    }

    pub fn has_churn(&self) -> bool {
        self.drop_rate > 0.0 || self.add_rate > 0.0
    }

    pub fn validate(self) -> Result<Self, ConsensusError> {
        for (name, value) in [
            ("failure_rate", self.failure_rate),
            ("drop_rate", self.drop_rate),
            ("add_rate", self.add_rate),
            ("churn_event_probability", self.churn_event_probability),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConsensusError::Validation(format!(
                    "{} must be in [0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.churn_mode == ChurnMode::Sequential
            && self.has_churn()
            && self.churn_event_probability == 0.0
        {
            return Err(ConsensusError::Validation(
                "sequential churn needs churn_event_probability > 0".into(),
            ));
        }
        Ok(self)
    }
}

/// One applied membership change.
#[derive(Debug, Clone, PartialEq)]
pub enum ChurnEvent {
    /// The removed agent, with its last estimate.
    Dropped(Agent),
    Added(AgentId),
}

/// Applies a [`FaultConfig`] to a running engine.
///
/// Add-churn needs a topology to place joining agents and a measurement
/// source to seed them; see [`FaultInjector::with_membership`].
pub struct FaultInjector<'t> {
    config: FaultConfig,
    topology: Option<&'t dyn Topology>,
    measurements: Option<&'t dyn MeasurementSource>,
    pending_drops: usize,
    pending_adds: usize,
}

impl<'t> FaultInjector<'t> {
    pub fn new(config: FaultConfig) -> Result<Self, ConsensusError> {
        Ok(Self {
            config: config.validate()?,
            topology: None,
            measurements: None,
            pending_drops: 0,
            pending_adds: 0,
        })
    }

    /// Injector that never interferes.
    pub fn none() -> Self {
        Self {
            config: FaultConfig::none(),
            topology: None,
            measurements: None,
            pending_drops: 0,
            pending_adds: 0,
        }
    }

    pub fn with_membership(
        mut self,
        topology: &'t dyn Topology,
        measurements: &'t dyn MeasurementSource,
    ) -> Self {
        self.topology = Some(topology);
        self.measurements = Some(measurements);
        self
    }

    pub fn config(&self) -> &FaultConfig {
        &self.config
    }

    /// Decides whether one transmission is lost. Draws from `rng` only when
    /// the failure rate is nonzero, so fault-free runs replay plain runs.
    pub fn transmission_fails<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        self.config.failure_rate > 0.0 && rng.gen_bool(self.config.failure_rate)
    }

    /// Sizes the churn against the current population. Bulk churn is applied
    /// immediately and its events returned; sequential churn is queued for
    /// [`FaultInjector::step`].
    pub fn prepare(
        &mut self,
        graph: &mut AgentGraph,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<ChurnEvent>, ConsensusError> {
        let population = graph.len() as f64;
        self.pending_drops = (self.config.drop_rate * population).round() as usize;
        self.pending_adds = (self.config.add_rate * population).round() as usize;
        if self.pending_adds > 0 && (self.topology.is_none() || self.measurements.is_none()) {
            return Err(ConsensusError::Validation(
                "add churn requires a topology and a measurement source".into(),
            ));
        }
        debug!(
            mode = ?self.config.churn_mode,
            drops = self.pending_drops,
            adds = self.pending_adds,
            "churn prepared"
        );

        let mut events = Vec::new();
        if self.config.churn_mode == ChurnMode::Bulk {
            while let Some(event) = self.next_event(graph, rng)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    pub fn has_pending_churn(&self) -> bool {
        self.pending_drops > 0 || self.pending_adds > 0
    }

    /// Called once per iteration of a sequential run: with probability
    /// `churn_event_probability` applies one pending change.
    pub fn step(
        &mut self,
        graph: &mut AgentGraph,
        rng: &mut dyn RngCore,
    ) -> Result<Option<ChurnEvent>, ConsensusError> {
        if self.config.churn_mode != ChurnMode::Sequential || !self.has_pending_churn() {
            return Ok(None);
        }
        if !rng.gen_bool(self.config.churn_event_probability) {
            return Ok(None);
        }
        self.next_event(graph, rng)
    }

    fn next_event(
        &mut self,
        graph: &mut AgentGraph,
        rng: &mut dyn RngCore,
    ) -> Result<Option<ChurnEvent>, ConsensusError> {
        if self.pending_drops > 0 {
            self.pending_drops -= 1;
            // Never empty the graph completely.
            if graph.len() <= 1 {
                self.pending_drops = 0;
                return self.next_event(graph, rng);
            }
            return self.drop_one(graph, rng).map(Some);
        }
        if self.pending_adds > 0 {
            self.pending_adds -= 1;
            return self.add_one(graph, rng).map(Some);
        }
        Ok(None)
    }

    fn drop_one(
        &self,
        graph: &mut AgentGraph,
        rng: &mut dyn RngCore,
    ) -> Result<ChurnEvent, ConsensusError> {
        let ids = graph.agent_ids();
        let victim = ids[rng.gen_range(0..ids.len())];
        let agent = graph.remove_agent(victim)?;
        debug!(agent = victim.0, remaining = graph.len(), "agent dropped");
        Ok(ChurnEvent::Dropped(agent))
    }

    fn add_one(
        &self,
        graph: &mut AgentGraph,
        rng: &mut dyn RngCore,
    ) -> Result<ChurnEvent, ConsensusError> {
        let (Some(topology), Some(source)) = (self.topology, self.measurements) else {
            return Err(ConsensusError::Internal(
                "add churn reached without membership collaborators".into(),
            ));
        };
        let id = graph.next_agent_id();
        let measurement = source.sample(rng);
        topology.attach(graph, id, measurement, rng)?;
        debug!(
            agent = id.0,
            measurement,
            degree = graph.degree(id),
            "agent added"
        );
        Ok(ChurnEvent::Added(id))
    }
}
