//! Protocol selection by name.

use std::fmt;
use std::str::FromStr;

use rand::Rng;

use crate::engine::asynchronous::{run_async_direct_with_faults, run_async_matrix};
use crate::engine::errors::ConsensusError;
use crate::engine::faults::FaultInjector;
use crate::engine::gossip::run_random_gossip_with_faults;
use crate::engine::graph::AgentGraph;
use crate::engine::pdmm::{run_pdmm_async_with_faults, run_pdmm_sync, PdmmConfig};
use crate::engine::run::RunConfig;
use crate::engine::synchronous::run_synchronous;
use crate::metrics::RunMetrics;

/// Every engine entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum Protocol {
    Synchronous,
    AsyncMatrix,
    AsyncDirect,
    Gossip,
    PdmmSync,
    PdmmAsync,
}

impl Protocol {
    pub const ALL: [Protocol; 6] = [
        Protocol::Synchronous,
        Protocol::AsyncMatrix,
        Protocol::AsyncDirect,
        Protocol::Gossip,
        Protocol::PdmmSync,
        Protocol::PdmmAsync,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Protocol::Synchronous => "synchronous",
            Protocol::AsyncMatrix => "async-matrix",
            Protocol::AsyncDirect => "async-direct",
            Protocol::Gossip => "gossip",
            Protocol::PdmmSync => "pdmm-sync",
            Protocol::PdmmAsync => "pdmm-async",
        }
    }

    /// Whether the engine accepts a [`FaultInjector`].
    pub fn supports_faults(self) -> bool {
        matches!(
            self,
            Protocol::AsyncDirect | Protocol::Gossip | Protocol::PdmmAsync
        )
    }

    /// Whether the engine draws from the random source.
    pub fn is_randomized(self) -> bool {
        !matches!(self, Protocol::Synchronous | Protocol::PdmmSync)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Protocol {
    type Err = ConsensusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Protocol::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = Protocol::ALL.iter().map(|p| p.name()).collect();
                ConsensusError::Validation(format!(
                    "unknown protocol '{}', expected one of: {}",
                    s,
                    known.join(", ")
                ))
            })
    }
}

/// Runs `protocol` on `graph`.
///
/// Protocols without fault variants reject an injector that would change
/// anything.
pub fn run_protocol<R: Rng>(
    protocol: Protocol,
    graph: &mut AgentGraph,
    config: &RunConfig,
    pdmm: &PdmmConfig,
    injector: &mut FaultInjector<'_>,
    rng: &mut R,
) -> Result<RunMetrics, ConsensusError> {
    let faults = injector.config();
    if !protocol.supports_faults() && (faults.failure_rate > 0.0 || faults.has_churn()) {
        return Err(ConsensusError::Validation(format!(
            "protocol {} does not support fault injection",
            protocol
        )));
    }
    match protocol {
        Protocol::Synchronous => run_synchronous(graph, config),
        Protocol::AsyncMatrix => run_async_matrix(graph, config, rng),
        Protocol::AsyncDirect => run_async_direct_with_faults(graph, config, injector, rng),
        Protocol::Gossip => run_random_gossip_with_faults(graph, config, injector, rng),
        Protocol::PdmmSync => run_pdmm_sync(graph, config, pdmm),
        Protocol::PdmmAsync => run_pdmm_async_with_faults(graph, config, pdmm, injector, rng),
    }
}
