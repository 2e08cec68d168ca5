//! # Consensim Core
//!
//! Simulation engines for distributed average consensus: synchronous and
//! asynchronous linear averaging, randomized gossip and PDMM, with injected
//! transmission failures and membership churn.

pub mod engine;
pub mod metrics;
pub mod report;
pub mod topology;

// Re-export commonly used types
pub use engine::asynchronous::{run_async_direct, run_async_direct_with_faults, run_async_matrix};
pub use engine::errors::{ConsensusError, MixingCheck};
pub use engine::faults::{ChurnEvent, ChurnMode, FaultConfig, FaultInjector};
pub use engine::gossip::{run_random_gossip, run_random_gossip_with_faults};
pub use engine::graph::{Agent, AgentGraph, AgentId};
pub use engine::pdmm::{
    run_pdmm_async, run_pdmm_async_with_faults, run_pdmm_sync, DualState, PdmmConfig,
};
pub use engine::protocol::{run_protocol, Protocol};
pub use engine::run::RunConfig;
pub use engine::synchronous::run_synchronous;
pub use engine::weights::{MixingMatrix, WeightMatrixBuilder};
pub use metrics::{MetricsRecorder, RunMetrics, TracePoint};
