//! Shared fixtures.

use consensim_core::topology::{
    connectivity_radius, is_connected, MeasurementSource, RandomGeometricTopology,
    UniformMeasurements,
};
use consensim_core::AgentGraph;
use rand::rngs::StdRng;
use rand::SeedableRng;

pub const FOUR_CYCLE: [f64; 4] = [1.0, 2.0, 3.0, 4.0];

/// First connected random geometric graph found from `seed` upwards.
pub fn connected_rgg(agents: usize, seed: u64) -> AgentGraph {
    let topology = RandomGeometricTopology::new(connectivity_radius(agents), 2).unwrap();
    for s in seed..seed + 1_000 {
        let mut rng = StdRng::seed_from_u64(s);
        let measurements = UniformMeasurements::default().generate(agents, &mut rng);
        let graph = topology.generate(&measurements, &mut rng).unwrap();
        if is_connected(&graph) {
            return graph;
        }
    }
    panic!("no connected graph with {} agents", agents);
}

pub fn true_mean(graph: &AgentGraph) -> f64 {
    let m = graph.measurements();
    m.iter().sum::<f64>() / m.len() as f64
}

/// Transmission increments between consecutive trace points, starting from 0.
pub fn cost_steps(metrics: &consensim_core::RunMetrics) -> Vec<u64> {
    let mut previous = 0;
    metrics
        .error_trace
        .iter()
        .map(|p| {
            let step = p.transmissions - previous;
            previous = p.transmissions;
            step
        })
        .collect()
}
