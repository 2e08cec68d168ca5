//! Mixing matrix construction on generated networks.

use consensim_core::engine::numeric_kernels::symmetric_eigenvalues;
use consensim_core::topology::{complete_graph, cycle_graph, graph_from_edges};
use consensim_core::{run_synchronous, ConsensusError, MixingCheck, RunConfig, WeightMatrixBuilder};

use super::support::connected_rgg;

#[test]
fn local_activation_matrices_are_valid_for_every_agent() {
    let graph = connected_rgg(25, 3);
    let builder = WeightMatrixBuilder::new(&graph);
    for &agent in graph.agent_ids() {
        let w = builder.local_activation(&graph, agent).unwrap();
        w.validate(1e-9).unwrap();
        let eigenvalues = symmetric_eigenvalues(w.matrix()).unwrap();
        // Projection onto the neighborhood mean: spectrum is {0, 1}.
        assert!(eigenvalues
            .iter()
            .all(|l| l.abs() < 1e-9 || (l - 1.0).abs() < 1e-9));
    }
}

#[test]
fn synchronous_matrix_preserves_the_mean() {
    let graph = cycle_graph(&[2.0, 9.0, 4.0, 7.0, 1.0, 6.0, 3.0, 8.0]).unwrap();
    let builder = WeightMatrixBuilder::new(&graph);
    let w = builder.synchronous(&graph).unwrap();
    w.validate(1e-9).unwrap();
    let x = graph.estimates();
    let y = w.matrix().mul_vec(&x).unwrap();
    let before: f64 = x.iter().sum();
    let after: f64 = y.iter().sum();
    assert!((before - after).abs() < 1e-9);
    let factor = w.asymptotic_convergence_factor().unwrap();
    assert!(factor > 0.0 && factor < 1.0);
}

#[test]
fn complete_graph_has_zero_convergence_factor() {
    let mut graph = complete_graph(&[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
    let metrics = run_synchronous(&mut graph, &RunConfig::default()).unwrap();
    assert!(metrics.asymptotic_convergence_factor.unwrap() < 1e-9);
    assert_eq!(metrics.iterations, 1);
}

#[test]
fn negative_weights_do_not_stop_the_synchronous_run() {
    // Star: the optimal step is 1/3 while the hub has degree 4.
    let mut graph = graph_from_edges(
        &[1.0, 2.0, 3.0, 4.0, 5.0],
        &[(0, 1), (0, 2), (0, 3), (0, 4)],
    )
    .unwrap();
    let w = WeightMatrixBuilder::new(&graph).synchronous(&graph).unwrap();
    assert!(w.matrix().get(0, 0) < 0.0);
    w.validate_checks(1e-9, MixingCheck::GLOBAL).unwrap();

    let metrics = run_synchronous(&mut graph, &RunConfig::default()).unwrap();
    assert!(metrics.converged);
    assert!((metrics.estimate - 3.0).abs() < 1e-5);
}

#[test]
fn synchronous_matrix_on_geometric_graphs_passes_the_global_checks() {
    for seed in 0..4 {
        let graph = connected_rgg(60, seed);
        let w = WeightMatrixBuilder::new(&graph).synchronous(&graph).unwrap();
        w.validate_checks(1e-9, MixingCheck::GLOBAL).unwrap();
    }
}

#[test]
fn edgeless_graph_cannot_build_a_synchronous_matrix() {
    let mut graph = graph_from_edges(&[1.0, 2.0, 3.0], &[]).unwrap();
    let err = run_synchronous(&mut graph, &RunConfig::default()).unwrap_err();
    assert!(matches!(err, ConsensusError::Validation(_)));
}
