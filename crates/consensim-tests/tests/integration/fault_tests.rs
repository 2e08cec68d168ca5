//! Transmission failure and membership churn across the fault-capable engines.

use consensim_core::topology::{
    complete_graph, connectivity_radius, cycle_graph, CompleteTopology, RandomGeometricTopology,
    UniformMeasurements,
};
use consensim_core::{
    run_async_direct_with_faults, run_pdmm_async_with_faults, run_protocol, run_random_gossip,
    run_random_gossip_with_faults, ChurnMode, ConsensusError, FaultConfig, FaultInjector,
    PdmmConfig, Protocol, RunConfig,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::support::{connected_rgg, true_mean, FOUR_CYCLE};

#[test]
fn total_transmission_failure_never_changes_the_error() {
    let mut graph = cycle_graph(&FOUR_CYCLE).unwrap();
    let mut injector = FaultInjector::new(FaultConfig::none().with_failure_rate(1.0)).unwrap();
    let metrics = run_random_gossip_with_faults(
        &mut graph,
        &RunConfig::with_tolerance(1e-9).with_max_iterations(500),
        &mut injector,
        &mut StdRng::seed_from_u64(1),
    )
    .unwrap();

    assert!(!metrics.converged);
    assert_eq!(metrics.iterations, 500);
    assert_eq!(metrics.transmissions, 500);
    let first = metrics.error_trace[0].value;
    assert!(metrics.error_trace.iter().all(|p| p.value == first));
    assert!(metrics
        .error_trace
        .windows(2)
        .all(|w| w[1].transmissions > w[0].transmissions));
    assert_eq!(graph.estimates(), FOUR_CYCLE.to_vec());
}

#[test]
fn zero_rate_injector_replays_the_plain_run() {
    let base = connected_rgg(30, 4);
    let config = RunConfig::default();
    let mut a = base.clone();
    let plain = run_random_gossip(&mut a, &config, &mut StdRng::seed_from_u64(8)).unwrap();
    let mut b = base.clone();
    let mut injector = FaultInjector::new(FaultConfig::none()).unwrap();
    let faulty =
        run_random_gossip_with_faults(&mut b, &config, &mut injector, &mut StdRng::seed_from_u64(8))
            .unwrap();
    assert_eq!(plain, faulty);
}

#[test]
fn partial_failure_still_converges_and_charges_losses() {
    let base = connected_rgg(40, 6);
    let mean = true_mean(&base);
    let config = RunConfig::default().with_max_iterations(5_000_000);
    for protocol in [Protocol::AsyncDirect, Protocol::Gossip, Protocol::PdmmAsync] {
        let mut graph = base.clone();
        let mut injector =
            FaultInjector::new(FaultConfig::none().with_failure_rate(0.25)).unwrap();
        let metrics = run_protocol(
            protocol,
            &mut graph,
            &config,
            &PdmmConfig::default(),
            &mut injector,
            &mut StdRng::seed_from_u64(2),
        )
        .unwrap();
        assert!(metrics.converged, "{} did not converge", protocol);
        assert!(metrics.dropped_transmissions > 0);
        assert!(metrics.dropped_transmissions < metrics.transmissions);
        assert!((metrics.estimate - mean).abs() < 1e-5);
    }
}

#[test]
fn bulk_drop_converges_to_the_survivors_mean() {
    let measurements: Vec<f64> = (0..12).map(|i| 15.0 + i as f64).collect();
    for protocol in [Protocol::AsyncDirect, Protocol::Gossip, Protocol::PdmmAsync] {
        let mut graph = complete_graph(&measurements).unwrap();
        let mut injector =
            FaultInjector::new(FaultConfig::none().with_drop(0.5, ChurnMode::Bulk)).unwrap();
        let metrics = run_protocol(
            protocol,
            &mut graph,
            &RunConfig::default(),
            &PdmmConfig::default(),
            &mut injector,
            &mut StdRng::seed_from_u64(10),
        )
        .unwrap();
        assert_eq!(graph.len(), 6);
        let survivors = true_mean(&graph);
        assert!((metrics.reference_mean - survivors).abs() < 1e-12);
        assert!((metrics.estimate - survivors).abs() < 1e-5, "{}", protocol);
    }
}

#[test]
fn bulk_add_includes_newcomers_in_the_mean() {
    let topology = CompleteTopology;
    let source = UniformMeasurements::default();
    let mut graph = complete_graph(&[15.0, 17.0, 19.0, 21.0]).unwrap();
    let mut injector = FaultInjector::new(FaultConfig::none().with_add(0.5, ChurnMode::Bulk))
        .unwrap()
        .with_membership(&topology, &source);
    let metrics = run_async_direct_with_faults(
        &mut graph,
        &RunConfig::default(),
        &mut injector,
        &mut StdRng::seed_from_u64(12),
    )
    .unwrap();
    assert_eq!(graph.len(), 6);
    assert!((metrics.estimate - true_mean(&graph)).abs() < 1e-5);
}

#[test]
fn geometric_joiners_connect_and_reach_the_mean() {
    let topology = RandomGeometricTopology::new(connectivity_radius(40), 2).unwrap();
    let source = UniformMeasurements::default();
    for (mode, seed) in [(ChurnMode::Bulk, 21), (ChurnMode::Sequential, 22)] {
        let mut graph = connected_rgg(40, 6);
        let first_new = graph.next_agent_id();
        let mut injector = FaultInjector::new(
            FaultConfig::none()
                .with_add(0.5, mode)
                .with_churn_event_probability(0.02),
        )
        .unwrap()
        .with_membership(&topology, &source);
        let metrics = run_random_gossip_with_faults(
            &mut graph,
            &RunConfig::default().with_max_iterations(2_000_000),
            &mut injector,
            &mut StdRng::seed_from_u64(seed),
        )
        .unwrap();

        assert_eq!(graph.len(), 60, "{:?}", mode);
        assert!(!injector.has_pending_churn());
        for &id in graph.agent_ids().iter().filter(|id| **id >= first_new) {
            assert!(graph.degree(id) >= 1, "{:?} joined isolated", id);
            let here = &graph.agent(id).unwrap().position;
            for &other in graph.neighbors(id) {
                let there = &graph.agent(other).unwrap().position;
                let d2: f64 = here.iter().zip(there).map(|(a, b)| (a - b) * (a - b)).sum();
                assert!(d2.sqrt() < topology.radius);
            }
        }
        assert!(metrics.converged, "{:?}", mode);
        assert!((metrics.estimate - metrics.reference_mean).abs() < 1e-5);
    }
}

#[test]
fn sequential_churn_completes_before_the_run_ends() {
    let measurements: Vec<f64> = (0..10).map(|i| i as f64).collect();
    let mut graph = complete_graph(&measurements).unwrap();
    let mut injector = FaultInjector::new(
        FaultConfig::none()
            .with_drop(0.3, ChurnMode::Sequential)
            .with_churn_event_probability(0.01),
    )
    .unwrap();
    let metrics = run_random_gossip_with_faults(
        &mut graph,
        &RunConfig::default().with_max_iterations(1_000_000),
        &mut injector,
        &mut StdRng::seed_from_u64(30),
    )
    .unwrap();
    assert!(metrics.converged);
    assert!(!injector.has_pending_churn());
    assert_eq!(graph.len(), 7);
    assert!((metrics.estimate - metrics.reference_mean).abs() < 1e-5);
}

#[test]
fn sequential_pdmm_churn_retargets_to_member_measurements() {
    let measurements: Vec<f64> = (0..10).map(|i| 10.0 + 2.0 * i as f64).collect();
    let mut graph = complete_graph(&measurements).unwrap();
    let mut injector = FaultInjector::new(
        FaultConfig::none()
            .with_drop(0.2, ChurnMode::Sequential)
            .with_churn_event_probability(0.05),
    )
    .unwrap();
    let metrics = run_pdmm_async_with_faults(
        &mut graph,
        &RunConfig::default().with_max_iterations(1_000_000),
        &PdmmConfig::default(),
        &mut injector,
        &mut StdRng::seed_from_u64(31),
    )
    .unwrap();
    assert!(metrics.converged);
    assert_eq!(graph.len(), 8);
    assert!((metrics.reference_mean - true_mean(&graph)).abs() < 1e-12);
    assert!((metrics.estimate - true_mean(&graph)).abs() < 1e-5);
}

#[test]
fn add_churn_without_collaborators_is_a_validation_error() {
    let mut graph = complete_graph(&FOUR_CYCLE).unwrap();
    let mut injector =
        FaultInjector::new(FaultConfig::none().with_add(0.5, ChurnMode::Bulk)).unwrap();
    let err = run_random_gossip_with_faults(
        &mut graph,
        &RunConfig::default(),
        &mut injector,
        &mut StdRng::seed_from_u64(0),
    )
    .unwrap_err();
    assert!(matches!(err, ConsensusError::Validation(_)));
}
