//! Convergence and cost accounting of every protocol without faults.

use consensim_core::topology::cycle_graph;
use consensim_core::{
    run_async_direct, run_pdmm_async, run_pdmm_sync, run_protocol, run_random_gossip,
    run_synchronous, FaultInjector, PdmmConfig, Protocol, RunConfig,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::support::{connected_rgg, cost_steps, true_mean, FOUR_CYCLE};

#[test]
fn every_protocol_averages_the_four_cycle() {
    for protocol in Protocol::ALL {
        let mut graph = cycle_graph(&FOUR_CYCLE).unwrap();
        let metrics = run_protocol(
            protocol,
            &mut graph,
            &RunConfig::with_tolerance(1e-9),
            &PdmmConfig::default(),
            &mut FaultInjector::none(),
            &mut StdRng::seed_from_u64(17),
        )
        .unwrap();
        assert!(metrics.converged, "{} did not converge", protocol);
        assert!(
            (metrics.estimate - 2.5).abs() < 1e-4,
            "{} returned {}",
            protocol,
            metrics.estimate
        );
        assert!(metrics.final_error <= 1e-9);
        assert_eq!(metrics.reference_mean, 2.5);
    }
}

#[test]
fn per_iteration_cost_matches_each_discipline() {
    // Every agent of the 4-cycle has degree 2 and the cycle has 4 edges.
    let expected = [
        (Protocol::Synchronous, 4),
        (Protocol::AsyncMatrix, 3),
        (Protocol::AsyncDirect, 3),
        (Protocol::Gossip, 1),
        (Protocol::PdmmSync, 8),
        (Protocol::PdmmAsync, 2),
    ];
    for (protocol, cost) in expected {
        let mut graph = cycle_graph(&FOUR_CYCLE).unwrap();
        let metrics = run_protocol(
            protocol,
            &mut graph,
            &RunConfig::default(),
            &PdmmConfig::default(),
            &mut FaultInjector::none(),
            &mut StdRng::seed_from_u64(3),
        )
        .unwrap();
        assert!(!metrics.error_trace.is_empty());
        assert!(
            cost_steps(&metrics).iter().all(|step| *step == cost),
            "{} charged an unexpected cost",
            protocol
        );
        assert_eq!(metrics.transmissions, cost * metrics.iterations);
        assert_eq!(metrics.error_trace.len(), metrics.dispersion_trace.len());
    }
}

#[test]
fn randomized_protocols_average_a_random_geometric_graph() {
    let base = connected_rgg(60, 1);
    let mean = true_mean(&base);
    let config = RunConfig::default();

    let mut g = base.clone();
    let direct = run_async_direct(&mut g, &config, &mut StdRng::seed_from_u64(1)).unwrap();
    let mut g = base.clone();
    let gossip = run_random_gossip(&mut g, &config, &mut StdRng::seed_from_u64(1)).unwrap();
    let mut g = base.clone();
    let pdmm = run_pdmm_async(
        &mut g,
        &config,
        &PdmmConfig::default(),
        &mut StdRng::seed_from_u64(1),
    )
    .unwrap();
    let mut g = base.clone();
    let pdmm_sync = run_pdmm_sync(&mut g, &config, &PdmmConfig::default()).unwrap();
    let mut g = base.clone();
    let sync = run_synchronous(&mut g, &config).unwrap();
    assert!(sync.asymptotic_convergence_factor.unwrap() < 1.0);

    for metrics in [&direct, &gossip, &pdmm, &pdmm_sync, &sync] {
        assert!(metrics.converged);
        assert!((metrics.estimate - mean).abs() < 1e-5);
        assert!(metrics.final_dispersion < 1e-6);
    }
}

#[test]
fn error_stays_below_tolerance_once_reached() {
    let threshold = 1e-6;
    let config = RunConfig::with_tolerance(1e-12);
    let base = connected_rgg(30, 9);

    let mut g = base.clone();
    let gossip = run_random_gossip(&mut g, &config, &mut StdRng::seed_from_u64(4)).unwrap();
    let mut g = base.clone();
    let direct = run_async_direct(&mut g, &config, &mut StdRng::seed_from_u64(4)).unwrap();
    let mut g = cycle_graph(&[5.0, 1.0, 7.0, 3.0, 9.0, 2.0]).unwrap();
    let sync = run_synchronous(&mut g, &config).unwrap();

    for metrics in [&gossip, &direct, &sync] {
        let first = metrics
            .error_trace
            .iter()
            .position(|p| p.value <= threshold)
            .unwrap();
        assert!(metrics.error_trace[first..]
            .iter()
            .all(|p| p.value <= threshold));
    }
}

#[test]
fn seeded_runs_are_reproducible() {
    let base = connected_rgg(40, 2);
    let mut a = base.clone();
    let mut b = base.clone();
    let config = RunConfig::default();
    let first = run_random_gossip(&mut a, &config, &mut StdRng::seed_from_u64(99)).unwrap();
    let second = run_random_gossip(&mut b, &config, &mut StdRng::seed_from_u64(99)).unwrap();
    assert_eq!(first, second);
    assert_eq!(a.estimates(), b.estimates());
}

#[test]
fn pdmm_cost_is_cheapest_at_an_interior_exchange_rate() {
    let base = connected_rgg(40, 100);
    let config = RunConfig::default().with_max_iterations(2_000_000);
    for asynchronous in [false, true] {
        let mut costs = Vec::new();
        for step in 1..=9 {
            let pdmm = PdmmConfig::new(step as f64 / 10.0);
            let mut g = base.clone();
            let metrics = if asynchronous {
                run_pdmm_async(&mut g, &config, &pdmm, &mut StdRng::seed_from_u64(5)).unwrap()
            } else {
                run_pdmm_sync(&mut g, &config, &pdmm).unwrap()
            };
            assert!(metrics.converged);
            if !asynchronous {
                assert_eq!(metrics.transmissions % (2 * base.edge_count() as u64), 0);
            }
            costs.push(metrics.transmissions);
        }
        let cheapest = costs.iter().copied().min().unwrap();
        assert!(costs[0] > cheapest, "c = 0.1 was cheapest: {:?}", costs);
        assert!(costs[8] > cheapest, "c = 0.9 was cheapest: {:?}", costs);
    }
}
