//! JSON shapes of configuration and result types.

use consensim_core::report::{CostSweep, RunSummary};
use consensim_core::topology::cycle_graph;
use consensim_core::{
    run_pdmm_sync, ChurnMode, FaultConfig, PdmmConfig, Protocol, RunConfig, RunMetrics,
};

use super::support::FOUR_CYCLE;

#[test]
fn partial_configs_fill_in_defaults() {
    let faults: FaultConfig =
        serde_json::from_str(r#"{ "drop_rate": 0.1, "churn_mode": "sequential" }"#).unwrap();
    assert_eq!(faults.drop_rate, 0.1);
    assert_eq!(faults.churn_mode, ChurnMode::Sequential);
    assert_eq!(faults.churn_event_probability, 0.01);
    assert!(faults.validate().is_ok());

    let run: RunConfig = serde_json::from_str(r#"{ "max_iterations": 1000 }"#).unwrap();
    assert_eq!(run.tolerance, 1e-12);
    assert_eq!(run.max_iterations, Some(1000));

    let pdmm: PdmmConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(pdmm.c, 0.4);
}

#[test]
fn protocols_use_kebab_case_names() {
    let p: Protocol = serde_json::from_str(r#""pdmm-async""#).unwrap();
    assert_eq!(p, Protocol::PdmmAsync);
    assert_eq!(
        serde_json::to_string(&Protocol::AsyncDirect).unwrap(),
        r#""async-direct""#
    );
}

#[test]
fn run_results_serialize_with_traces() {
    let mut graph = cycle_graph(&FOUR_CYCLE).unwrap();
    let metrics = run_pdmm_sync(&mut graph, &RunConfig::default(), &PdmmConfig::new(0.5)).unwrap();
    let json = serde_json::to_value(&metrics).unwrap();
    assert_eq!(
        json["error_trace"].as_array().unwrap().len(),
        metrics.iterations as usize
    );
    let back: RunMetrics = serde_json::from_value(json).unwrap();
    assert_eq!(back.transmissions, metrics.transmissions);

    let summary = serde_json::to_value(RunSummary::new("pdmm-sync", 4, &metrics)).unwrap();
    assert!(summary.get("asymptotic_convergence_factor").is_none());

    let mut sweep = CostSweep::new("pdmm-sync");
    sweep.push(0.5, &metrics);
    let sweep_json = serde_json::to_value(&sweep).unwrap();
    assert_eq!(sweep_json["points"][0]["c"], 0.5);
}
