use permgate_core::PermGateConfig;
use permgate_sim::{run_scenario, Scenario, StepStatus};
use std::path::PathBuf;

fn demo(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../demos/scenarios")
        .join(name)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_demo_lifecycle_scenario_passes() {
    let scenario = Scenario::from_file(&demo("lifecycle.yaml")).unwrap();
    let report = run_scenario(&scenario, None).await.unwrap();

    assert!(report.is_success(), "{}", report.render_text());
    assert_eq!(report.summary.total, scenario.steps.len());
    assert_eq!(report.monitoring.injected, vec!["internal/console"]);
    // bob is still online when the run ends
    assert_eq!(report.detached_on_disable, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_demo_reallow_scenario_passes() {
    let scenario = Scenario::from_file(&demo("reallow-guard.yaml")).unwrap();
    let report = run_scenario(&scenario, None).await.unwrap();
    assert!(report.is_success(), "{}", report.render_text());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_expectation_is_reported_not_raised() {
    let scenario = Scenario::from_yaml(
        r#"
name: wrong-expectation
subjects:
  erin:
    - permission: fly
      value: false
steps:
  - step: connect
    name: erin
  - step: check
    name: erin
    permission: fly
    expect: allow
  - step: check
    name: nobody
    permission: fly
"#,
    )
    .unwrap();

    let report = run_scenario(&scenario, None).await.unwrap();
    assert_eq!(report.summary.passed, 1);
    assert_eq!(report.summary.failed, 2);
    assert_eq!(report.steps[1].status, StepStatus::Failed);
    assert!(report.steps[1]
        .detail
        .as_deref()
        .unwrap()
        .contains("expected allow, got deny"));
    assert!(report.steps[2]
        .detail
        .as_deref()
        .unwrap()
        .contains("not online"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_config_override_replaces_scenario_config() {
    let scenario = Scenario::from_yaml(
        r#"
name: elevate
config:
  auto_elevate: false
subjects:
  frank:
    - permission: permgate.autoelevate
steps:
  - step: connect
    name: frank
  - step: elevated
    name: frank
    expect: true
"#,
    )
    .unwrap();

    let without = run_scenario(&scenario, None).await.unwrap();
    assert_eq!(without.summary.failed, 1);

    let config = PermGateConfig {
        auto_elevate: true,
        ..PermGateConfig::default()
    };
    let with = run_scenario(&scenario, Some(config)).await.unwrap();
    assert!(with.is_success(), "{}", with.render_text());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_online_before_enable_is_attached() {
    let scenario = Scenario::from_yaml(
        r#"
name: hot-reload
subjects:
  grace:
    - permission: fly
online_before_enable:
  grace: world
steps:
  - step: session
    name: grace
    live: true
  - step: check
    name: grace
    permission: fly
    expect: allow
"#,
    )
    .unwrap();

    let report = run_scenario(&scenario, None).await.unwrap();
    assert!(report.is_success(), "{}", report.render_text());
    assert_eq!(report.detached_on_disable, 1);
}
