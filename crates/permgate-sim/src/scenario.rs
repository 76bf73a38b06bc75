//! YAML scenarios: a host setup plus a list of steps with expectations.
//!
//! ```yaml
//! name: relaxed-fallback
//! identity: relaxed
//! subjects:
//!   alice:
//!     - permission: fly
//! steps:
//!   - step: connect
//!     name: alice
//!     expect: allowed
//!   - step: check
//!     name: alice
//!     permission: fly
//!     expect: allow
//! ```

use crate::host::{ConnectRequest, SimHost};
use crate::report::ScenarioReport;
use crate::simulation::{SimOptions, Simulation};
use anyhow::{anyhow, bail, Context, Result};
use permgate_core::host::{HostSubject, IdentityVerification};
use permgate_core::login::{FinalizeEvent, LoginResult, PreAuthEvent, Priority};
use permgate_core::processor::{DefaultPermissionMap, PermissionRegistry, RegisteredPermission};
use permgate_core::{PermGateConfig, PermissionNode, SubjectId, Tristate};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub identity: IdentityVerification,
    #[serde(default)]
    pub config: Option<PermGateConfig>,
    #[serde(default = "default_zones")]
    pub zones: Vec<String>,
    #[serde(default)]
    pub defaults: DefaultsSpec,
    #[serde(default)]
    pub registry: Vec<RegisteredPermission>,
    /// Stored permission nodes by subject name.
    #[serde(default)]
    pub subjects: BTreeMap<String, Vec<PermissionNode>>,
    /// Subjects already online before enable, by name and zone.
    #[serde(default)]
    pub online_before_enable: BTreeMap<String, String>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultsSpec {
    #[serde(default)]
    pub regular: HashMap<String, bool>,
    #[serde(default)]
    pub elevated: HashMap<String, bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectLogin {
    Allowed,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    PreAuth,
    Finalize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    Connect {
        name: String,
        #[serde(default = "default_zone")]
        zone: String,
        #[serde(default)]
        expect: Option<ExpectLogin>,
        /// Substring expected in the denial message.
        #[serde(default)]
        message: Option<String>,
    },
    Check {
        name: String,
        permission: String,
        #[serde(default)]
        expect: Option<Tristate>,
    },
    /// Asserts whether the subject currently has a live session.
    Session { name: String, live: bool },
    Elevated { name: String, expect: bool },
    Disconnect { name: String },
    Tick {
        #[serde(default = "default_ticks")]
        count: u64,
    },
    FailLoads {
        name: String,
        #[serde(default = "default_true")]
        enabled: bool,
    },
    /// The next connect of `name` arrives already denied.
    DenyUpstream {
        name: String,
        #[serde(default = "default_upstream_message")]
        message: String,
    },
    /// Installs a listener that forces `name` back to allowed.
    ReallowUpstream {
        name: String,
        #[serde(default)]
        phase: Phase,
    },
    /// Installs a listener that denies `name` at finalize, after attach.
    DenyFinalize {
        name: String,
        #[serde(default = "default_upstream_message")]
        message: String,
    },
    ChangeZone { name: String, zone: String },
    Recalculate {
        name: String,
        nodes: Vec<PermissionNode>,
    },
}

fn default_zones() -> Vec<String> {
    vec!["world".to_string()]
}

fn default_zone() -> String {
    "world".to_string()
}

fn default_ticks() -> u64 {
    1
}

fn default_true() -> bool {
    true
}

fn default_upstream_message() -> String {
    "denied by another extension".to_string()
}

impl Step {
    pub fn label(&self) -> String {
        match self {
            Self::Connect { name, zone, .. } => format!("connect {name} to {zone}"),
            Self::Check {
                name, permission, ..
            } => format!("check {name} {permission}"),
            Self::Session { name, live } => format!("session {name} live={live}"),
            Self::Elevated { name, expect } => format!("elevated {name} = {expect}"),
            Self::Disconnect { name } => format!("disconnect {name}"),
            Self::Tick { count } => format!("tick x{count}"),
            Self::FailLoads { name, enabled } => format!("fail loads for {name}: {enabled}"),
            Self::DenyUpstream { name, .. } => format!("deny {name} upstream"),
            Self::ReallowUpstream { name, phase } => format!("re-allow {name} at {phase:?}"),
            Self::DenyFinalize { name, .. } => format!("deny {name} after attach"),
            Self::ChangeZone { name, zone } => format!("move {name} to {zone}"),
            Self::Recalculate { name, .. } => format!("recalculate {name}"),
        }
    }
}

impl Scenario {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("failed to parse scenario {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let scenario: Self = serde_yaml::from_str(content)?;
        if scenario.steps.is_empty() {
            bail!("scenario '{}' has no steps", scenario.name);
        }
        Ok(scenario)
    }

    fn defaults(&self) -> Arc<DefaultPermissionMap> {
        Arc::new(DefaultPermissionMap::from_maps(
            self.defaults.elevated.clone(),
            self.defaults.regular.clone(),
        ))
    }

    fn registry(&self) -> Arc<PermissionRegistry> {
        let registry = PermissionRegistry::new();
        for permission in &self.registry {
            if !registry.register(permission.clone()) {
                debug!(permission = %permission.name, "duplicate registration ignored");
            }
        }
        Arc::new(registry)
    }
}

/// Runs a scenario in a fresh simulation. `config` takes precedence over the
/// scenario's own `config` block.
pub async fn run_scenario(
    scenario: &Scenario,
    config: Option<PermGateConfig>,
) -> Result<ScenarioReport> {
    let config = config
        .or_else(|| scenario.config.clone())
        .unwrap_or_default();
    config.validate()?;
    let detach_ticks = config.detach_delay_ticks;

    let options = SimOptions {
        identity: scenario.identity,
        zones: scenario.zones.clone(),
        ..SimOptions::default()
    };
    let sim = Simulation::new(config, options, scenario.defaults(), scenario.registry());
    for (name, nodes) in &scenario.subjects {
        sim.data().store(SubjectId::offline(name), nodes.clone());
    }
    for (name, zone) in &scenario.online_before_enable {
        sim.host().add_online(Arc::new(crate::host::SimSubject::new(
            SubjectId::offline(name),
            name,
            zone,
        )));
    }

    let mut report = ScenarioReport::new(&scenario.name, scenario.identity);
    report.monitoring = sim.enable();
    sim.settle().await;
    info!(scenario = %scenario.name, steps = scenario.steps.len(), "running scenario");

    let mut runner = Runner {
        sim: &sim,
        upstream: HashMap::new(),
        detach_ticks,
    };
    for (index, step) in scenario.steps.iter().enumerate() {
        let started = Instant::now();
        let result = runner.run(step).await;
        report.add_step(
            index,
            &step.label(),
            result,
            started.elapsed().as_millis() as u64,
        );
    }

    report.data_loads = sim.data().total_loads();
    report.detached_on_disable = sim.disable();
    Ok(report)
}

struct Runner<'a> {
    sim: &'a Simulation,
    upstream: HashMap<String, String>,
    detach_ticks: u64,
}

impl Runner<'_> {
    fn host(&self) -> &Arc<SimHost> {
        self.sim.host()
    }

    async fn run(&mut self, step: &Step) -> Result<Option<String>> {
        match step {
            Step::Connect {
                name,
                zone,
                expect,
                message,
            } => {
                let mut request = ConnectRequest::new(name, zone);
                if let Some(denial) = self.upstream.remove(name) {
                    request = request.denied_upstream(denial);
                }
                let outcome = self.sim.connect_with(request).await;
                let observed = if outcome.is_allowed() {
                    ExpectLogin::Allowed
                } else {
                    ExpectLogin::Denied
                };
                let detail = match outcome.denial() {
                    Some(denial) => format!("denied: {denial}"),
                    None => "allowed".to_string(),
                };
                if let Some(expected) = expect {
                    if *expected != observed {
                        bail!("expected {expected:?}, got {detail}");
                    }
                }
                if let Some(fragment) = message {
                    let denial = outcome.denial().unwrap_or_default();
                    if !denial.contains(fragment.as_str()) {
                        bail!("denial message '{denial}' does not contain '{fragment}'");
                    }
                }
                Ok(Some(detail))
            }
            Step::Check {
                name,
                permission,
                expect,
            } => {
                let subject = self
                    .host()
                    .subject(SubjectId::offline(name))
                    .ok_or_else(|| anyhow!("{name} is not online"))?;
                let result = subject.check(permission);
                if let Some(expected) = expect {
                    if result.verdict() != *expected {
                        bail!("expected {expected}, got {}", result.describe());
                    }
                }
                Ok(Some(result.describe()))
            }
            Step::Session { name, live } => {
                let attempt = self
                    .sim
                    .gate()
                    .synchronizer()
                    .live_attempt(SubjectId::offline(name));
                if attempt.is_some() != *live {
                    bail!("expected live={live}, found live={}", attempt.is_some());
                }
                Ok(attempt.map(|a| format!("attempt {a}")))
            }
            Step::Elevated { name, expect } => {
                let subject = self
                    .host()
                    .subject(SubjectId::offline(name))
                    .ok_or_else(|| anyhow!("{name} is not online"))?;
                if subject.is_elevated() != *expect {
                    bail!("expected elevated={expect}, found {}", subject.is_elevated());
                }
                Ok(None)
            }
            Step::Disconnect { name } => {
                if !self.sim.disconnect(SubjectId::offline(name)) {
                    bail!("{name} is not online");
                }
                Ok(Some(format!(
                    "detach in {} tick(s)",
                    self.detach_ticks.max(1)
                )))
            }
            Step::Tick { count } => {
                self.sim.advance(*count).await;
                Ok(Some(format!(
                    "now at tick {}",
                    self.host().sim_scheduler().current_tick()
                )))
            }
            Step::FailLoads { name, enabled } => {
                self.sim
                    .data()
                    .set_failing(SubjectId::offline(name), *enabled);
                Ok(None)
            }
            Step::DenyUpstream { name, message } => {
                self.upstream.insert(name.clone(), message.clone());
                Ok(None)
            }
            Step::ReallowUpstream { name, phase } => {
                let target = name.clone();
                let listener = format!("scenario:reallow:{name}");
                self.host().with_phases(|pre, fin| match phase {
                    Phase::PreAuth => pre.register_legacy(
                        Priority::High,
                        listener,
                        move |event: &PreAuthEvent, decision| {
                            if event.name == target {
                                decision.override_result(LoginResult::Allowed);
                            }
                        },
                    ),
                    Phase::Finalize => fin.register_legacy(
                        Priority::High,
                        listener,
                        move |event: &FinalizeEvent, decision| {
                            if event.subject.name() == target {
                                decision.override_result(LoginResult::Allowed);
                            }
                        },
                    ),
                });
                Ok(None)
            }
            Step::DenyFinalize { name, message } => {
                let (target, message) = (name.clone(), message.clone());
                self.host().with_phases(|_, fin| {
                    fin.register_legacy(
                        Priority::High,
                        format!("scenario:deny-finalize:{name}"),
                        move |event: &FinalizeEvent, decision| {
                            if event.subject.name() == target {
                                decision.deny("scenario", message.clone());
                            }
                        },
                    )
                });
                Ok(None)
            }
            Step::ChangeZone { name, zone } => {
                if !self.sim.change_zone(SubjectId::offline(name), zone) {
                    bail!("{name} is not online");
                }
                Ok(None)
            }
            Step::Recalculate { name, nodes } => {
                self.sim
                    .recalculate(SubjectId::offline(name), nodes.clone())
                    .await;
                Ok(Some(format!("{} node(s)", nodes.len())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_steps() {
        let scenario = Scenario::from_yaml(
            r#"
name: parse
identity: relaxed
subjects:
  alice:
    - permission: fly
    - permission: build
      value: false
      contexts:
        zone: [nether]
steps:
  - step: connect
    name: alice
  - step: check
    name: alice
    permission: fly
    expect: allow
  - step: tick
  - step: reallow_upstream
    name: alice
    phase: finalize
"#,
        )
        .unwrap();

        assert_eq!(scenario.identity, IdentityVerification::Relaxed);
        assert_eq!(scenario.zones, vec!["world"]);
        assert_eq!(scenario.subjects["alice"].len(), 2);
        assert!(matches!(&scenario.steps[0], Step::Connect { zone, expect: None, .. } if zone == "world"));
        assert!(matches!(
            scenario.steps[1],
            Step::Check {
                expect: Some(Tristate::Allow),
                ..
            }
        ));
        assert!(matches!(scenario.steps[2], Step::Tick { count: 1 }));
        assert!(matches!(
            scenario.steps[3],
            Step::ReallowUpstream {
                phase: Phase::Finalize,
                ..
            }
        ));
    }

    #[test]
    fn test_empty_steps_rejected() {
        let err = Scenario::from_yaml("name: empty\nsteps: []\n").unwrap_err();
        assert!(err.to_string().contains("no steps"));
    }

    #[test]
    fn test_unknown_step_rejected() {
        assert!(Scenario::from_yaml("name: x\nsteps:\n  - step: explode\n").is_err());
    }
}
