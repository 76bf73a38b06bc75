use anyhow::Result;
use chrono::{DateTime, Utc};
use permgate_core::delegate::InjectionReport;
use permgate_core::host::IdentityVerification;
use serde::Serialize;
use std::fmt::Write as _;

#[derive(Debug, Serialize, Clone)]
pub struct ScenarioReport {
    pub scenario: String,
    pub identity: IdentityVerification,
    pub generated_at: DateTime<Utc>,
    pub summary: ScenarioSummary,
    pub steps: Vec<StepResult>,
    /// Injection report from enable.
    pub monitoring: InjectionReport,
    /// Total data source loads over the whole run.
    pub data_loads: usize,
    /// Sessions still live when the run ended and was disabled.
    pub detached_on_disable: usize,
}

#[derive(Debug, Serialize, Clone, Default)]
pub struct ScenarioSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

#[derive(Debug, Serialize, Clone)]
pub struct StepResult {
    pub index: usize,
    pub step: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Passed,
    Failed,
}

impl ScenarioReport {
    pub fn new(scenario: &str, identity: IdentityVerification) -> Self {
        Self {
            scenario: scenario.to_string(),
            identity,
            generated_at: Utc::now(),
            summary: ScenarioSummary::default(),
            steps: Vec::new(),
            monitoring: InjectionReport::default(),
            data_loads: 0,
            detached_on_disable: 0,
        }
    }

    /// `Ok` carries an optional observation, `Err` the failed expectation.
    pub fn add_step(
        &mut self,
        index: usize,
        step: &str,
        result: Result<Option<String>>,
        duration_ms: u64,
    ) {
        self.summary.total += 1;
        let (status, detail) = match result {
            Ok(detail) => {
                self.summary.passed += 1;
                (StepStatus::Passed, detail)
            }
            Err(e) => {
                self.summary.failed += 1;
                (StepStatus::Failed, Some(format!("{e:#}")))
            }
        };
        self.steps.push(StepResult {
            index,
            step: step.to_string(),
            status,
            detail,
            duration_ms,
        });
    }

    pub fn is_success(&self) -> bool {
        self.summary.failed == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepResult> {
        self.steps.iter().filter(|s| s.status == StepStatus::Failed)
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "scenario: {} ({:?} identity)",
            self.scenario, self.identity
        );
        for step in &self.steps {
            let mark = match step.status {
                StepStatus::Passed => "ok",
                StepStatus::Failed => "FAIL",
            };
            let _ = write!(out, "  [{mark:>4}] #{} {}", step.index, step.step);
            if let Some(detail) = &step.detail {
                let _ = write!(out, ": {detail}");
            }
            out.push('\n');
        }
        let _ = writeln!(
            out,
            "{} steps, {} passed, {} failed; {} loads; {} detached on disable",
            self.summary.total,
            self.summary.passed,
            self.summary.failed,
            self.data_loads,
            self.detached_on_disable
        );
        out
    }
}
