//! Experiment plans: a YAML file listing experiments to run in order
//!
//! ```yaml
//! resource_group: test
//! experiments:
//!   - kind: block_network
//!     vnet: test-vnet
//!     subnet_source: SubnetA
//!     subnet_dest: SubnetB
//!     duration_seconds: 30
//!   - kind: postgres_failover
//!     enabled: false
//!     database_name: test-pgdb
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use strum::Display;
use tracing::{error, info, instrument, warn};

use super::block_network::block_network_access;
use super::context::ChaosContext;
use super::kill_pods::aks_kill_pods;
use super::network_partition::aks_container_network_partition;
use super::postgres_failover::postgres_failover;
use super::types::{Experiment, ExperimentKind, ExperimentReport};
use super::zone_down::aks_zone_down;
use crate::error::{AppError, AppResult};

const PLAN_KEYS: [&str; 2] = ["resource_group", "experiments"];
const ENTRY_KEYS: [&str; 3] = ["kind", "name", "enabled"];

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlannedExperiment {
    /// Optional label used in logs and the summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(flatten)]
    pub experiment: Experiment,
}

impl PlannedExperiment {
    pub fn label(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.experiment.kind().to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentPlan {
    pub resource_group: String,
    #[serde(default)]
    pub experiments: Vec<PlannedExperiment>,
}

impl ExperimentPlan {
    pub fn load(path: &Path) -> AppResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> AppResult<Self> {
        let doc: Value = serde_yaml::from_str(raw)?;
        reject_unknown_keys(&doc)?;
        let plan: Self = serde_yaml::from_value(doc)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Disabled entries are not validated so they can be kept as drafts
    pub fn validate(&self) -> AppResult<()> {
        if self.resource_group.trim().is_empty() {
            return Err(AppError::invalid_plan("resource_group must not be empty"));
        }
        for (index, planned) in self.experiments.iter().enumerate() {
            if !planned.enabled {
                continue;
            }
            planned.experiment.validate().map_err(|e| {
                AppError::invalid_plan(format!(
                    "experiment #{} ({}): {}",
                    index + 1,
                    planned.label(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    pub fn enabled_count(&self) -> usize {
        self.experiments.iter().filter(|e| e.enabled).count()
    }
}

fn key_name(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

/// A misspelled key would otherwise be dropped and its default used.
/// Shape errors and unknown kinds are left for serde to report.
fn reject_unknown_keys(doc: &Value) -> AppResult<()> {
    let Some(top) = doc.as_mapping() else {
        return Ok(());
    };
    for key in top.keys().map(key_name) {
        if !PLAN_KEYS.contains(&key.as_str()) {
            return Err(AppError::invalid_plan(format!(
                "unknown key '{}'; expected one of: {}",
                key,
                PLAN_KEYS.join(", ")
            )));
        }
    }

    let Some(entries) = top.get("experiments").and_then(Value::as_sequence) else {
        return Ok(());
    };
    for (index, entry) in entries.iter().enumerate() {
        let Some(map) = entry.as_mapping() else {
            continue;
        };
        let Some(kind) = map
            .get("kind")
            .and_then(Value::as_str)
            .and_then(|k| k.parse::<ExperimentKind>().ok())
        else {
            continue;
        };
        let allowed = kind.parameter_names();
        for key in map.keys().map(key_name) {
            if !ENTRY_KEYS.contains(&key.as_str()) && !allowed.contains(&key.as_str()) {
                return Err(AppError::invalid_plan(format!(
                    "experiment #{}: unknown key '{}' for {}; expected one of: {}",
                    index + 1,
                    key,
                    kind,
                    ENTRY_KEYS.iter().chain(allowed).copied().collect::<Vec<_>>().join(", ")
                )));
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// Result of one plan entry
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentOutcome {
    pub label: String,
    pub kind: ExperimentKind,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ExperimentReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PlanSummary {
    pub results: Vec<ExperimentOutcome>,
    /// The run was stopped early by an interrupt
    pub interrupted: bool,
}

impl PlanSummary {
    fn count(&self, status: OutcomeStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(OutcomeStatus::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(OutcomeStatus::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(OutcomeStatus::Skipped)
    }

    /// True when nothing failed and the run was not cut short
    pub fn is_success(&self) -> bool {
        self.failed() == 0 && !self.interrupted
    }
}

/// Run a single experiment after validating its parameters
pub async fn run_experiment(
    ctx: &ChaosContext,
    resource_group: &str,
    experiment: &Experiment,
) -> AppResult<ExperimentReport> {
    experiment.validate()?;
    match experiment {
        Experiment::BlockNetwork(p) => block_network_access(ctx, resource_group, p).await,
        Experiment::ZoneDown(p) => aks_zone_down(ctx, resource_group, p).await,
        Experiment::PostgresFailover(p) => postgres_failover(ctx, resource_group, p).await,
        Experiment::KillPods(p) => aks_kill_pods(ctx, resource_group, p).await,
        Experiment::NetworkPartition(p) => {
            aks_container_network_partition(ctx, resource_group, p).await
        }
    }
}

/// Runs plan entries one after another
pub struct PlanRunner {
    ctx: ChaosContext,
}

impl PlanRunner {
    pub fn new(ctx: ChaosContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self, plan), fields(resource_group = %plan.resource_group))]
    pub async fn run(&self, plan: &ExperimentPlan) -> PlanSummary {
        let mut summary = PlanSummary::default();
        let total = plan.experiments.len();

        for (index, planned) in plan.experiments.iter().enumerate() {
            let label = planned.label();
            let kind = planned.experiment.kind();

            if self.ctx.interrupt.is_triggered() {
                if !summary.interrupted {
                    warn!(
                        remaining = total - index,
                        "Interrupted, not starting the remaining experiments"
                    );
                    summary.interrupted = true;
                }
                summary.results.push(ExperimentOutcome {
                    label,
                    kind,
                    status: OutcomeStatus::Skipped,
                    report: None,
                    error: Some("not started, the run was interrupted".to_string()),
                });
                continue;
            }

            if !planned.enabled {
                info!("Experiment {}/{} ({}) is disabled, skipping", index + 1, total, label);
                summary.results.push(ExperimentOutcome {
                    label,
                    kind,
                    status: OutcomeStatus::Skipped,
                    report: None,
                    error: None,
                });
                continue;
            }

            info!("Experiment {}/{}: {}", index + 1, total, label);
            let outcome = match run_experiment(&self.ctx, &plan.resource_group, &planned.experiment)
                .await
            {
                Ok(report) => {
                    info!("Experiment '{}' completed successfully", label);
                    ExperimentOutcome {
                        label,
                        kind,
                        status: OutcomeStatus::Succeeded,
                        report: Some(report),
                        error: None,
                    }
                }
                Err(e) => {
                    error!("Experiment '{}' failed: {}", label, e);
                    ExperimentOutcome {
                        label,
                        kind,
                        status: OutcomeStatus::Failed,
                        report: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            summary.results.push(outcome);
        }

        if summary.interrupted {
            warn!(
                skipped = summary.skipped(),
                "Experiment plan stopped after an interrupt"
            );
        } else if summary.is_success() {
            info!("All experiments completed");
        } else {
            warn!(
                failed = summary.failed(),
                "All experiments completed, some with failures"
            );
        }
        summary
    }
}
