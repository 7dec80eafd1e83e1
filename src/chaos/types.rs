//! Experiment definitions and results

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::k8s::validate_namespace;

/// The failure-injection experiments zonechaos can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExperimentKind {
    /// Deny traffic between two subnets with a temporary NSG rule
    BlockNetwork,
    /// Delete every AKS node in one availability zone
    ZoneDown,
    /// Fail a zone-redundant PostgreSQL Flexible Server over to its standby
    PostgresFailover,
    /// Delete pods by label selector
    KillPods,
    /// Partition pods in one zone from the other zones with Chaos Mesh
    NetworkPartition,
}

impl ExperimentKind {
    /// Keys accepted next to `kind` in a plan entry
    pub fn parameter_names(self) -> &'static [&'static str] {
        match self {
            ExperimentKind::BlockNetwork => {
                &["vnet", "subnet_source", "subnet_dest", "duration_seconds"]
            }
            ExperimentKind::ZoneDown => &["cluster_name", "target_zone"],
            ExperimentKind::PostgresFailover => &["database_name", "forced_failover"],
            ExperimentKind::KillPods => {
                &["cluster_name", "namespace", "label_selector", "graceful_stop"]
            }
            ExperimentKind::NetworkPartition => {
                &["cluster_name", "namespace", "isolated_zone", "duration_seconds"]
            }
        }
    }
}

/// Parameters for [`ExperimentKind::BlockNetwork`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockNetworkParams {
    pub vnet: String,
    pub subnet_source: String,
    pub subnet_dest: String,
    /// How long the block is held, in seconds
    #[serde(default = "default_duration")]
    pub duration_seconds: u64,
}

/// Parameters for [`ExperimentKind::ZoneDown`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ZoneDownParams {
    pub cluster_name: String,
    /// Availability zone number, e.g. "1"
    pub target_zone: String,
}

/// Parameters for [`ExperimentKind::PostgresFailover`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostgresFailoverParams {
    pub database_name: String,
    /// Forced failover is immediate; planned waits for the standby to catch up
    #[serde(default = "default_true")]
    pub forced_failover: bool,
}

/// Parameters for [`ExperimentKind::KillPods`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KillPodsParams {
    pub cluster_name: String,
    pub namespace: String,
    /// e.g. `app=myapp`
    pub label_selector: String,
    #[serde(default)]
    pub graceful_stop: bool,
}

/// Parameters for [`ExperimentKind::NetworkPartition`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkPartitionParams {
    pub cluster_name: String,
    pub namespace: String,
    /// Zone (1-3) cut off from the others
    pub isolated_zone: u8,
    #[serde(default = "default_duration")]
    pub duration_seconds: u64,
}

fn default_duration() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

/// One experiment with its parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Experiment {
    BlockNetwork(BlockNetworkParams),
    ZoneDown(ZoneDownParams),
    PostgresFailover(PostgresFailoverParams),
    KillPods(KillPodsParams),
    NetworkPartition(NetworkPartitionParams),
}

impl Experiment {
    pub fn kind(&self) -> ExperimentKind {
        match self {
            Experiment::BlockNetwork(_) => ExperimentKind::BlockNetwork,
            Experiment::ZoneDown(_) => ExperimentKind::ZoneDown,
            Experiment::PostgresFailover(_) => ExperimentKind::PostgresFailover,
            Experiment::KillPods(_) => ExperimentKind::KillPods,
            Experiment::NetworkPartition(_) => ExperimentKind::NetworkPartition,
        }
    }

    /// Reject parameters that cannot work before anything is touched
    pub fn validate(&self) -> AppResult<()> {
        fn non_empty(field: &str, value: &str) -> AppResult<()> {
            if value.trim().is_empty() {
                return Err(AppError::invalid_plan(format!("{} must not be empty", field)));
            }
            Ok(())
        }
        fn positive(field: &str, value: u64) -> AppResult<()> {
            if value == 0 {
                return Err(AppError::invalid_plan(format!("{} must be greater than zero", field)));
            }
            Ok(())
        }

        match self {
            Experiment::BlockNetwork(p) => {
                non_empty("vnet", &p.vnet)?;
                non_empty("subnet_source", &p.subnet_source)?;
                non_empty("subnet_dest", &p.subnet_dest)?;
                if p.subnet_source == p.subnet_dest {
                    return Err(AppError::invalid_plan(
                        "subnet_source and subnet_dest must differ",
                    ));
                }
                positive("duration_seconds", p.duration_seconds)
            }
            Experiment::ZoneDown(p) => {
                non_empty("cluster_name", &p.cluster_name)?;
                validate_zone(&p.target_zone)
            }
            Experiment::PostgresFailover(p) => non_empty("database_name", &p.database_name),
            Experiment::KillPods(p) => {
                non_empty("cluster_name", &p.cluster_name)?;
                non_empty("label_selector", &p.label_selector)?;
                validate_namespace(&p.namespace)
            }
            Experiment::NetworkPartition(p) => {
                non_empty("cluster_name", &p.cluster_name)?;
                validate_namespace(&p.namespace)?;
                validate_zone(&p.isolated_zone.to_string())?;
                positive("duration_seconds", p.duration_seconds)
            }
        }
    }
}

/// Azure regions expose availability zones 1, 2 and 3
pub const ZONES: [&str; 3] = ["1", "2", "3"];

fn validate_zone(zone: &str) -> AppResult<()> {
    if ZONES.contains(&zone) {
        Ok(())
    } else {
        Err(AppError::invalid_plan(format!(
            "zone must be one of 1, 2, 3 (got '{}')",
            zone
        )))
    }
}

impl BlockNetworkParams {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_seconds)
    }

    pub fn rule_name(&self) -> String {
        format!("block-{}-to-{}-rule", self.subnet_source, self.subnet_dest)
    }
}

impl NetworkPartitionParams {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_seconds)
    }
}

/// What happened during one experiment run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentReport {
    pub id: Uuid,
    pub kind: ExperimentKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub notes: Vec<String>,
    /// The hold window was cut short by an interrupt
    #[serde(default)]
    pub interrupted: bool,
}

impl ExperimentReport {
    pub fn start(kind: ExperimentKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            started_at: Utc::now(),
            finished_at: None,
            notes: Vec::new(),
            interrupted: false,
        }
    }

    /// Log `note` and keep it in the report
    pub fn note(&mut self, note: impl Into<String>) {
        let note = note.into();
        info!(experiment = %self.kind, "{}", note);
        self.notes.push(note);
    }

    pub fn mark_interrupted(&mut self, note: impl Into<String>) {
        self.interrupted = true;
        self.note(note);
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }
}
