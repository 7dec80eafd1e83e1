//! Failure-injection experiments for zone-redundant Azure workloads
//!
//! Each experiment drives `az`, `kubectl` or `helm` through a
//! [`ChaosContext`] and returns an [`ExperimentReport`]:
//! - Blocking traffic between two subnets with an NSG rule
//! - Deleting every AKS node in one availability zone
//! - Failing a PostgreSQL Flexible Server over to its standby
//! - Killing pods by label selector
//! - Partitioning the pods of one zone with Chaos Mesh

mod block_network;
mod conditions;
mod context;
mod interrupt;
mod kill_pods;
mod network_partition;
mod plan;
mod postgres_failover;
mod types;
mod zone_down;

pub use block_network::block_network_access;
pub use conditions::{create_zone_partition, partition_name, zone_suffix, NETWORK_CHAOS_CRD};
pub use context::ChaosContext;
pub use interrupt::{Interrupt, INTERRUPTED_EXIT_CODE};
pub use kill_pods::aks_kill_pods;
pub use network_partition::aks_container_network_partition;
pub use plan::{
    run_experiment, ExperimentOutcome, ExperimentPlan, OutcomeStatus, PlanRunner, PlanSummary,
    PlannedExperiment,
};
pub use postgres_failover::postgres_failover;
pub use types::*;
pub use zone_down::aks_zone_down;
