//! Kubernetes integration module for zonechaos
//!
//! All cluster access goes through the `kubectl` binary:
//! - Validating namespace and object names
//! - Rendering the demo application manifests
//! - Applying them and waiting for the rollout
//! - Querying pods, nodes and chaos resources for the experiments

mod deployment;
mod kubectl;
mod naming;
mod resources;

pub use deployment::{
    connection_instructions, rollout_state, DeploymentManager, DeploymentReport, RolloutState,
    ServiceSnapshot, WaitOptions,
};
pub use kubectl::{GracePeriod, Kubectl};
pub use naming::{validate_name, validate_namespace, MAX_NAME_LEN};
pub use resources::{
    app_labels, config_map, deployment, render_manifests, service, DemoApp, ServiceType,
    DEFAULT_APP_IMAGE, MANAGED_BY, ZONE_LABEL,
};
