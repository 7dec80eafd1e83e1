use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::AppResult;
use crate::k8s::WaitOptions;

/// Environment variables with this prefix override file and default values
pub const ENV_PREFIX: &str = "ZONECHAOS";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_kubectl_bin")]
    pub kubectl_bin: String,

    #[serde(default = "default_az_bin")]
    pub az_bin: String,

    #[serde(default = "default_helm_bin")]
    pub helm_bin: String,

    #[serde(default = "default_namespace")]
    pub default_namespace: String,

    #[serde(default = "default_rollout_timeout_secs")]
    pub rollout_timeout_secs: u64,

    #[serde(default = "default_service_timeout_secs")]
    pub service_timeout_secs: u64,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_chaos_mesh_namespace")]
    pub chaos_mesh_namespace: String,

    /// Chart version; the latest release is installed when unset
    #[serde(default)]
    pub chaos_mesh_version: Option<String>,

    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_kubectl_bin() -> String {
    "kubectl".to_string()
}

fn default_az_bin() -> String {
    "az".to_string()
}

fn default_helm_bin() -> String {
    "helm".to_string()
}

fn default_namespace() -> String {
    "zone-demo".to_string()
}

fn default_rollout_timeout_secs() -> u64 {
    300
}

fn default_service_timeout_secs() -> u64 {
    120
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_chaos_mesh_namespace() -> String {
    "chaos-mesh".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Config {
    /// Load defaults, then `path` if given, then `ZONECHAOS_*` variables.
    /// A `.env` file in the working directory is read first.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn wait_options(&self) -> WaitOptions {
        WaitOptions {
            interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            timeout: Duration::from_secs(self.rollout_timeout_secs),
            service_timeout: Duration::from_secs(self.service_timeout_secs),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kubectl_bin: default_kubectl_bin(),
            az_bin: default_az_bin(),
            helm_bin: default_helm_bin(),
            default_namespace: default_namespace(),
            rollout_timeout_secs: default_rollout_timeout_secs(),
            service_timeout_secs: default_service_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            chaos_mesh_namespace: default_chaos_mesh_namespace(),
            chaos_mesh_version: None,
            log_filter: default_log_filter(),
        }
    }
}
