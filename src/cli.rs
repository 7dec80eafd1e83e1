//! Command line interface

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::chaos::{
    BlockNetworkParams, Experiment, KillPodsParams, NetworkPartitionParams, PostgresFailoverParams,
    ZoneDownParams,
};
use crate::config::Config;
use crate::k8s::{DemoApp, ServiceType, WaitOptions, DEFAULT_APP_IMAGE};

/// zonechaos - zone-redundancy demo deployments and chaos experiments for Azure
#[derive(Parser, Debug)]
#[command(name = "zonechaos")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Configuration file (TOML or YAML)
    #[arg(long, global = true, env = "ZONECHAOS_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deploy the demo application spread across availability zones
    Deploy(DeployArgs),

    /// Show readiness and connection details of a deployed demo application
    Status(AppArgs),

    /// Remove the demo application
    Teardown {
        #[command(flatten)]
        app: AppArgs,

        /// Delete the namespace as well
        #[arg(long)]
        delete_namespace: bool,
    },

    /// Run every enabled experiment in a plan file
    Run {
        /// Path to the plan YAML
        plan: PathBuf,

        /// Override the plan's resource group
        #[arg(short = 'g', long)]
        resource_group: Option<String>,
    },

    /// Run a single experiment
    Experiment {
        /// Resource group holding the target resources
        #[arg(short = 'g', long)]
        resource_group: String,

        #[command(subcommand)]
        kind: ExperimentCommand,
    },
}

/// Identifies a deployed demo application
#[derive(Args, Debug, Clone)]
pub struct AppArgs {
    /// Target namespace (defaults to the configured one)
    pub namespace: Option<String>,

    /// Application name
    #[arg(long, default_value = "zone-demo")]
    pub name: String,
}

impl AppArgs {
    pub fn to_app(&self, config: &Config) -> DemoApp {
        DemoApp {
            name: self.name.clone(),
            namespace: self
                .namespace
                .clone()
                .unwrap_or_else(|| config.default_namespace.clone()),
            ..DemoApp::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct DeployArgs {
    #[command(flatten)]
    pub app: AppArgs,

    /// Container image
    #[arg(long, default_value = DEFAULT_APP_IMAGE)]
    pub image: String,

    #[arg(long, default_value_t = 3)]
    pub replicas: i32,

    /// Port the container listens on; the default image only serves on 80,
    /// so any other value needs a matching --image
    #[arg(long, default_value_t = 80)]
    pub port: i32,

    /// ClusterIP, NodePort or LoadBalancer
    #[arg(long, default_value = "LoadBalancer")]
    pub service_type: ServiceType,

    /// Text served on the landing page
    #[arg(long)]
    pub message: Option<String>,

    /// Rollout timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Poll interval in seconds
    #[arg(long)]
    pub interval: Option<u64>,

    /// Print the manifests instead of applying them
    #[arg(long)]
    pub dry_run: bool,
}

impl DeployArgs {
    pub fn to_app(&self, config: &Config) -> DemoApp {
        let base = self.app.to_app(config);
        DemoApp {
            image: self.image.clone(),
            replicas: self.replicas,
            port: self.port,
            service_type: self.service_type,
            message: self.message.clone().unwrap_or(base.message.clone()),
            ..base
        }
    }

    /// Configured wait options with the command line overrides applied
    pub fn wait_options(&self, config: &Config) -> WaitOptions {
        let mut wait = config.wait_options();
        if let Some(timeout) = self.timeout {
            wait.timeout = Duration::from_secs(timeout);
        }
        if let Some(interval) = self.interval {
            wait.interval = Duration::from_secs(interval.max(1));
        }
        wait
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum ExperimentCommand {
    /// Deny traffic from one subnet to another for a while
    BlockNetwork {
        #[arg(long)]
        vnet: String,
        #[arg(long)]
        subnet_source: String,
        #[arg(long)]
        subnet_dest: String,
        /// Seconds to hold the block
        #[arg(long, default_value_t = 30)]
        duration: u64,
    },

    /// Delete every AKS node in one availability zone
    ZoneDown {
        #[arg(long)]
        cluster: String,
        /// Zone number (1-3)
        #[arg(long)]
        zone: String,
    },

    /// Fail a zone-redundant PostgreSQL Flexible Server over
    PostgresFailover {
        #[arg(long)]
        database: String,
        /// Planned failover instead of forced
        #[arg(long)]
        planned: bool,
    },

    /// Delete pods matching a label selector
    KillPods {
        #[arg(long)]
        cluster: String,
        #[arg(short, long)]
        namespace: String,
        /// Label selector, e.g. app=web
        #[arg(short = 'l', long)]
        selector: String,
        /// Use a 30s grace period instead of a forced delete
        #[arg(long)]
        graceful: bool,
    },

    /// Partition the pods of one zone from the other zones
    NetworkPartition {
        #[arg(long)]
        cluster: String,
        #[arg(short, long)]
        namespace: String,
        /// Zone to isolate (1-3)
        #[arg(long)]
        zone: u8,
        #[arg(long, default_value_t = 30)]
        duration: u64,
    },
}

impl From<ExperimentCommand> for Experiment {
    fn from(cmd: ExperimentCommand) -> Self {
        match cmd {
            ExperimentCommand::BlockNetwork {
                vnet,
                subnet_source,
                subnet_dest,
                duration,
            } => Experiment::BlockNetwork(BlockNetworkParams {
                vnet,
                subnet_source,
                subnet_dest,
                duration_seconds: duration,
            }),
            ExperimentCommand::ZoneDown { cluster, zone } => {
                Experiment::ZoneDown(ZoneDownParams {
                    cluster_name: cluster,
                    target_zone: zone,
                })
            }
            ExperimentCommand::PostgresFailover { database, planned } => {
                Experiment::PostgresFailover(PostgresFailoverParams {
                    database_name: database,
                    forced_failover: !planned,
                })
            }
            ExperimentCommand::KillPods {
                cluster,
                namespace,
                selector,
                graceful,
            } => Experiment::KillPods(KillPodsParams {
                cluster_name: cluster,
                namespace,
                label_selector: selector,
                graceful_stop: graceful,
            }),
            ExperimentCommand::NetworkPartition {
                cluster,
                namespace,
                zone,
                duration,
            } => Experiment::NetworkPartition(NetworkPartitionParams {
                cluster_name: cluster,
                namespace,
                isolated_zone: zone,
                duration_seconds: duration,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_deploy_overrides() {
        let cli = Cli::try_parse_from([
            "zonechaos",
            "deploy",
            "shop",
            "--replicas",
            "6",
            "--service-type",
            "nodeport",
            "--timeout",
            "30",
            "--dry-run",
        ])
        .unwrap();

        let Commands::Deploy(args) = cli.command else {
            panic!("expected deploy");
        };
        let config = Config::default();
        let app = args.to_app(&config);
        assert_eq!(app.namespace, "shop");
        assert_eq!(app.name, "zone-demo");
        assert_eq!(app.replicas, 6);
        assert_eq!(app.service_type, ServiceType::NodePort);
        assert!(args.dry_run);

        let wait = args.wait_options(&config);
        assert_eq!(wait.timeout, Duration::from_secs(30));
        assert_eq!(wait.interval, Duration::from_secs(5));
    }

    #[test]
    fn test_status_uses_configured_namespace() {
        let cli = Cli::try_parse_from(["zonechaos", "-v", "status"]).unwrap();
        assert_eq!(cli.verbose, 1);
        let Commands::Status(args) = cli.command else {
            panic!("expected status");
        };
        assert_eq!(args.to_app(&Config::default()).namespace, "zone-demo");
    }

    #[test]
    fn test_experiment_command() {
        let cli = Cli::try_parse_from([
            "zonechaos",
            "experiment",
            "-g",
            "test",
            "postgres-failover",
            "--database",
            "test-pgdb",
            "--planned",
        ])
        .unwrap();

        let Commands::Experiment { resource_group, kind } = cli.command else {
            panic!("expected experiment");
        };
        assert_eq!(resource_group, "test");
        assert_eq!(
            Experiment::from(kind),
            Experiment::PostgresFailover(PostgresFailoverParams {
                database_name: "test-pgdb".to_string(),
                forced_failover: false,
            })
        );
    }
}
