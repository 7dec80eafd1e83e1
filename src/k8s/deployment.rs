//! Deployment manager for the demo application
//!
//! Handles the lifecycle of the demo workload: namespace creation, manifest
//! apply, rollout polling and turning the resulting state into instructions.

use std::fmt::Write as _;
use std::time::{Duration, Instant};

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::kubectl::Kubectl;
use super::naming::{validate_name, validate_namespace};
use super::resources::{render_manifests, DemoApp, ServiceType};
use crate::error::{AppError, AppResult};

/// Polling knobs for [`DeploymentManager::deploy`]
#[derive(Debug, Clone, Copy)]
pub struct WaitOptions {
    pub interval: Duration,
    /// Deadline for the Deployment rollout
    pub timeout: Duration,
    /// Deadline for a LoadBalancer address; expiry is not an error
    pub service_timeout: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(300),
            service_timeout: Duration::from_secs(120),
        }
    }
}

/// The parts of a Service that matter for connecting to it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceSnapshot {
    pub name: String,
    pub service_type: ServiceType,
    pub cluster_ip: Option<String>,
    pub port: i32,
    pub node_port: Option<i32>,
    /// LoadBalancer ingress IP or hostname
    pub ingress: Option<String>,
}

impl ServiceSnapshot {
    pub fn from_service(svc: &Service) -> Self {
        let spec = svc.spec.as_ref();
        let port = spec
            .and_then(|s| s.ports.as_ref())
            .and_then(|p| p.first());

        let ingress = svc
            .status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.as_ref())
            .and_then(|i| i.first())
            .and_then(|i| i.ip.clone().or_else(|| i.hostname.clone()));

        Self {
            name: svc.metadata.name.clone().unwrap_or_default(),
            service_type: spec
                .and_then(|s| s.type_.as_deref())
                .and_then(|t| t.parse().ok())
                .unwrap_or(ServiceType::ClusterIP),
            cluster_ip: spec.and_then(|s| s.cluster_ip.clone()),
            port: port.map(|p| p.port).unwrap_or(80),
            node_port: port.and_then(|p| p.node_port),
            ingress,
        }
    }
}

/// Outcome of a deploy or status query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentReport {
    pub name: String,
    pub namespace: String,
    pub namespace_created: bool,
    pub ready_replicas: i32,
    pub desired_replicas: i32,
    pub elapsed: Duration,
    pub service: Option<ServiceSnapshot>,
}

impl DeploymentReport {
    pub fn is_ready(&self) -> bool {
        self.desired_replicas > 0 && self.ready_replicas >= self.desired_replicas
    }
}

/// Rollout progress derived from a Deployment's status
#[derive(Debug, Clone, PartialEq)]
pub enum RolloutState {
    Ready { available: i32, desired: i32 },
    InProgress { available: i32, desired: i32 },
    Failed(String),
}

/// Evaluate whether a Deployment has finished rolling out
pub fn rollout_state(deployment: &Deployment) -> RolloutState {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let generation = deployment.metadata.generation.unwrap_or(0);

    let Some(status) = deployment.status.as_ref() else {
        return RolloutState::InProgress {
            available: 0,
            desired,
        };
    };

    let deadline_exceeded = status.conditions.as_ref().and_then(|conds| {
        conds.iter().find(|c| {
            c.type_ == "Progressing" && c.reason.as_deref() == Some("ProgressDeadlineExceeded")
        })
    });
    if let Some(cond) = deadline_exceeded {
        return RolloutState::Failed(
            cond.message
                .clone()
                .unwrap_or_else(|| "progress deadline exceeded".to_string()),
        );
    }

    let observed = status.observed_generation.unwrap_or(0);
    let updated = status.updated_replicas.unwrap_or(0);
    let available = status.available_replicas.unwrap_or(0);

    if observed >= generation && updated >= desired && available >= desired {
        RolloutState::Ready { available, desired }
    } else {
        RolloutState::InProgress { available, desired }
    }
}

/// Manages the demo application in the cluster
pub struct DeploymentManager {
    kubectl: Kubectl,
}

impl DeploymentManager {
    pub fn new(kubectl: Kubectl) -> Self {
        Self { kubectl }
    }

    /// Validate, create the namespace, apply, then wait for readiness
    #[instrument(skip(self, app, wait), fields(namespace = %app.namespace, app = %app.name))]
    pub async fn deploy(&self, app: &DemoApp, wait: &WaitOptions) -> AppResult<DeploymentReport> {
        app.validate()?;

        let started = Instant::now();
        info!("Starting deployment of demo application");

        let namespace_created = self.kubectl.ensure_namespace(&app.namespace).await?;

        let manifests = render_manifests(app)?;
        self.kubectl.apply(&manifests, Some(&app.namespace)).await?;

        let (ready_replicas, desired_replicas) = self.wait_for_rollout(app, wait).await?;

        let service = if app.service_type == ServiceType::LoadBalancer {
            self.wait_for_ingress(app, wait).await?
        } else {
            self.service_snapshot(app).await?
        };

        let report = DeploymentReport {
            name: app.name.clone(),
            namespace: app.namespace.clone(),
            namespace_created,
            ready_replicas,
            desired_replicas,
            elapsed: started.elapsed(),
            service,
        };
        info!(elapsed = ?report.elapsed, "Deployment is ready");
        Ok(report)
    }

    /// Poll the Deployment until every replica is available
    async fn wait_for_rollout(&self, app: &DemoApp, wait: &WaitOptions) -> AppResult<(i32, i32)> {
        let what = format!("deployment/{} in namespace {}", app.name, app.namespace);
        let start = Instant::now();

        loop {
            let deployment: Deployment = self
                .kubectl
                .get("deployment", &app.name, Some(&app.namespace))
                .await?;

            match rollout_state(&deployment) {
                RolloutState::Ready { available, desired } => {
                    info!(available, desired, "Rollout complete");
                    return Ok((available, desired));
                }
                RolloutState::Failed(message) => {
                    return Err(AppError::precondition(format!(
                        "rollout of {} failed: {}",
                        what, message
                    )));
                }
                RolloutState::InProgress { available, desired } => {
                    info!(available, desired, "Waiting for rollout");
                }
            }

            if start.elapsed() >= wait.timeout {
                return Err(AppError::Timeout {
                    what,
                    after: wait.timeout,
                });
            }
            tokio::time::sleep(wait.interval).await;
        }
    }

    /// Poll a LoadBalancer Service for an address. Gives up quietly.
    async fn wait_for_ingress(
        &self,
        app: &DemoApp,
        wait: &WaitOptions,
    ) -> AppResult<Option<ServiceSnapshot>> {
        let start = Instant::now();
        loop {
            let snapshot = self.service_snapshot(app).await?;
            match &snapshot {
                Some(svc) if svc.ingress.is_some() => return Ok(snapshot),
                None => return Ok(None),
                Some(_) => debug!("LoadBalancer address still pending"),
            }
            if start.elapsed() >= wait.service_timeout {
                warn!(
                    "No external address assigned to service {} after {}s",
                    app.name,
                    wait.service_timeout.as_secs()
                );
                return Ok(snapshot);
            }
            tokio::time::sleep(wait.interval).await;
        }
    }

    async fn service_snapshot(&self, app: &DemoApp) -> AppResult<Option<ServiceSnapshot>> {
        let svc: Option<Service> = self
            .kubectl
            .try_get("service", &app.name, Some(&app.namespace))
            .await?;
        Ok(svc.as_ref().map(ServiceSnapshot::from_service))
    }

    /// Current state without changing anything
    #[instrument(skip(self, app), fields(namespace = %app.namespace, app = %app.name))]
    pub async fn status(&self, app: &DemoApp) -> AppResult<DeploymentReport> {
        validate_namespace(&app.namespace)?;
        validate_name(&app.name)?;

        let deployment: Deployment = self
            .kubectl
            .try_get("deployment", &app.name, Some(&app.namespace))
            .await?
            .ok_or_else(|| {
                AppError::precondition(format!(
                    "deployment {} not found in namespace {}",
                    app.name, app.namespace
                ))
            })?;

        let (ready_replicas, desired_replicas) = match rollout_state(&deployment) {
            RolloutState::Ready { available, desired }
            | RolloutState::InProgress { available, desired } => (available, desired),
            RolloutState::Failed(_) => (
                deployment
                    .status
                    .as_ref()
                    .and_then(|s| s.available_replicas)
                    .unwrap_or(0),
                deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1),
            ),
        };

        Ok(DeploymentReport {
            name: app.name.clone(),
            namespace: app.namespace.clone(),
            namespace_created: false,
            ready_replicas,
            desired_replicas,
            elapsed: Duration::ZERO,
            service: self.service_snapshot(app).await?,
        })
    }

    /// Remove the demo objects, optionally with the namespace
    #[instrument(skip(self, app), fields(namespace = %app.namespace, app = %app.name))]
    pub async fn teardown(&self, app: &DemoApp, delete_namespace: bool) -> AppResult<()> {
        validate_namespace(&app.namespace)?;
        validate_name(&app.name)?;

        let manifests = render_manifests(app)?;
        self.kubectl
            .delete_manifest(&manifests, Some(&app.namespace))
            .await?;
        info!("Demo application removed");

        if delete_namespace {
            self.kubectl.delete_namespace(&app.namespace).await?;
        }
        Ok(())
    }
}

/// Human-readable summary and connection hints for a report
pub fn connection_instructions(report: &DeploymentReport) -> String {
    let mut out = String::new();
    let state = if report.is_ready() { "ready" } else { "NOT ready" };
    let _ = writeln!(
        out,
        "Deployment {}/{} is {} ({}/{} replicas available).",
        report.namespace, report.name, state, report.ready_replicas, report.desired_replicas
    );
    if report.namespace_created {
        let _ = writeln!(out, "Namespace {} was created.", report.namespace);
    }

    let Some(svc) = &report.service else {
        let _ = writeln!(out, "No service found for {}.", report.name);
        return out;
    };

    match svc.service_type {
        ServiceType::LoadBalancer => match &svc.ingress {
            Some(addr) => {
                let _ = writeln!(out, "External address: {}", addr);
                let _ = writeln!(out, "  curl http://{}:{}/", addr, svc.port);
            }
            None => {
                let _ = writeln!(
                    out,
                    "The external address for service {} is still pending. Watch it with:",
                    svc.name
                );
                let _ = writeln!(out, "  kubectl get svc {} -n {} -w", svc.name, report.namespace);
            }
        },
        ServiceType::NodePort => match svc.node_port {
            Some(node_port) => {
                let _ = writeln!(out, "Service {} is exposed on node port {}.", svc.name, node_port);
                let _ = writeln!(out, "Find a node address with:");
                let _ = writeln!(out, "  kubectl get nodes -o wide");
                let _ = writeln!(out, "  curl http://<node-ip>:{}/", node_port);
            }
            None => {
                let _ = writeln!(out, "Service {} has no node port assigned yet.", svc.name);
            }
        },
        ServiceType::ClusterIP => {
            let _ = writeln!(
                out,
                "Service {} is only reachable inside the cluster{}. Forward it locally with:",
                svc.name,
                svc.cluster_ip
                    .as_deref()
                    .map(|ip| format!(" at {}:{}", ip, svc.port))
                    .unwrap_or_default()
            );
            let _ = writeln!(
                out,
                "  kubectl port-forward -n {} svc/{} 8080:{}",
                report.namespace, svc.name, svc.port
            );
            let _ = writeln!(out, "  curl http://localhost:8080/");
        }
    }

    out
}
