//! Shared handles for running experiments

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::conditions::NETWORK_CHAOS_CRD;
use super::interrupt::Interrupt;
use crate::azure::AzCli;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::exec::CommandRunner;
use crate::helm::HelmClient;
use crate::k8s::Kubectl;

const CHAOS_MESH_REPO: &str = "chaos-mesh";
const CHAOS_MESH_REPO_URL: &str = "https://charts.chaos-mesh.org";
const CHAOS_MESH_CHART: &str = "chaos-mesh/chaos-mesh";
const CHAOS_MESH_RELEASE: &str = "chaos-mesh";

/// CLI wrappers every experiment can use
#[derive(Clone)]
pub struct ChaosContext {
    pub az: AzCli,
    pub kubectl: Kubectl,
    pub helm: HelmClient,
    pub chaos_mesh_version: Option<String>,
    pub interrupt: Interrupt,
}

impl ChaosContext {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &Config) -> Self {
        Self {
            az: AzCli::new(runner.clone(), &config.az_bin),
            kubectl: Kubectl::new(runner.clone(), &config.kubectl_bin),
            helm: HelmClient::new(runner, &config.helm_bin, &config.chaos_mesh_namespace),
            chaos_mesh_version: config.chaos_mesh_version.clone(),
            interrupt: Interrupt::new(),
        }
    }

    /// Share an existing interrupt flag, e.g. one fed by Ctrl-C
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Sleep for `duration`, returning early with `true` once interrupted
    pub async fn hold(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = self.interrupt.triggered() => {
                warn!("Interrupted, ending the experiment window early");
                true
            }
        }
    }

    /// Point kubectl at the AKS cluster and make sure it responds
    pub async fn connect_cluster(&self, resource_group: &str, cluster: &str) -> AppResult<()> {
        self.az.aks_get_credentials(resource_group, cluster).await?;
        if !self.kubectl.client_available().await? {
            return Err(AppError::ToolMissing("kubectl".to_string()));
        }
        Ok(())
    }

    /// Install Chaos Mesh with Helm unless its CRDs are already present
    pub async fn ensure_chaos_mesh(&self) -> AppResult<bool> {
        if self.kubectl.crd_exists(NETWORK_CHAOS_CRD).await? {
            return Ok(false);
        }
        if !self.helm.available().await? {
            return Err(AppError::ToolMissing("helm".to_string()));
        }

        info!("Chaos Mesh not found on cluster, installing it now");
        self.helm
            .repo_add(CHAOS_MESH_REPO, CHAOS_MESH_REPO_URL)
            .await?;
        // AKS nodes run containerd
        let values = [
            ("chaosDaemon.runtime", "containerd"),
            ("chaosDaemon.socketPath", "/run/containerd/containerd.sock"),
        ]
        .map(|(k, v)| (k.to_string(), v.to_string()));
        self.helm
            .install(
                CHAOS_MESH_RELEASE,
                CHAOS_MESH_CHART,
                self.chaos_mesh_version.as_deref(),
                &values,
                true,
            )
            .await?;

        if !self.kubectl.crd_exists(NETWORK_CHAOS_CRD).await? {
            return Err(AppError::precondition(
                "Chaos Mesh was installed but the NetworkChaos CRD is missing",
            ));
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{CommandOutput, MockCommandRunner};

    #[tokio::test]
    async fn test_ensure_chaos_mesh_installs_when_missing() {
        let crd_checks = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut mock = MockCommandRunner::new();

        let counter = crd_checks.clone();
        mock.expect_run()
            .withf(|inv| inv.starts_with(&["get", "crd", NETWORK_CHAOS_CRD]))
            .times(2)
            .returning(move |_| {
                if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                    Ok(CommandOutput::failed(1, "Error from server (NotFound)"))
                } else {
                    Ok(CommandOutput::ok("networkchaos.chaos-mesh.org"))
                }
            });
        mock.expect_run()
            .withf(|inv| inv.starts_with(&["version", "--short"]))
            .returning(|_| Ok(CommandOutput::ok("v3.14.0")));
        mock.expect_run()
            .withf(|inv| inv.starts_with(&["repo", "add", "chaos-mesh"]))
            .times(1)
            .returning(|_| Ok(CommandOutput::ok("\"chaos-mesh\" has been added")));
        mock.expect_run()
            .withf(|inv| inv.starts_with(&["upgrade", "--install", "chaos-mesh"]) && inv.has_arg("--wait"))
            .times(1)
            .returning(|_| Ok(CommandOutput::ok("STATUS: deployed")));

        let ctx = ChaosContext::new(Arc::new(mock), &Config::default());
        assert!(ctx.ensure_chaos_mesh().await.unwrap());
    }

    #[tokio::test]
    async fn test_ensure_chaos_mesh_noop_when_present() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run()
            .withf(|inv| inv.starts_with(&["get", "crd"]))
            .times(1)
            .returning(|_| Ok(CommandOutput::ok("networkchaos.chaos-mesh.org")));

        let ctx = ChaosContext::new(Arc::new(mock), &Config::default());
        assert!(!ctx.ensure_chaos_mesh().await.unwrap());
    }

    #[tokio::test]
    async fn test_hold_elapses() {
        let ctx = ChaosContext::new(Arc::new(MockCommandRunner::new()), &Config::default());
        assert!(!ctx.hold(Duration::from_millis(5)).await);
    }

    #[tokio::test]
    async fn test_hold_ends_early_on_interrupt() {
        let interrupt = Interrupt::new();
        let ctx = ChaosContext::new(Arc::new(MockCommandRunner::new()), &Config::default())
            .with_interrupt(interrupt.clone());

        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            interrupt.trigger();
        });
        let interrupted = tokio::time::timeout(Duration::from_secs(5), ctx.hold(Duration::from_secs(600)))
            .await
            .unwrap();
        trigger.await.unwrap();

        assert!(interrupted);
        assert!(ctx.interrupt.is_triggered());
    }
}
