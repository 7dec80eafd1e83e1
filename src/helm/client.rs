use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::error::AppResult;
use crate::exec::{CommandOutput, CommandRunner, Invocation};

/// Client for the Helm CLI, scoped to one namespace
#[derive(Clone)]
pub struct HelmClient {
    runner: Arc<dyn CommandRunner>,
    binary: String,
    namespace: String,
}

impl HelmClient {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        binary: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            binary: binary.into(),
            namespace: namespace.into(),
        }
    }

    /// Get the configured namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn invocation(&self) -> Invocation {
        Invocation::new(&self.binary)
    }

    async fn exec(&self, invocation: Invocation) -> AppResult<CommandOutput> {
        let output = self.runner.run(&invocation).await?;
        output.check(&invocation)
    }

    /// Check that the helm binary runs
    pub async fn available(&self) -> AppResult<bool> {
        let output = self
            .runner
            .run(&self.invocation().args(["version", "--short"]))
            .await?;
        if output.success() {
            info!("Helm version: {}", output.stdout_trimmed());
        }
        Ok(output.success())
    }

    /// Add (or refresh) a chart repository
    #[instrument(skip(self))]
    pub async fn repo_add(&self, name: &str, url: &str) -> AppResult<()> {
        self.exec(
            self.invocation()
                .args(["repo", "add", name, url, "--force-update"]),
        )
        .await?;
        info!("Added Helm repository {} ({})", name, url);
        Ok(())
    }

    pub async fn repo_update(&self) -> AppResult<()> {
        self.exec(self.invocation().args(["repo", "update"])).await?;
        Ok(())
    }

    /// True when `helm status` finds the release
    pub async fn release_exists(&self, release: &str) -> AppResult<bool> {
        let output = self
            .runner
            .run(&self.invocation().args([
                "status",
                release,
                "--namespace",
                self.namespace.as_str(),
            ]))
            .await?;
        Ok(output.success())
    }

    /// Install or upgrade a chart with `--set` overrides
    #[instrument(skip(self, set_values))]
    pub async fn install(
        &self,
        release: &str,
        chart: &str,
        version: Option<&str>,
        set_values: &[(String, String)],
        wait: bool,
    ) -> AppResult<String> {
        info!("Installing Helm chart: {} (release: {})", chart, release);

        let mut invocation = self.invocation().args([
            "upgrade",
            "--install",
            release,
            chart,
            "--namespace",
            self.namespace.as_str(),
            "--create-namespace",
        ]);

        if let Some(ver) = version {
            invocation = invocation.args(["--version", ver]);
        }
        for (key, value) in set_values {
            invocation = invocation.arg("--set").arg(format!("{}={}", key, value));
        }
        if wait {
            invocation = invocation.arg("--wait");
        }

        let output = self.exec(invocation).await?;
        if !output.stderr.trim().is_empty() {
            warn!("Helm install stderr: {}", output.stderr.trim());
        }
        info!("Helm chart installed successfully");
        Ok(output.stdout)
    }

    /// Uninstall a release
    #[instrument(skip(self))]
    pub async fn uninstall(&self, release: &str) -> AppResult<String> {
        let output = self
            .exec(self.invocation().args([
                "uninstall",
                release,
                "--namespace",
                self.namespace.as_str(),
            ]))
            .await?;
        info!("Helm release uninstalled successfully: {}", output.stdout_trimmed());
        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::MockCommandRunner;

    #[tokio::test]
    async fn test_install_builds_set_flags() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run()
            .withf(|inv| {
                inv.starts_with(&["upgrade", "--install", "chaos-mesh", "chaos-mesh/chaos-mesh"])
                    && inv.flag_value("--namespace") == Some("chaos-mesh")
                    && inv.flag_value("--version") == Some("2.7.0")
                    && inv.flag_value("--set") == Some("chaosDaemon.runtime=containerd")
                    && inv.has_arg("--wait")
                    && inv.has_arg("--create-namespace")
            })
            .times(1)
            .returning(|_| Ok(CommandOutput::ok("STATUS: deployed")));

        let helm = HelmClient::new(Arc::new(mock), "helm", "chaos-mesh");
        let out = helm
            .install(
                "chaos-mesh",
                "chaos-mesh/chaos-mesh",
                Some("2.7.0"),
                &[("chaosDaemon.runtime".to_string(), "containerd".to_string())],
                true,
            )
            .await
            .unwrap();
        assert!(out.contains("deployed"));
    }

    #[tokio::test]
    async fn test_release_exists() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run()
            .withf(|inv| inv.starts_with(&["status", "chaos-mesh"]))
            .returning(|_| Ok(CommandOutput::failed(1, "Error: release: not found")));

        let helm = HelmClient::new(Arc::new(mock), "helm", "chaos-mesh");
        assert!(!helm.release_exists("chaos-mesh").await.unwrap());
    }
}
