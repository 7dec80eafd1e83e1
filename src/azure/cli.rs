//! `az` wrapper

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{info, instrument};

use crate::error::AppResult;
use crate::exec::{CommandOutput, CommandRunner, Invocation};

/// Thin wrapper over the Azure CLI binary
#[derive(Clone)]
pub struct AzCli {
    runner: Arc<dyn CommandRunner>,
    binary: String,
}

impl AzCli {
    pub fn new(runner: Arc<dyn CommandRunner>, binary: impl Into<String>) -> Self {
        Self {
            runner,
            binary: binary.into(),
        }
    }

    fn invocation<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Invocation::new(&self.binary).args(args)
    }

    /// Run without checking the exit status
    pub async fn try_run<I, S>(&self, args: I) -> AppResult<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runner.run(&self.invocation(args)).await
    }

    /// Run and fail on a non-zero exit; output is returned for logging
    pub async fn run<I, S>(&self, args: I) -> AppResult<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let invocation = self.invocation(args);
        let output = self.runner.run(&invocation).await?;
        output.check(&invocation)
    }

    /// Run with `-o json` and parse stdout
    pub async fn json<T, I, S>(&self, args: I) -> AppResult<T>
    where
        T: DeserializeOwned,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let invocation = self.invocation(args).args(["-o", "json"]);
        let output = self.runner.run(&invocation).await?.check(&invocation)?;
        Ok(serde_json::from_str(&output.stdout)?)
    }

    /// Run with `-o tsv` and return the non-empty lines
    pub async fn tsv<I, S>(&self, args: I) -> AppResult<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let invocation = self.invocation(args).args(["-o", "tsv"]);
        let output = self.runner.run(&invocation).await?.check(&invocation)?;
        Ok(output.lines())
    }

    /// Check that the CLI is logged in
    pub async fn logged_in(&self) -> AppResult<bool> {
        Ok(self.try_run(["account", "show"]).await?.success())
    }

    /// Merge the AKS cluster credentials into the local kubeconfig
    #[instrument(skip(self))]
    pub async fn aks_get_credentials(&self, resource_group: &str, cluster: &str) -> AppResult<()> {
        self.run([
            "aks",
            "get-credentials",
            "--resource-group",
            resource_group,
            "--name",
            cluster,
            "--overwrite-existing",
        ])
        .await?;
        info!(cluster, "Fetched AKS credentials");
        Ok(())
    }
}
