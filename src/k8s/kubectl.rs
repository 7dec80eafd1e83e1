//! `kubectl` wrapper for zonechaos

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::error::AppResult;
use crate::exec::{CommandOutput, CommandRunner, Invocation};

/// How pods are stopped by [`Kubectl::delete_pods`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GracePeriod {
    /// 30 second termination grace period
    Graceful,
    /// `--grace-period=0 --force`
    Immediate,
}

#[derive(Deserialize)]
struct ItemList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

/// Thin wrapper over the `kubectl` binary
#[derive(Clone)]
pub struct Kubectl {
    runner: Arc<dyn CommandRunner>,
    binary: String,
}

impl Kubectl {
    pub fn new(runner: Arc<dyn CommandRunner>, binary: impl Into<String>) -> Self {
        Self {
            runner,
            binary: binary.into(),
        }
    }

    fn invocation(&self) -> Invocation {
        Invocation::new(&self.binary)
    }

    async fn exec(&self, invocation: Invocation) -> AppResult<CommandOutput> {
        let output = self.runner.run(&invocation).await?;
        output.check(&invocation)
    }

    /// Check that the client binary runs
    pub async fn client_available(&self) -> AppResult<bool> {
        let output = self
            .runner
            .run(&self.invocation().args(["version", "--client"]))
            .await?;
        Ok(output.success())
    }

    /// Check whether a namespace exists.
    ///
    /// `NotFound` on stderr means absent; any other failure is an error.
    #[instrument(skip(self))]
    pub async fn namespace_exists(&self, namespace: &str) -> AppResult<bool> {
        let invocation = self.invocation().args(["get", "namespace", namespace]);
        let output = self.runner.run(&invocation).await?;
        if output.success() {
            return Ok(true);
        }
        if output.stderr.contains("NotFound") {
            return Ok(false);
        }
        output.check(&invocation).map(|_| false)
    }

    #[instrument(skip(self))]
    pub async fn create_namespace(&self, namespace: &str) -> AppResult<()> {
        self.exec(self.invocation().args(["create", "namespace", namespace]))
            .await?;
        info!(namespace, "Created namespace");
        Ok(())
    }

    /// Create the namespace if absent. Returns true when it was created.
    pub async fn ensure_namespace(&self, namespace: &str) -> AppResult<bool> {
        if self.namespace_exists(namespace).await? {
            info!(namespace, "Namespace already exists");
            return Ok(false);
        }
        self.create_namespace(namespace).await?;
        Ok(true)
    }

    #[instrument(skip(self))]
    pub async fn delete_namespace(&self, namespace: &str) -> AppResult<()> {
        self.exec(self.invocation().args([
            "delete",
            "namespace",
            namespace,
            "--ignore-not-found",
        ]))
        .await?;
        info!(namespace, "Deleted namespace");
        Ok(())
    }

    /// `kubectl apply -f -` with the manifest on stdin
    #[instrument(skip(self, manifest))]
    pub async fn apply(&self, manifest: &str, namespace: Option<&str>) -> AppResult<String> {
        let mut invocation = self.invocation().arg("apply");
        if let Some(ns) = namespace {
            invocation = invocation.args(["-n", ns]);
        }
        let output = self
            .exec(invocation.args(["-f", "-"]).stdin(manifest))
            .await?;
        for line in output.lines() {
            info!("{}", line);
        }
        Ok(output.stdout)
    }

    /// `kubectl delete -f -` with the manifest on stdin
    #[instrument(skip(self, manifest))]
    pub async fn delete_manifest(&self, manifest: &str, namespace: Option<&str>) -> AppResult<()> {
        let mut invocation = self.invocation().arg("delete");
        if let Some(ns) = namespace {
            invocation = invocation.args(["-n", ns]);
        }
        self.exec(
            invocation
                .args(["--ignore-not-found", "-f", "-"])
                .stdin(manifest),
        )
        .await?;
        Ok(())
    }

    /// Fetch a single object as JSON and parse it
    pub async fn get<T: DeserializeOwned>(
        &self,
        kind: &str,
        name: &str,
        namespace: Option<&str>,
    ) -> AppResult<T> {
        let mut invocation = self.invocation().args(["get", kind, name]);
        if let Some(ns) = namespace {
            invocation = invocation.args(["-n", ns]);
        }
        let output = self.exec(invocation.args(["-o", "json"])).await?;
        Ok(serde_json::from_str(&output.stdout)?)
    }

    /// Like [`Kubectl::get`] but a missing object yields `None`
    pub async fn try_get<T: DeserializeOwned>(
        &self,
        kind: &str,
        name: &str,
        namespace: Option<&str>,
    ) -> AppResult<Option<T>> {
        match self.get(kind, name, namespace).await {
            Ok(obj) => Ok(Some(obj)),
            Err(e) if e.stderr_contains("NotFound") => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// List objects of `kind`, optionally filtered by namespace and label selector
    pub async fn list<T: DeserializeOwned>(
        &self,
        kind: &str,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> AppResult<Vec<T>> {
        let mut invocation = self.invocation().args(["get", kind]);
        if let Some(ns) = namespace {
            invocation = invocation.args(["-n", ns]);
        }
        if let Some(sel) = selector {
            invocation = invocation.args(["-l", sel]);
        }
        let output = self.exec(invocation.args(["-o", "json"])).await?;
        let list: ItemList<T> = serde_json::from_str(&output.stdout)?;
        debug!(kind, count = list.items.len(), "Listed objects");
        Ok(list.items)
    }

    /// Delete pods matching a label selector
    #[instrument(skip(self))]
    pub async fn delete_pods(
        &self,
        namespace: &str,
        selector: &str,
        grace: GracePeriod,
    ) -> AppResult<Vec<String>> {
        let mut invocation = self
            .invocation()
            .args(["delete", "pod", "-l", selector, "-n", namespace]);
        invocation = match grace {
            GracePeriod::Graceful => invocation.arg("--grace-period=30"),
            GracePeriod::Immediate => invocation.args(["--grace-period=0", "--force"]),
        };
        let output = self.exec(invocation).await?;
        let deleted: Vec<String> = output
            .stdout
            .lines()
            .filter_map(deleted_pod_name)
            .map(str::to_string)
            .collect();
        debug!(count = deleted.len(), "Deleted pods");
        Ok(deleted)
    }

    pub async fn label_pod(
        &self,
        namespace: &str,
        pod: &str,
        key: &str,
        value: &str,
    ) -> AppResult<()> {
        self.exec(self.invocation().args([
            "label".to_string(),
            "pod".to_string(),
            pod.to_string(),
            "-n".to_string(),
            namespace.to_string(),
            format!("{}={}", key, value),
            "--overwrite".to_string(),
        ]))
        .await?;
        Ok(())
    }

    pub async fn delete_resource(
        &self,
        kind: &str,
        name: &str,
        namespace: Option<&str>,
    ) -> AppResult<()> {
        let mut invocation = self
            .invocation()
            .args(["delete", kind, name, "--ignore-not-found"]);
        if let Some(ns) = namespace {
            invocation = invocation.args(["-n", ns]);
        }
        self.exec(invocation).await?;
        Ok(())
    }

    /// Check whether a CustomResourceDefinition is installed
    pub async fn crd_exists(&self, crd: &str) -> AppResult<bool> {
        let invocation = self.invocation().args(["get", "crd", crd]);
        let output = self.runner.run(&invocation).await?;
        if output.success() {
            return Ok(true);
        }
        if output.stderr.contains("NotFound") {
            return Ok(false);
        }
        output.check(&invocation).map(|_| false)
    }
}

/// Pod name from a `pod "<name>" deleted` line; `None` for anything else
/// kubectl prints, such as "No resources found"
fn deleted_pod_name(line: &str) -> Option<&str> {
    let (name, rest) = line.trim().strip_prefix("pod \"")?.split_once('"')?;
    let rest = rest.trim_start();
    (rest.starts_with("deleted") || rest.starts_with("force deleted")).then_some(name)
}
