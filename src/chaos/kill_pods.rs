//! Delete pods by label selector

use tracing::{debug, instrument};

use super::context::ChaosContext;
use super::types::{ExperimentKind, ExperimentReport, KillPodsParams};
use crate::error::AppResult;
use crate::k8s::GracePeriod;

#[instrument(skip(ctx, params), fields(cluster = %params.cluster_name, namespace = %params.namespace))]
pub async fn aks_kill_pods(
    ctx: &ChaosContext,
    resource_group: &str,
    params: &KillPodsParams,
) -> AppResult<ExperimentReport> {
    let mut report = ExperimentReport::start(ExperimentKind::KillPods);
    ctx.connect_cluster(resource_group, &params.cluster_name)
        .await?;

    let grace = if params.graceful_stop {
        GracePeriod::Graceful
    } else {
        GracePeriod::Immediate
    };
    debug!(?grace, selector = %params.label_selector, "Deleting pods");

    let deleted = ctx
        .kubectl
        .delete_pods(&params.namespace, &params.label_selector, grace)
        .await?;

    if deleted.is_empty() {
        report.note(format!(
            "No pods matched '{}' in namespace '{}'",
            params.label_selector, params.namespace
        ));
    } else {
        report.note(format!(
            "Deleted {} pod(s) with label '{}' in namespace '{}'",
            deleted.len(),
            params.label_selector,
            params.namespace
        ));
    }
    Ok(report.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::AppError;
    use crate::exec::{CommandOutput, MockCommandRunner};
    use std::sync::Arc;

    fn params(graceful: bool) -> KillPodsParams {
        KillPodsParams {
            cluster_name: "aks-test".to_string(),
            namespace: "demo".to_string(),
            label_selector: "app=web".to_string(),
            graceful_stop: graceful,
        }
    }

    fn expect_connect(mock: &mut MockCommandRunner, kubectl_ok: bool) {
        mock.expect_run()
            .withf(|inv| inv.starts_with(&["aks", "get-credentials"]))
            .times(1)
            .returning(|_| Ok(CommandOutput::ok("Merged \"aks-test\" as current context")));
        mock.expect_run()
            .withf(|inv| inv.starts_with(&["version", "--client"]))
            .times(1)
            .returning(move |_| {
                if kubectl_ok {
                    Ok(CommandOutput::ok("Client Version: v1.28.3"))
                } else {
                    Ok(CommandOutput::failed(127, "kubectl: not found"))
                }
            });
    }

    #[tokio::test]
    async fn test_kill_pods_graceful() {
        let mut mock = MockCommandRunner::new();
        expect_connect(&mut mock, true);
        mock.expect_run()
            .withf(|inv| {
                inv.starts_with(&["delete", "pod", "-l", "app=web", "-n", "demo"])
                    && inv.has_arg("--grace-period=30")
                    && !inv.has_arg("--force")
            })
            .times(1)
            .returning(|_| Ok(CommandOutput::ok("pod \"web-1\" deleted\npod \"web-2\" deleted\n")));

        let ctx = ChaosContext::new(Arc::new(mock), &Config::default());
        let report = aks_kill_pods(&ctx, "test", &params(true)).await.unwrap();
        assert_eq!(
            report.notes,
            vec!["Deleted 2 pod(s) with label 'app=web' in namespace 'demo'"]
        );
    }

    #[tokio::test]
    async fn test_kill_pods_no_match() {
        let mut mock = MockCommandRunner::new();
        expect_connect(&mut mock, true);
        mock.expect_run()
            .withf(|inv| inv.starts_with(&["delete", "pod"]) && inv.has_arg("--force"))
            .times(1)
            .returning(|_| Ok(CommandOutput::ok("No resources found\n")));

        let ctx = ChaosContext::new(Arc::new(mock), &Config::default());
        let report = aks_kill_pods(&ctx, "test", &params(false)).await.unwrap();
        assert_eq!(
            report.notes,
            vec!["No pods matched 'app=web' in namespace 'demo'"]
        );
    }

    #[tokio::test]
    async fn test_kill_pods_without_kubectl() {
        let mut mock = MockCommandRunner::new();
        expect_connect(&mut mock, false);

        let ctx = ChaosContext::new(Arc::new(mock), &Config::default());
        let err = aks_kill_pods(&ctx, "test", &params(false)).await.unwrap_err();
        assert!(matches!(err, AppError::ToolMissing(tool) if tool == "kubectl"));
    }
}
