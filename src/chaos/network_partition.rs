//! Partition the pods of one availability zone from the rest with Chaos Mesh
//!
//! Pods are labelled with the zone of the node they run on, then a
//! `NetworkChaos` partition selects the isolated zone as source and every
//! other zone as target. The chaos object is removed once the hold window
//! ends, including when it was cut short by Ctrl-C.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Node, Pod};
use tracing::{debug, info, instrument, warn};

use super::conditions::{create_zone_partition, partition_name, zone_suffix};
use super::context::ChaosContext;
use super::types::{ExperimentKind, ExperimentReport, NetworkPartitionParams};
use crate::error::{AppError, AppResult};
use crate::k8s::ZONE_LABEL;

/// Node name to zone number, for every node carrying the zone label
async fn node_zones(ctx: &ChaosContext) -> AppResult<BTreeMap<String, String>> {
    let nodes: Vec<Node> = ctx.kubectl.list("nodes", None, None).await?;
    Ok(nodes
        .into_iter()
        .filter_map(|node| {
            let name = node.metadata.name?;
            let zone = node.metadata.labels?.get(ZONE_LABEL)?.clone();
            Some((name, zone_suffix(&zone).to_string()))
        })
        .collect())
}

/// Label each pod in `namespace` with its node's zone; returns pods per zone
async fn label_pods_with_zone(
    ctx: &ChaosContext,
    namespace: &str,
) -> AppResult<BTreeMap<String, usize>> {
    let zones = node_zones(ctx).await?;
    let pods: Vec<Pod> = ctx.kubectl.list("pods", Some(namespace), None).await?;
    debug!("Found {} pod(s) in namespace {}", pods.len(), namespace);

    let mut per_zone = BTreeMap::new();
    for pod in pods {
        let Some(name) = pod.metadata.name else {
            continue;
        };
        let Some(node) = pod.spec.and_then(|s| s.node_name) else {
            warn!("Pod {} is not scheduled yet, skipping", name);
            continue;
        };
        let Some(zone) = zones.get(&node) else {
            warn!("Node {} of pod {} has no zone label, skipping", node, name);
            continue;
        };

        debug!("Labeling pod {} with zone {}", name, zone);
        ctx.kubectl
            .label_pod(namespace, &name, ZONE_LABEL, zone)
            .await?;
        *per_zone.entry(zone.clone()).or_insert(0) += 1;
    }
    Ok(per_zone)
}

#[instrument(skip(ctx, params), fields(cluster = %params.cluster_name, zone = params.isolated_zone))]
pub async fn aks_container_network_partition(
    ctx: &ChaosContext,
    resource_group: &str,
    params: &NetworkPartitionParams,
) -> AppResult<ExperimentReport> {
    let mut report = ExperimentReport::start(ExperimentKind::NetworkPartition);
    let namespace = params.namespace.as_str();

    ctx.connect_cluster(resource_group, &params.cluster_name)
        .await?;
    if !ctx.helm.available().await? {
        return Err(AppError::ToolMissing("helm".to_string()));
    }
    if ctx.ensure_chaos_mesh().await? {
        report.note(format!(
            "Installed Chaos Mesh into namespace {}",
            ctx.helm.namespace()
        ));
    }

    info!("Finding all pods that run in zone {}", params.isolated_zone);
    let per_zone = label_pods_with_zone(ctx, namespace).await?;
    let isolated = per_zone
        .get(&params.isolated_zone.to_string())
        .copied()
        .unwrap_or(0);
    if isolated == 0 {
        warn!(
            "No pods in namespace {} run in zone {}, the partition will have no effect",
            namespace, params.isolated_zone
        );
    }
    report.note(format!(
        "Labelled pods by zone: {}",
        per_zone
            .iter()
            .map(|(zone, count)| format!("zone {}: {}", zone, count))
            .collect::<Vec<_>>()
            .join(", ")
    ));

    let chaos = create_zone_partition(namespace, params.isolated_zone);
    let manifest = serde_yaml::to_string(&chaos)?;
    let name = partition_name(params.isolated_zone);
    ctx.kubectl.apply(&manifest, Some(namespace)).await?;
    report.note(format!(
        "Applied NetworkChaos {} isolating zone {} for {}s",
        name, params.isolated_zone, params.duration_seconds
    ));

    let interrupted = ctx.hold(params.duration()).await;

    debug!("Deleting NetworkChaos experiment {}", name);
    ctx.kubectl
        .delete_resource("networkchaos", &name, Some(namespace))
        .await
        .map_err(|e| AppError::cleanup(format!("NetworkChaos {}/{}", namespace, name), e))?;

    if interrupted {
        report.mark_interrupted("Partition ended early after an interrupt");
    }
    report.note(format!("Removed NetworkChaos {}", name));
    Ok(report.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chaos::Interrupt;
    use crate::config::Config;
    use crate::exec::{CommandOutput, MockCommandRunner};
    use std::sync::Arc;

    const NODES: &str = r#"{"apiVersion":"v1","kind":"List","items":[
        {"apiVersion":"v1","kind":"Node","metadata":{"name":"aks-1","labels":{"topology.kubernetes.io/zone":"westeurope-1"}}},
        {"apiVersion":"v1","kind":"Node","metadata":{"name":"aks-2","labels":{"topology.kubernetes.io/zone":"westeurope-2"}}},
        {"apiVersion":"v1","kind":"Node","metadata":{"name":"aks-3"}}
    ]}"#;

    const PODS: &str = r#"{"apiVersion":"v1","kind":"List","items":[
        {"apiVersion":"v1","kind":"Pod","metadata":{"name":"web-a"},"spec":{"containers":[],"nodeName":"aks-1"}},
        {"apiVersion":"v1","kind":"Pod","metadata":{"name":"web-b"},"spec":{"containers":[],"nodeName":"aks-2"}},
        {"apiVersion":"v1","kind":"Pod","metadata":{"name":"web-c"},"spec":{"containers":[],"nodeName":"aks-3"}},
        {"apiVersion":"v1","kind":"Pod","metadata":{"name":"web-d"},"spec":{"containers":[]}}
    ]}"#;

    fn params() -> NetworkPartitionParams {
        NetworkPartitionParams {
            cluster_name: "aks-test".to_string(),
            namespace: "demo".to_string(),
            isolated_zone: 1,
            duration_seconds: 0,
        }
    }

    fn expect_setup(mock: &mut MockCommandRunner) {
        mock.expect_run()
            .withf(|inv| inv.starts_with(&["aks", "get-credentials"]))
            .returning(|_| Ok(CommandOutput::ok("")));
        mock.expect_run()
            .withf(|inv| inv.starts_with(&["version", "--client"]))
            .returning(|_| Ok(CommandOutput::ok("Client Version: v1.28.3")));
        mock.expect_run()
            .withf(|inv| inv.starts_with(&["version", "--short"]))
            .returning(|_| Ok(CommandOutput::ok("v3.14.0")));
        mock.expect_run()
            .withf(|inv| inv.starts_with(&["get", "crd"]))
            .returning(|_| Ok(CommandOutput::ok("networkchaos.chaos-mesh.org")));
        mock.expect_run()
            .withf(|inv| inv.starts_with(&["get", "nodes"]))
            .returning(|_| Ok(CommandOutput::ok(NODES)));
        mock.expect_run()
            .withf(|inv| inv.starts_with(&["get", "pods", "-n", "demo"]))
            .returning(|_| Ok(CommandOutput::ok(PODS)));
        mock.expect_run()
            .withf(|inv| inv.starts_with(&["label", "pod"]))
            .times(2)
            .returning(|inv| {
                assert!(inv.has_arg("--overwrite"));
                Ok(CommandOutput::ok("pod labeled"))
            });
        mock.expect_run()
            .withf(|inv| {
                inv.starts_with(&["apply", "-n", "demo", "-f", "-"])
                    && inv
                        .stdin
                        .as_deref()
                        .is_some_and(|m| m.contains("kind: NetworkChaos"))
            })
            .times(1)
            .returning(|_| {
                Ok(CommandOutput::ok(
                    "networkchaos.chaos-mesh.org/zonechaos-partition-zone1 created",
                ))
            });
    }

    #[tokio::test]
    async fn test_partition_applies_and_cleans_up() {
        let mut mock = MockCommandRunner::new();
        expect_setup(&mut mock);
        mock.expect_run()
            .withf(|inv| {
                inv.starts_with(&["delete", "networkchaos", "zonechaos-partition-zone1"])
                    && inv.flag_value("-n") == Some("demo")
            })
            .times(1)
            .returning(|_| Ok(CommandOutput::ok("deleted")));

        let ctx = ChaosContext::new(Arc::new(mock), &Config::default());
        let report = aks_container_network_partition(&ctx, "test", &params())
            .await
            .unwrap();

        assert!(report.notes.contains(&"Labelled pods by zone: zone 1: 1, zone 2: 1".to_string()));
        assert_eq!(
            report.notes.last().map(String::as_str),
            Some("Removed NetworkChaos zonechaos-partition-zone1")
        );
    }

    #[tokio::test]
    async fn test_partition_cleanup_failure_asks_for_manual_delete() {
        let mut mock = MockCommandRunner::new();
        expect_setup(&mut mock);
        mock.expect_run()
            .withf(|inv| inv.starts_with(&["delete", "networkchaos"]))
            .times(1)
            .returning(|_| Ok(CommandOutput::failed(1, "Unable to connect to the server")));

        let ctx = ChaosContext::new(Arc::new(mock), &Config::default());
        let err = aks_container_network_partition(&ctx, "test", &params())
            .await
            .unwrap_err();

        match &err {
            AppError::Cleanup { what, source } => {
                assert_eq!(what, "NetworkChaos demo/zonechaos-partition-zone1");
                assert!(source.stderr_contains("Unable to connect"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("remove it manually"));
    }

    #[tokio::test]
    async fn test_partition_interrupt_still_cleans_up() {
        let mut mock = MockCommandRunner::new();
        expect_setup(&mut mock);
        mock.expect_run()
            .withf(|inv| inv.starts_with(&["delete", "networkchaos", "zonechaos-partition-zone1"]))
            .times(1)
            .returning(|_| Ok(CommandOutput::ok("deleted")));

        let interrupt = Interrupt::new();
        interrupt.trigger();
        let ctx = ChaosContext::new(Arc::new(mock), &Config::default()).with_interrupt(interrupt);
        let mut long = params();
        long.duration_seconds = 3600;

        let report = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            aks_container_network_partition(&ctx, "test", &long),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(report.interrupted);
        assert!(report
            .notes
            .contains(&"Partition ended early after an interrupt".to_string()));
        assert_eq!(
            report.notes.last().map(String::as_str),
            Some("Removed NetworkChaos zonechaos-partition-zone1")
        );
    }
}
