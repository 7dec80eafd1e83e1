//! Simulate an availability zone outage by deleting every AKS node in it

use tracing::{debug, error, info, instrument, warn};

use super::context::ChaosContext;
use super::types::{ExperimentKind, ExperimentReport, ZoneDownParams};
use crate::azure::NodePool;
use crate::error::{AppError, AppResult};

/// Delete the VMSS instances of every node pool that sit in `target_zone`
#[instrument(skip(ctx, params), fields(cluster = %params.cluster_name, zone = %params.target_zone))]
pub async fn aks_zone_down(
    ctx: &ChaosContext,
    resource_group: &str,
    params: &ZoneDownParams,
) -> AppResult<ExperimentReport> {
    let mut report = ExperimentReport::start(ExperimentKind::ZoneDown);
    let cluster = params.cluster_name.as_str();
    info!(
        "Starting zone down simulation for cluster '{}' in zone '{}'",
        cluster, params.target_zone
    );

    let node_rg = ctx
        .az
        .tsv([
            "aks",
            "show",
            "--resource-group",
            resource_group,
            "--name",
            cluster,
            "--query",
            "nodeResourceGroup",
        ])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| {
            AppError::precondition(format!("cluster '{}' has no node resource group", cluster))
        })?;
    debug!(node_resource_group = %node_rg, "Resolved node resource group");

    let nodepools: Vec<NodePool> = ctx
        .az
        .json([
            "aks",
            "nodepool",
            "list",
            "--resource-group",
            resource_group,
            "--cluster-name",
            cluster,
        ])
        .await?;
    debug!("Found {} node pool(s)", nodepools.len());

    let mut deleted = 0usize;
    for pool in &nodepools {
        deleted += process_nodepool(ctx, resource_group, params, &node_rg, pool, &mut report).await?;
    }

    report.note(format!(
        "Deleted {} node(s) in zone {} across {} node pool(s)",
        deleted,
        params.target_zone,
        nodepools.len()
    ));
    Ok(report.finish())
}

/// Returns the number of machines deleted from `pool`
async fn process_nodepool(
    ctx: &ChaosContext,
    resource_group: &str,
    params: &ZoneDownParams,
    node_rg: &str,
    pool: &NodePool,
    report: &mut ExperimentReport,
) -> AppResult<usize> {
    debug!("Processing node pool: {}", pool.name);

    let vmss_query = format!("[?contains(name, '{}')].name", pool.name);
    let vmss_names = match ctx
        .az
        .tsv([
            "vmss",
            "list",
            "--resource-group",
            node_rg,
            "--query",
            vmss_query.as_str(),
        ])
        .await
    {
        Ok(names) => names,
        Err(e) => {
            warn!("Failed to list VMSS for node pool '{}': {}", pool.name, e);
            return Ok(0);
        }
    };

    let Some(vmss_name) = vmss_names.first() else {
        report.note(format!("No VMSS found for node pool '{}', skipping", pool.name));
        return Ok(0);
    };
    debug!("Found VMSS '{}' for node pool '{}'", vmss_name, pool.name);

    let instance_query = format!(
        "[?zones[0]=='{}'].osProfile.computerName",
        params.target_zone
    );
    let machines = match ctx
        .az
        .tsv([
            "vmss",
            "list-instances",
            "--resource-group",
            node_rg,
            "--name",
            vmss_name.as_str(),
            "--query",
            instance_query.as_str(),
        ])
        .await
    {
        Ok(machines) => machines,
        Err(e) => {
            warn!("Failed to list instances for VMSS '{}': {}", vmss_name, e);
            return Ok(0);
        }
    };

    if machines.is_empty() {
        warn!(
            "No instances found in zone {} for node pool '{}'",
            params.target_zone, pool.name
        );
        return Ok(0);
    }

    info!(
        "Deleting {} instance(s) in zone {} for node pool '{}' from cluster '{}'",
        machines.len(),
        params.target_zone,
        pool.name,
        params.cluster_name
    );

    let mut args = vec![
        "aks".to_string(),
        "nodepool".to_string(),
        "delete-machines".to_string(),
        "--resource-group".to_string(),
        resource_group.to_string(),
        "--cluster-name".to_string(),
        params.cluster_name.clone(),
        "--nodepool-name".to_string(),
        pool.name.clone(),
        "--machine-names".to_string(),
    ];
    args.extend(machines.iter().cloned());

    ctx.az.run(args).await.map_err(|e| {
        error!("Failed to delete machines in node pool '{}'", pool.name);
        e
    })?;

    if pool.autoscaling() {
        report.note(format!(
            "Machines were deleted from nodepool '{}'. Auto-scaling is enabled, so new nodes \
             should be provisioned automatically within a few minutes.",
            pool.name
        ));
    } else {
        report.note(format!(
            "Machines were deleted from nodepool '{}'. Auto-scaling is disabled; consider \
             manually scaling the node pool to restore capacity.",
            pool.name
        ));
    }

    Ok(machines.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::exec::{CommandOutput, MockCommandRunner};
    use std::sync::Arc;

    fn params() -> ZoneDownParams {
        ZoneDownParams {
            cluster_name: "aks-test".to_string(),
            target_zone: "1".to_string(),
        }
    }

    fn expect_cluster(mock: &mut MockCommandRunner) {
        mock.expect_run()
            .withf(|inv| inv.starts_with(&["aks", "show"]))
            .returning(|_| Ok(CommandOutput::ok("MC_test_aks-test_westeurope\n")));
        mock.expect_run()
            .withf(|inv| inv.starts_with(&["aks", "nodepool", "list"]))
            .returning(|_| {
                Ok(CommandOutput::ok(
                    r#"[{"name": "system", "enableAutoScaling": true},
                        {"name": "user", "enableAutoScaling": false},
                        {"name": "spot", "enableAutoScaling": false}]"#,
                ))
            });
    }

    #[tokio::test]
    async fn test_zone_down_deletes_machines_per_pool() {
        let mut mock = MockCommandRunner::new();
        expect_cluster(&mut mock);

        mock.expect_run()
            .withf(|inv| inv.starts_with(&["vmss", "list", "--resource-group", "MC_test_aks-test_westeurope"]))
            .returning(|inv| {
                let query = inv.flag_value("--query").unwrap_or_default();
                if query.contains("'system'") {
                    Ok(CommandOutput::ok("aks-system-123-vmss\n"))
                } else if query.contains("'user'") {
                    Ok(CommandOutput::ok("aks-user-456-vmss\n"))
                } else {
                    Ok(CommandOutput::ok(""))
                }
            });
        mock.expect_run()
            .withf(|inv| inv.starts_with(&["vmss", "list-instances"]))
            .returning(|inv| {
                assert_eq!(
                    inv.flag_value("--query"),
                    Some("[?zones[0]=='1'].osProfile.computerName")
                );
                match inv.flag_value("--name") {
                    Some("aks-system-123-vmss") => Ok(CommandOutput::ok("aks-system-123-vmss000000\n")),
                    _ => Ok(CommandOutput::ok("aks-user-456-vmss000000\naks-user-456-vmss000003\n")),
                }
            });
        mock.expect_run()
            .withf(|inv| inv.starts_with(&["aks", "nodepool", "delete-machines"]))
            .times(2)
            .returning(|inv| {
                let machines = inv.flag_value("--machine-names").unwrap_or_default();
                assert!(machines.starts_with("aks-"));
                Ok(CommandOutput::ok(""))
            });

        let ctx = ChaosContext::new(Arc::new(mock), &Config::default());
        let report = aks_zone_down(&ctx, "test", &params()).await.unwrap();

        assert!(report.notes.iter().any(|n| n.contains("No VMSS found for node pool 'spot'")));
        assert!(report.notes.iter().any(|n| n.contains("Auto-scaling is enabled")));
        assert!(report.notes.iter().any(|n| n.contains("Auto-scaling is disabled")));
        assert!(report.notes.last().unwrap().starts_with("Deleted 3 node(s) in zone 1"));
    }

    #[tokio::test]
    async fn test_zone_down_delete_failure_aborts() {
        let mut mock = MockCommandRunner::new();
        expect_cluster(&mut mock);
        mock.expect_run()
            .withf(|inv| inv.starts_with(&["vmss", "list", "--resource-group"]))
            .returning(|_| Ok(CommandOutput::ok("aks-pool-vmss\n")));
        mock.expect_run()
            .withf(|inv| inv.starts_with(&["vmss", "list-instances"]))
            .returning(|_| Ok(CommandOutput::ok("aks-pool-vmss000001\n")));
        mock.expect_run()
            .withf(|inv| inv.starts_with(&["aks", "nodepool", "delete-machines"]))
            .times(1)
            .returning(|_| Ok(CommandOutput::failed(1, "OperationNotAllowed")));

        let ctx = ChaosContext::new(Arc::new(mock), &Config::default());
        let err = aks_zone_down(&ctx, "test", &params()).await.unwrap_err();
        assert!(err.stderr_contains("OperationNotAllowed"));
    }

    #[tokio::test]
    async fn test_zone_down_list_failure_skips_pool() {
        let mut mock = MockCommandRunner::new();
        expect_cluster(&mut mock);
        mock.expect_run()
            .withf(|inv| inv.starts_with(&["vmss", "list", "--resource-group"]))
            .returning(|_| Ok(CommandOutput::failed(1, "AuthorizationFailed")));

        let ctx = ChaosContext::new(Arc::new(mock), &Config::default());
        let report = aks_zone_down(&ctx, "test", &params()).await.unwrap();
        assert!(report.notes.last().unwrap().starts_with("Deleted 0 node(s)"));
    }
}
