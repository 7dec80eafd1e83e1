//! Block network access between two subnets with a temporary NSG deny rule

use tracing::{debug, error, info, instrument, warn};

use super::context::ChaosContext;
use super::types::{BlockNetworkParams, ExperimentKind, ExperimentReport};
use crate::error::{AppError, AppResult};

/// The NSG the deny rule goes into
#[derive(Debug, Clone, PartialEq)]
struct NsgHandle {
    name: String,
    /// Created by this experiment and removed again afterwards
    created: bool,
}

/// Block traffic from `subnet_source` to `subnet_dest` for the configured window
#[instrument(skip(ctx, params), fields(vnet = %params.vnet))]
pub async fn block_network_access(
    ctx: &ChaosContext,
    resource_group: &str,
    params: &BlockNetworkParams,
) -> AppResult<ExperimentReport> {
    let mut report = ExperimentReport::start(ExperimentKind::BlockNetwork);
    info!(
        "Creating NSG rule to block traffic between {} and {} for {} seconds",
        params.subnet_source, params.subnet_dest, params.duration_seconds
    );

    let nsg = resolve_nsg(ctx, resource_group, params, &mut report).await?;

    let blocked = block_and_hold(ctx, resource_group, params, &nsg, &mut report).await;
    let released = if nsg.created {
        release_nsg(ctx, resource_group, params, &nsg, &mut report).await
    } else {
        Ok(())
    };

    blocked?;
    released?;
    report.note("Network blocking finished, NSG rule deleted");
    Ok(report.finish())
}

fn subnet_show<'a>(resource_group: &'a str, vnet: &'a str, subnet: &'a str) -> [&'a str; 10] {
    [
        "network",
        "vnet",
        "subnet",
        "show",
        "--resource-group",
        resource_group,
        "--vnet-name",
        vnet,
        "--name",
        subnet,
    ]
}

/// Find the NSG on the source subnet, creating and associating one if needed
async fn resolve_nsg(
    ctx: &ChaosContext,
    resource_group: &str,
    params: &BlockNetworkParams,
    report: &mut ExperimentReport,
) -> AppResult<NsgHandle> {
    let output = ctx
        .az
        .try_run(
            subnet_show(resource_group, &params.vnet, &params.subnet_source)
                .into_iter()
                .chain(["--query", "networkSecurityGroup.id", "-o", "tsv"]),
        )
        .await?;

    let nsg_id = output.stdout_trimmed();
    if output.success() && !nsg_id.is_empty() {
        let name = nsg_id.rsplit('/').next().unwrap_or(nsg_id).to_string();
        debug!(nsg = %name, "Found existing NSG on source subnet");
        return Ok(NsgHandle {
            name,
            created: false,
        });
    }

    let name = format!("{}-chaostest-nsg", params.subnet_source);
    report.note(format!(
        "No NSG associated with subnet {}, creating {}",
        params.subnet_source, name
    ));
    ctx.az
        .run([
            "network",
            "nsg",
            "create",
            "--resource-group",
            resource_group,
            "--name",
            name.as_str(),
        ])
        .await?;

    let handle = NsgHandle {
        name: name.clone(),
        created: true,
    };

    debug!(nsg = %name, "Associating new NSG with subnet {}", params.subnet_source);
    let associated = ctx
        .az
        .run([
            "network",
            "vnet",
            "subnet",
            "update",
            "--resource-group",
            resource_group,
            "--vnet-name",
            params.vnet.as_str(),
            "--name",
            params.subnet_source.as_str(),
            "--network-security-group",
            name.as_str(),
        ])
        .await;

    if let Err(e) = associated {
        error!("Failed to associate NSG with subnet {}: {}", params.subnet_source, e);
        if let Err(cleanup) = delete_nsg(ctx, resource_group, &name).await {
            warn!("Failed to remove NSG {}: {}", name, cleanup);
        }
        return Err(e);
    }

    Ok(handle)
}

async fn subnet_prefix(
    ctx: &ChaosContext,
    resource_group: &str,
    vnet: &str,
    subnet: &str,
) -> AppResult<String> {
    let lines = ctx
        .az
        .tsv(
            subnet_show(resource_group, vnet, subnet)
                .into_iter()
                .chain(["--query", "addressPrefix || addressPrefixes[0]"]),
        )
        .await?;
    lines
        .into_iter()
        .next()
        .ok_or_else(|| AppError::precondition(format!("subnet {} has no address prefix", subnet)))
}

/// Create the deny rule, hold it, then delete it again
async fn block_and_hold(
    ctx: &ChaosContext,
    resource_group: &str,
    params: &BlockNetworkParams,
    nsg: &NsgHandle,
    report: &mut ExperimentReport,
) -> AppResult<()> {
    let source_prefix =
        subnet_prefix(ctx, resource_group, &params.vnet, &params.subnet_source).await?;
    let dest_prefix = subnet_prefix(ctx, resource_group, &params.vnet, &params.subnet_dest).await?;
    debug!(
        "Subnet {} prefix: {}, subnet {} prefix: {}",
        params.subnet_source, source_prefix, params.subnet_dest, dest_prefix
    );

    let rule = params.rule_name();
    info!("Adding temporary rule {} to NSG {}", rule, nsg.name);
    ctx.az
        .run([
            "network",
            "nsg",
            "rule",
            "create",
            "--resource-group",
            resource_group,
            "--nsg-name",
            nsg.name.as_str(),
            "--name",
            rule.as_str(),
            "--priority",
            "100",
            "--direction",
            "Inbound",
            "--access",
            "Deny",
            "--protocol",
            "*",
            "--source-address-prefixes",
            source_prefix.as_str(),
            "--destination-address-prefixes",
            dest_prefix.as_str(),
            "--destination-port-ranges",
            "*",
        ])
        .await?;
    report.note(format!(
        "Traffic from {} to {} blocked by rule {}",
        source_prefix, dest_prefix, rule
    ));

    info!("Network blocked for {} seconds starting now", params.duration_seconds);
    if ctx.hold(params.duration()).await {
        report.mark_interrupted("Block window interrupted");
    }

    ctx.az
        .run([
            "network",
            "nsg",
            "rule",
            "delete",
            "--resource-group",
            resource_group,
            "--nsg-name",
            nsg.name.as_str(),
            "--name",
            rule.as_str(),
        ])
        .await
        .map_err(|e| AppError::cleanup(format!("NSG rule {}/{}", nsg.name, rule), e))?;
    Ok(())
}

async fn delete_nsg(ctx: &ChaosContext, resource_group: &str, name: &str) -> AppResult<()> {
    ctx.az
        .run([
            "network",
            "nsg",
            "delete",
            "--resource-group",
            resource_group,
            "--name",
            name,
        ])
        .await?;
    Ok(())
}

/// Detach and delete an NSG this experiment created
async fn release_nsg(
    ctx: &ChaosContext,
    resource_group: &str,
    params: &BlockNetworkParams,
    nsg: &NsgHandle,
    report: &mut ExperimentReport,
) -> AppResult<()> {
    debug!(
        "Cleaning up: deleting NSG {} and disassociating it from subnet {}",
        nsg.name, params.subnet_source
    );
    ctx.az
        .run([
            "network",
            "vnet",
            "subnet",
            "update",
            "--resource-group",
            resource_group,
            "--vnet-name",
            params.vnet.as_str(),
            "--name",
            params.subnet_source.as_str(),
            "--remove",
            "networkSecurityGroup",
        ])
        .await
        .map_err(|e| {
            AppError::cleanup(
                format!("NSG {} on subnet {}", nsg.name, params.subnet_source),
                e,
            )
        })?;
    delete_nsg(ctx, resource_group, &nsg.name)
        .await
        .map_err(|e| AppError::cleanup(format!("NSG {}", nsg.name), e))?;
    report.note(format!("Temporary NSG {} removed", nsg.name));
    Ok(())
}
