//! Fail a zone-redundant PostgreSQL Flexible Server over to its standby

use tracing::{debug, info, instrument};

use super::context::ChaosContext;
use super::types::{ExperimentKind, ExperimentReport, PostgresFailoverParams};
use crate::azure::FlexibleServer;
use crate::error::{AppError, AppResult};

async fn show_server(
    ctx: &ChaosContext,
    resource_group: &str,
    database_name: &str,
) -> AppResult<FlexibleServer> {
    ctx.az
        .json([
            "postgres",
            "flexible-server",
            "show",
            "--resource-group",
            resource_group,
            "--name",
            database_name,
        ])
        .await
}

#[instrument(skip(ctx, params), fields(database = %params.database_name, forced = params.forced_failover))]
pub async fn postgres_failover(
    ctx: &ChaosContext,
    resource_group: &str,
    params: &PostgresFailoverParams,
) -> AppResult<ExperimentReport> {
    let mut report = ExperimentReport::start(ExperimentKind::PostgresFailover);
    let database = params.database_name.as_str();
    info!(
        "Starting PostgreSQL failover for database {} in resource group {} (forced: {})",
        database, resource_group, params.forced_failover
    );

    let server = show_server(ctx, resource_group, database).await?;
    if !server.is_zone_redundant() {
        return Err(AppError::precondition(format!(
            "database '{}' is not configured for zone-redundant high availability",
            database
        )));
    }
    let zone_before = server.zone().to_string();
    report.note(format!(
        "Database '{}' is HA enabled in zone {}",
        database, zone_before
    ));

    let mode = if params.forced_failover { "Forced" } else { "Planned" };
    debug!(mode, "Restarting server with failover");
    ctx.az
        .run([
            "postgres",
            "flexible-server",
            "restart",
            "--resource-group",
            resource_group,
            "--name",
            database,
            "--failover",
            mode,
        ])
        .await?;

    let server = show_server(ctx, resource_group, database).await?;
    report.note(format!(
        "Database '{}' failover completed, zone {} -> {}",
        database,
        zone_before,
        server.zone()
    ));
    Ok(report.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::exec::{CommandOutput, MockCommandRunner};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn params(forced: bool) -> PostgresFailoverParams {
        PostgresFailoverParams {
            database_name: "test-pgdb".to_string(),
            forced_failover: forced,
        }
    }

    #[tokio::test]
    async fn test_failover_reports_zone_change() {
        let shows = Arc::new(AtomicUsize::new(0));
        let counter = shows.clone();
        let mut mock = MockCommandRunner::new();
        mock.expect_run()
            .withf(|inv| inv.starts_with(&["postgres", "flexible-server", "show"]))
            .times(2)
            .returning(move |_| {
                let zone = if counter.fetch_add(1, Ordering::SeqCst) == 0 { "1" } else { "2" };
                Ok(CommandOutput::ok(format!(
                    r#"{{"name": "test-pgdb", "availabilityZone": "{}",
                        "highAvailability": {{"mode": "ZoneRedundant", "state": "Healthy"}}}}"#,
                    zone
                )))
            });
        mock.expect_run()
            .withf(|inv| {
                inv.starts_with(&["postgres", "flexible-server", "restart"])
                    && inv.flag_value("--failover") == Some("Planned")
            })
            .times(1)
            .returning(|_| Ok(CommandOutput::ok("")));

        let ctx = ChaosContext::new(Arc::new(mock), &Config::default());
        let report = postgres_failover(&ctx, "test", &params(false)).await.unwrap();

        assert_eq!(report.kind, ExperimentKind::PostgresFailover);
        assert!(report.notes.last().unwrap().contains("zone 1 -> 2"));
        assert!(report.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_failover_requires_zone_redundant_ha() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run()
            .withf(|inv| inv.starts_with(&["postgres", "flexible-server", "show"]))
            .times(1)
            .returning(|_| {
                Ok(CommandOutput::ok(
                    r#"{"name": "test-pgdb", "availabilityZone": "1", "highAvailability": {"mode": "Disabled"}}"#,
                ))
            });
        mock.expect_run()
            .withf(|inv| inv.starts_with(&["postgres", "flexible-server", "restart"]))
            .times(0);

        let ctx = ChaosContext::new(Arc::new(mock), &Config::default());
        let err = postgres_failover(&ctx, "test", &params(true)).await.unwrap_err();
        assert!(matches!(err, AppError::Precondition(_)));
    }

    #[tokio::test]
    async fn test_failover_restart_failure_propagates() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run()
            .withf(|inv| inv.starts_with(&["postgres", "flexible-server", "show"]))
            .times(1)
            .returning(|_| {
                Ok(CommandOutput::ok(
                    r#"{"name": "test-pgdb", "highAvailability": {"mode": "ZoneRedundant"}}"#,
                ))
            });
        mock.expect_run()
            .withf(|inv| inv.flag_value("--failover") == Some("Forced"))
            .times(1)
            .returning(|_| Ok(CommandOutput::failed(1, "ServerIsBusy")));

        let ctx = ChaosContext::new(Arc::new(mock), &Config::default());
        let err = postgres_failover(&ctx, "test", &params(true)).await.unwrap_err();
        assert!(err.stderr_contains("ServerIsBusy"));
    }
}
