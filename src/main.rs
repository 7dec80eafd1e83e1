use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use zonechaos::{
    chaos::{
        run_experiment, ChaosContext, Experiment, ExperimentPlan, Interrupt, PlanRunner,
        INTERRUPTED_EXIT_CODE,
    },
    cli::{Cli, Commands},
    config::Config,
    exec::{ensure_tool, CommandRunner, ProcessRunner},
    k8s::{connection_instructions, render_manifests, DeploymentManager, Kubectl},
};

fn init_tracing(cli: &Cli, config: &Config) {
    let default_filter = match cli.verbose {
        0 => config.log_filter.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(cli.log_json.then(|| fmt::layer().json()))
        .with((!cli.log_json).then(|| fmt::layer()))
        .init();
}

/// Context for commands that inject faults; Ctrl-C stops them after cleanup
fn chaos_context(runner: Arc<dyn CommandRunner>, config: &Config) -> ChaosContext {
    let interrupt = Interrupt::new();
    interrupt.listen_for_ctrl_c();
    ChaosContext::new(runner, config).with_interrupt(interrupt)
}

async fn ensure_logged_in(ctx: &ChaosContext) -> Result<()> {
    if !ctx.az.logged_in().await? {
        anyhow::bail!("the Azure CLI is not logged in, run `az login` first");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    init_tracing(&cli, &config);

    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner);

    match cli.command {
        Commands::Deploy(args) => {
            let app = args.to_app(&config);
            app.validate()?;
            if args.dry_run {
                print!("{}", render_manifests(&app)?);
                return Ok(ExitCode::SUCCESS);
            }

            ensure_tool(&config.kubectl_bin)?;
            let manager = DeploymentManager::new(Kubectl::new(runner, &config.kubectl_bin));
            let report = manager
                .deploy(&app, &args.wait_options(&config))
                .await
                .with_context(|| format!("failed to deploy {}/{}", app.namespace, app.name))?;
            print!("{}", connection_instructions(&report));
        }
        Commands::Status(args) => {
            ensure_tool(&config.kubectl_bin)?;
            let app = args.to_app(&config);
            let manager = DeploymentManager::new(Kubectl::new(runner, &config.kubectl_bin));
            let report = manager.status(&app).await?;
            print!("{}", connection_instructions(&report));
            if !report.is_ready() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Teardown {
            app,
            delete_namespace,
        } => {
            ensure_tool(&config.kubectl_bin)?;
            let app = app.to_app(&config);
            let manager = DeploymentManager::new(Kubectl::new(runner, &config.kubectl_bin));
            manager.teardown(&app, delete_namespace).await?;
            println!("Removed {} from namespace {}.", app.name, app.namespace);
        }
        Commands::Run {
            plan,
            resource_group,
        } => {
            let mut plan = ExperimentPlan::load(&plan)
                .with_context(|| format!("failed to load plan {}", plan.display()))?;
            if let Some(rg) = resource_group {
                plan.resource_group = rg;
            }
            ensure_tool(&config.az_bin)?;
            let ctx = chaos_context(runner, &config);
            ensure_logged_in(&ctx).await?;

            tracing::info!(
                resource_group = %plan.resource_group,
                experiments = plan.enabled_count(),
                "Starting experiment plan"
            );
            let summary = PlanRunner::new(ctx).run(&plan).await;
            println!(
                "{} succeeded, {} failed, {} skipped",
                summary.succeeded(),
                summary.failed(),
                summary.skipped()
            );
            if summary.interrupted {
                return Ok(ExitCode::from(INTERRUPTED_EXIT_CODE));
            }
            if !summary.is_success() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Experiment {
            resource_group,
            kind,
        } => {
            let experiment = Experiment::from(kind);
            experiment.validate()?;
            ensure_tool(&config.az_bin)?;

            let ctx = chaos_context(runner, &config);
            ensure_logged_in(&ctx).await?;
            let report = run_experiment(&ctx, &resource_group, &experiment)
                .await
                .with_context(|| format!("experiment {} failed", experiment.kind()))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.interrupted || ctx.interrupt.is_triggered() {
                return Ok(ExitCode::from(INTERRUPTED_EXIT_CODE));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
