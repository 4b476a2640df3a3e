//! replicantd — the replicant autoscaler daemon.
//!
//! Loads `replicant.toml`, connects to the cluster and runs the
//! reconciliation loop until interrupted.
//!
//! # Usage
//!
//! ```text
//! replicantd run --config replicant.toml
//! replicantd tick --selector app=web --namespace shop --dry-run
//! replicantd check --config replicant.toml
//! ```

mod overrides;

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use replicant_autoscale::Reconciler;
use replicant_core::Settings;
use replicant_kube::KubeCluster;

use crate::overrides::TargetArgs;

const DEFAULT_LOG_FILTER: &str =
    "info,replicantd=debug,replicant_autoscale=debug,replicant_metrics=debug,replicant_scheduler=debug";

#[derive(Parser)]
#[command(
    name = "replicantd",
    about = "replicant — horizontal autoscaler daemon",
    version,
    propagate_version = true
)]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reconciliation loop until Ctrl-C or SIGTERM.
    Run(TargetArgs),
    /// Run a single tick and print its outcome as JSON.
    Tick(TargetArgs),
    /// Validate the configuration and print the effective config.
    Check(TargetArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Tick(args) => tick(args).await,
        Command::Check(args) => check(args),
    }
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))?;
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
    Ok(())
}

async fn run(args: TargetArgs) -> anyhow::Result<()> {
    let (_, settings) = args.settings()?;
    let reconciler = connect(&args, &settings).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { reconciler.run(shutdown_rx).await });

    shutdown_signal().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    // The tick in flight, if any, finishes before the loop exits.
    handle.await?;
    info!("replicantd stopped");
    Ok(())
}

async fn tick(args: TargetArgs) -> anyhow::Result<()> {
    let (_, settings) = args.settings()?;
    let reconciler = connect(&args, &settings).await?;

    let outcome = reconciler.tick().await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

fn check(args: TargetArgs) -> anyhow::Result<()> {
    let (config, settings) = args.settings()?;
    info!(
        namespace = %settings.namespace,
        selector = %settings.selector,
        kinds = ?settings.kinds,
        period_secs = settings.period.as_secs_f64(),
        "configuration is valid"
    );
    print!("{}", config.to_toml_string()?);
    Ok(())
}

async fn connect(args: &TargetArgs, settings: &Settings) -> anyhow::Result<Reconciler> {
    let cluster = KubeCluster::connect(args.kubeconfig.as_deref())
        .await
        .context("connecting to the cluster")?;
    info!(namespace = %settings.namespace, "connected to cluster");
    Ok(Reconciler::new(settings, Arc::new(cluster)))
}

async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn subcommands_share_target_flags() {
        let cli = Cli::try_parse_from([
            "replicantd",
            "tick",
            "--selector",
            "app=web",
            "--namespace",
            "shop",
            "--dry-run",
            "--log-format",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.log_format, LogFormat::Json);
        match cli.command {
            Command::Tick(args) => {
                assert_eq!(args.selector.as_deref(), Some("app=web"));
                assert_eq!(args.namespace.as_deref(), Some("shop"));
                assert!(args.dry_run);
            }
            _ => panic!("expected tick"),
        }
    }

    #[test]
    fn log_format_defaults_to_text() {
        let cli = Cli::try_parse_from(["replicantd", "check"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Text);
        assert!(matches!(cli.command, Command::Check(_)));
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        assert!(Cli::try_parse_from(["replicantd", "run", "--log-format", "xml"]).is_err());
    }
}
