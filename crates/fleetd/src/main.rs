//! fleetd — the fleet controller daemon.
//!
//! Loads the environment's TOML config, wires the controller to the
//! provider, serves the webhook, and runs until SIGINT or SIGTERM. Startup
//! failures and handler faults exit non-zero after teardown.
//!
//! # Usage
//!
//! ```text
//! fleetd --environment production
//! fleetd --environment development --bind 127.0.0.1:8080 --parameter-file counts.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fleet_controller::Controller;
use fleet_core::FleetConfig;
use fleet_provider::{CloudProvider, SimulatedProvider};

const DEFAULT_LOG_FILTER: &str = "info,fleetd=debug,fleet=debug";

#[derive(Parser, Debug)]
#[command(name = "fleetd", about = "Spider and scraper fleet controller")]
struct Cli {
    /// Deployment environment. Selects `env/<environment>.toml` and tags
    /// every metric.
    #[arg(long, value_enum)]
    environment: Environment,

    /// Config file, overriding the per-environment default.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Webhook listen address, overriding `webhook.bind`.
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// TOML file of desired counts, re-read on every reconcile.
    #[arg(long)]
    parameter_file: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Environment {
    Production,
    Development,
}

impl Environment {
    fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Development => "development",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = Arc::new(load_config(&cli)?);
    info!(
        environment = %config.environment,
        bind = %config.webhook.bind,
        "fleet controller starting"
    );

    let mut provider = SimulatedProvider::from_config(&config);
    if let Some(path) = &cli.parameter_file {
        info!(path = %path.display(), "reading desired counts from parameter file");
        provider = provider.with_parameter_file(path);
    }
    let provider: Arc<dyn CloudProvider> = Arc::new(provider);

    // ── Shutdown signal ────────────────────────────────────────

    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
        let _ = shutdown_tx.send(true);
    });

    Controller::new(config, provider)
        .run(shutdown_rx)
        .await
        .map_err(|e| {
            let stage = if e.is_startup() { "startup failed" } else { "controller fault" };
            anyhow::Error::new(e).context(stage)
        })?;

    info!("fleet controller stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("env/{}.toml", cli.environment.as_str())))
}

/// Load the config file and apply command-line overrides.
fn load_config(cli: &Cli) -> anyhow::Result<FleetConfig> {
    let path = config_path(cli);
    let mut config = FleetConfig::from_file(&path)
        .with_context(|| format!("loading config {}", path.display()))?;

    config.environment = cli.environment.as_str().to_string();
    if let Some(bind) = cli.bind {
        config.webhook.bind = bind;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
environment = "staging"
notifier_rule_name = "fleet-instance-state-change"

[webhook]
bind = "0.0.0.0:80"

[components.spider]
count_parameter_name = "/fleet/spider/count"
launch_template_id = "lt-spider"
queue_alarm_name = "spider-queue-not-empty"

[components.scraper]
count_parameter_name = "/fleet/scraper/count"
launch_template_id = "lt-scraper"
queue_alarm_name = "scraper-queue-not-empty"
"#;

    #[test]
    fn environment_is_required() {
        let err = Cli::try_parse_from(["fleetd"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn development_selects_its_config() {
        let cli = Cli::try_parse_from(["fleetd", "--environment", "development"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Text);
        assert_eq!(config_path(&cli), PathBuf::from("env/development.toml"));
    }

    #[test]
    fn environment_selects_config_file() {
        let cli = Cli::try_parse_from(["fleetd", "--environment", "production"]).unwrap();
        assert_eq!(config_path(&cli), PathBuf::from("env/production.toml"));
    }

    #[test]
    fn unknown_environment_is_rejected() {
        assert!(Cli::try_parse_from(["fleetd", "--environment", "staging"]).is_err());
    }

    #[test]
    fn command_line_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.toml");
        std::fs::write(&path, CONFIG).unwrap();

        let cli = Cli::try_parse_from([
            "fleetd",
            "--environment",
            "production",
            "--config",
            path.to_str().unwrap(),
            "--bind",
            "127.0.0.1:8080",
            "--log-format",
            "json",
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.environment, "production");
        assert_eq!(config.webhook.bind, SocketAddr::from(([127, 0, 0, 1], 8080)));
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn missing_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let cli =
            Cli::try_parse_from(["fleetd", "--environment", "development", "--config", path.to_str().unwrap()]).unwrap();
        let err = load_config(&cli).unwrap_err();
        assert!(err.to_string().contains("loading config"));
    }

    #[test]
    fn shipped_configs_are_valid() {
        let root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../env");
        for env in ["production", "development"] {
            FleetConfig::from_file(&root.join(format!("{env}.toml"))).unwrap();
        }
    }
}
