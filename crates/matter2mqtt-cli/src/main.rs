//! Command-line entry point for the matter2mqtt bridge.

mod shutdown;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use matter2mqtt_adapters::{MatterWsCommandChannel, MatterWsSource, MqttBus};
use matter2mqtt_core::config::{CONFIG_PATH_ENV, DEFAULT_CONFIG_FILE};
use matter2mqtt_core::{BridgeConfig, BridgeSupervisor, DynCommandChannel, VERSION};

/// Environment variable enabling JSON log output.
const LOG_JSON_ENV: &str = "MATTER2MQTT_LOG_JSON";

/// Bridge Matter on/off endpoints to MQTT.
#[derive(Parser, Debug)]
#[command(name = "matter2mqtt")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (default: $MATTER2MQTT_CONFIG or matter2mqtt.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,

    /// Debug logging for the bridge.
    #[arg(short, long)]
    verbose: bool,

    /// JSON log output.
    #[arg(long)]
    log_json: bool,
}

/// Pick the configuration file: the flag, then the environment, then the
/// default name in the working directory.
fn config_path(flag: Option<PathBuf>, env: Option<String>) -> PathBuf {
    flag.or_else(|| env.filter(|v| !v.trim().is_empty()).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

fn json_logging_requested(flag: bool) -> bool {
    flag || std::env::var(LOG_JSON_ENV)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false)
}

fn init_logging(verbose: bool, json: bool) {
    let default_directives = if verbose {
        "warn,matter2mqtt=debug"
    } else {
        "warn,matter2mqtt=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directives));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, json_logging_requested(args.log_json));

    let path = config_path(args.config, std::env::var(CONFIG_PATH_ENV).ok());
    let config = BridgeConfig::load(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    if args.check {
        info!("Configuration OK: {}", path.display());
        return Ok(());
    }

    info!("matter2mqtt {} starting", VERSION);
    info!(
        "MQTT broker {}:{}, Matter server {}, namespace '{}'",
        config.mqtt.host, config.mqtt.port, config.matter.url, config.bridge.topic_namespace
    );

    let config = Arc::new(config);
    let bus = Arc::new(MqttBus::new(config.mqtt.clone()));
    let source = Arc::new(MatterWsSource::new(&config.matter));
    let channel: DynCommandChannel = Arc::new(MatterWsCommandChannel::new(&config.matter));

    let supervisor = BridgeSupervisor::new(config, bus, source, Some(channel));
    supervisor
        .run_until(shutdown::shutdown_signal())
        .await
        .context("Bridge stopped with an error")?;

    info!("Shutdown complete");
    Ok(())
}
