//! CloudLink device daemon - main entry point
//!
//! Loads the device configuration, runs the provisioning handshake, then
//! keeps the MQTT session alive: cooperative polling, a periodic heartbeat
//! event, and re-initialization with an outer pause when the session drops.

use clap::{Parser, Subcommand};
use cloudlink::config::DeviceConfig;
use cloudlink::observability::init_default_logging;
use cloudlink::session::ConnectionStatus;
use cloudlink::{DeviceCallbacks, DeviceClient};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tokio::{signal, time};
use tracing::{error, info, warn};

/// Pause between poll steps; keepalive traffic is serviced at this cadence.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Pause before re-running provisioning after the session drops.
const REINIT_DELAY: Duration = Duration::from_secs(5);

/// CloudLink device provisioning and session daemon
#[derive(Parser)]
#[command(name = "cloudlinkd")]
#[command(about = "CloudLink device provisioning and session daemon")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", default_value = "cloudlink.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the device and keep the session alive
    Run,
    /// Validate configuration
    Config {
        /// Show the parsed configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting cloudlinkd v{}", env!("CARGO_PKG_VERSION"));

    let config = match DeviceConfig::load_from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %cli.config.display(), error = %e, "failed to load configuration");
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_device(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!(error = %e, "command failed");
        process::exit(1);
    }

    info!("shutdown complete");
}

fn handle_config_command(config: &DeviceConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    // Auth material is referenced by path, never inlined, so the dump is
    // safe to print.
    if show {
        println!("{}", toml::to_string_pretty(config)?);
    } else {
        println!("configuration OK");
    }
    Ok(())
}

fn daemon_callbacks() -> DeviceCallbacks {
    DeviceCallbacks {
        on_status: Some(Box::new(|status| match status {
            ConnectionStatus::Connected => info!("device connected"),
            ConnectionStatus::Disconnected => warn!("device disconnected"),
        })),
        on_command: Some(Box::new(|data| {
            info!(%data, "command received");
        })),
        on_ota: Some(Box::new(|data| {
            info!(%data, "OTA request received (not handled by the daemon)");
        })),
        on_event: Some(Box::new(|ct, data| {
            info!(ct, %data, "unhandled control event");
        })),
    }
}

/// Minimal telemetry stand-in: a heartbeat with uptime.
fn heartbeat_event(duid: &str, uptime: Duration) -> String {
    serde_json::json!({
        "mid": uuid::Uuid::new_v4(),
        "dt": chrono::Utc::now().to_rfc3339(),
        "duid": duid,
        "d": [{ "uptime_s": uptime.as_secs() }],
    })
    .to_string()
}

async fn run_device(config: DeviceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let heartbeat_interval = Duration::from_secs(config.session.heartbeat_interval_secs.max(1));
    let duid = config.device.duid.clone();
    let mut client = DeviceClient::with_defaults(config, daemon_callbacks())?;

    client.initialize().await?;

    let started = time::Instant::now();
    let mut heartbeat = time::interval(heartbeat_interval);
    heartbeat.tick().await; // first tick completes immediately, skip it

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            _ = heartbeat.tick() => {
                let event = heartbeat_event(&duid, started.elapsed());
                if let Err(e) = client.send_message(event.as_bytes()).await {
                    warn!(error = %e, "heartbeat publish failed");
                }
            }
            _ = time::sleep(POLL_INTERVAL) => {
                client.poll_once().await;

                if !client.is_connected() {
                    warn!("session is down; re-initializing after a pause");
                    time::sleep(REINIT_DELAY).await;
                    if let Err(e) = client.initialize().await {
                        error!(error = %e, "re-initialization failed; will retry");
                    }
                }
            }
        }
    }

    client.disconnect().await;
    Ok(())
}
