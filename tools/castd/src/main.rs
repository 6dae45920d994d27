//! castd, the screencast recording D-Bus service.
//!
//! Hosts `org.gnome.Shell.Screencast` on the session bus and records the
//! screen through the compositor's screencast API and a GStreamer pipeline.
//! The daemon is bus-activated: it exits after an idle period with no
//! recording, and stays alive while any recording runs.

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing::info;
use zbus::ConnectionBuilder;

use castd_common::config::AppConfig;
use castd_common::logging;

mod hold;
mod registry;
mod service;

use hold::ServiceHold;
use registry::Registry;
use service::ScreencastService;

/// Well-known D-Bus name of the recording service.
const DBUS_NAME: &str = "org.gnome.Shell.Screencast";
/// Object path the service is served at.
const DBUS_PATH: &str = "/org/gnome/Shell/Screencast";

#[derive(Parser)]
#[command(
    name = "castd",
    about = "Screencast recording D-Bus service",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Exit after this many seconds without an active recording
    #[arg(long, default_value = "120")]
    idle_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load();
    let mut logging_config = config.logging.clone();
    if cli.verbose {
        logging_config.level = "debug".to_string();
    }
    logging::init_logging(&logging_config);

    let connection = ConnectionBuilder::session()?
        .name(DBUS_NAME)?
        .build()
        .await?;
    info!(name = DBUS_NAME, "Connected to D-Bus session bus");

    let hold = ServiceHold::new();
    let registry = Registry::new(connection.clone(), hold.clone());
    connection
        .object_server()
        .at(DBUS_PATH, ScreencastService::new(registry))
        .await?;
    info!("Screencast service running");

    tokio::select! {
        _ = signal::ctrl_c() => info!("Shutdown requested"),
        _ = hold.idle_expired(Duration::from_secs(cli.idle_timeout)) => {
            info!("Idle timeout reached, exiting");
        }
    }

    Ok(())
}
