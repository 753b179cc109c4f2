//! The instrument daemon binary: loads a TOML configuration file,
//! registers the in-tree drivers, scans and opens each configured
//! instance, and runs one session until interrupted.

mod config;
mod session;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use instrument_api::driver::{DeviceInfo, DriverHandle, ScanOptions};
use instrument_api::packet::DataPacket;
use instrument_api::registry;

use session::Session;

#[derive(Debug, Parser)]
#[command(name = "instrd", about = "Instrument driver daemon")]
struct Cli {
    /// Path to the daemon's TOML configuration file.
    #[arg(short, long, default_value = "instrd.toml")]
    config: PathBuf,
}

fn install_drivers() {
    registry::register(Arc::new(scpi_scope::ScpiScopeDriver::new()));
    registry::register(Arc::new(load_framed::LoadFramedDriver::new()));
}

/// Builds a `FeedSink` that logs the packet stream for one device at
/// `debug` (wire-level frequency; §11 reserves `info`/`warn` for
/// lifecycle events, not per-sample traffic).
fn logging_sink(conn_label: String) -> instrument_api::packet::FeedSink {
    Arc::new(move |packet: DataPacket| match &packet {
        DataPacket::Header => info!(conn = %conn_label, "df-header"),
        DataPacket::End => info!(conn = %conn_label, "df-end"),
        DataPacket::Meta(meta) => {
            tracing::debug!(conn = %conn_label, key = ?meta.key, value = ?meta.value, "df-meta")
        }
        other => tracing::trace!(conn = %conn_label, ?other, "df-packet"),
    })
}

fn device_label(info: &DeviceInfo) -> String {
    match &info.conn {
        Some(conn) => format!("{conn:?}"),
        None => format!("{:?}", info.id),
    }
}

async fn start_configured_instance(
    session: &mut Session,
    driver: DriverHandle,
    instance: &config::DriverInstance,
) {
    if let Err(e) = driver.init().await {
        error!(driver = instance.name, ?e, "driver init failed");
        return;
    }

    let options = ScanOptions { conn: instance.conn.clone(), serialcomm: instance.serialcomm.clone() };
    let ids = match driver.scan(options).await {
        Ok(ids) => ids,
        Err(e) => {
            error!(driver = instance.name, ?e, "scan failed");
            return;
        }
    };

    let infos = driver.dev_list();
    for id in ids {
        let label = infos
            .iter()
            .find(|d| d.id == id)
            .map(device_label)
            .unwrap_or_else(|| format!("{id:?}"));

        let sink = logging_sink(label.clone());
        if let Err(e) = session.start_device(Arc::clone(&driver), id, sink).await {
            error!(driver = instance.name, device = id.0, ?e, "failed to start device");
        } else {
            info!(driver = instance.name, device = id.0, conn = %label, "device acquisition started");
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    install_drivers();

    let config = match config::Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %cli.config.display(), ?e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let mut session = Session::new("instrd");

    for instance in &config.instances {
        match registry::lookup(&instance.name) {
            Some(driver) => start_configured_instance(&mut session, driver, instance).await,
            None => warn!(driver = instance.name, "no such driver registered, skipping"),
        }
    }

    tokio::select! {
        _ = session.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("received interrupt, shutting down");
        }
    }

    session.stop().await;
    for driver in registry::all() {
        let _ = driver.cleanup().await;
    }
}
