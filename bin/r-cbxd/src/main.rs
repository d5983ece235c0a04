//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the R-CBX daemon."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
mod simulation;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use r_cbx_common::{init_tracing, AppConfig, HubConfig};
use r_cbx_core::sim::SimStack;
use r_cbx_core::{ControlHub, DeviceService, HubError, HubSettings};
use r_cbx_metrics::{new_registry, spawn_http_server, DaemonMetrics, HubMetrics};
use r_cbx_net::UiServerBuilder;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::simulation::{populate, SimulationDriver};

#[derive(Debug, Parser)]
#[command(author, version, about = "R-CBX control box daemon", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "PORT", help = "Override the device service port")]
    port: Option<u16>,

    #[arg(long, value_name = "DIR", help = "Directory holding the device certificate")]
    cert_dir: Option<PathBuf>,

    #[arg(long, value_name = "ADDR", help = "Override the UI websocket listener")]
    ui_listen: Option<SocketAddr>,

    #[arg(long, help = "Run without the simulated device stack")]
    no_simulation: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/ctrlbox.toml"));

    let load_started = Instant::now();
    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Some(port) = cli.port {
        config.hub.device_port = port;
    }
    if let Some(dir) = cli.cert_dir {
        config.hub.cert_directory = dir;
    }
    if let Some(listen) = cli.ui_listen {
        config.ui.listen = listen;
    }
    if cli.no_simulation {
        config.simulation.enabled = false;
    }
    config.validate().context("invalid configuration after overrides")?;
    let load_duration = load_started.elapsed();

    init_tracing("r-cbxd", &config.logging)?;
    match &loaded.source {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found; using defaults"),
    }

    let registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(&registry)?;
    daemon_metrics.observe_config_load(load_duration.as_secs_f64());
    daemon_metrics.inc_start();
    let hub_metrics = HubMetrics::new(&registry)?;

    let metrics_server = if config.metrics.enabled {
        Some(spawn_http_server(registry.clone(), config.metrics.listen).await?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let outcome = run_daemon(config, hub_metrics).await;

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }

    if let Err(err) = outcome {
        if let Some(HubError::TrustDenied(ski)) = err.downcast_ref::<HubError>() {
            error!(ski = %ski, "remote denied trust; exiting");
            std::process::exit(1);
        }
        return Err(err);
    }
    Ok(())
}

fn qr_code_text(hub: &HubConfig, local_ski: &str) -> String {
    format!(
        "SHIP;SKI:{};ID:{};BRAND:{};TYPE:EnergyManagementSystem;MODEL:{};SERIAL:{};CAT:1;ENDSHIP;",
        local_ski,
        hub.alternate_identifier(),
        hub.device_brand,
        hub.device_model,
        hub.serial_number
    )
}

async fn run_daemon(config: AppConfig, hub_metrics: HubMetrics) -> Result<()> {
    let local_ski = Uuid::new_v4().simple().to_string();
    info!(
        ski = %local_ski,
        port = config.hub.device_port,
        cert_dir = %config.hub.cert_directory.display(),
        vendor = %config.hub.vendor_code,
        identifier = %config.hub.alternate_identifier(),
        heartbeat_timeout_secs = config.hub.heartbeat_timeout.as_secs(),
        "local device service configured"
    );

    let stack = Arc::new(SimStack::new(qr_code_text(&config.hub, &local_ski)));
    let hub = Arc::new(ControlHub::new(
        HubSettings::from(&config.hub),
        stack.clients(),
        stack.device_service(),
        hub_metrics,
    ));

    let ui_server = UiServerBuilder::new(config.ui.listen, hub.clone())
        .spawn()
        .await?;
    info!(address = %ui_server.local_addr(), "ui server listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut driver_task = if config.simulation.enabled {
        populate(&stack, &config.simulation);
        let driver = SimulationDriver::new(hub.clone(), stack.clone(), config.simulation.clone())?;
        Some(tokio::spawn(driver.run(shutdown_rx)))
    } else {
        warn!("simulation disabled and no device stack linked; no remotes will appear");
        None
    };

    info!("daemon running; waiting for termination signal");
    let outcome = match driver_task.as_mut() {
        Some(task) => tokio::select! {
            _ = signal::ctrl_c() => {
                info!("ctrl-c received; shutting down");
                Ok(())
            }
            joined = task => match joined {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(anyhow::Error::new(err)),
                Err(err) => Err(anyhow::Error::new(err).context("simulation driver panicked")),
            },
        },
        None => {
            signal::ctrl_c().await?;
            info!("ctrl-c received; shutting down");
            Ok(())
        }
    };

    let _ = shutdown_tx.send(true);
    if let Some(task) = driver_task {
        if !task.is_finished() {
            let _ = task.await;
        }
    }
    if !stack.service.is_shut_down() {
        stack.service.shutdown();
    }
    ui_server.shutdown().await?;
    outcome
}
