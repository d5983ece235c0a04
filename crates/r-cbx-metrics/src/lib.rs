//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Metrics collection and export utilities."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder, TEXT_FORMAT,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across the hub.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Bind `addr` and serve the registry at `/metrics`.
pub async fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get(move || metrics_handler(registry.clone())),
    );

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    let local_addr = listener
        .local_addr()
        .context("metrics listener has no local address")?;

    info!(address = %local_addr, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: local_addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain"),
                )],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Bound address; differs from the requested one when port 0 was used.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    starts_total: IntCounter,
    config_load_seconds: Histogram,
}

impl DaemonMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "r_cbxd_starts_total",
            "Total number of times the control box daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 12)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "r_cbxd_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        Ok(Self {
            starts_total,
            config_load_seconds,
        })
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }
}

/// Counters for the session/state synchronisation core.
#[derive(Clone, Debug)]
pub struct HubMetrics {
    device_events: IntCounterVec,
    device_writes: IntCounterVec,
    ui_pushes: IntCounterVec,
    ui_commands: IntCounterVec,
    connected_sessions: IntGauge,
}

impl HubMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let device_events = IntCounterVec::new(
            Opts::new(
                "r_cbx_device_events_total",
                "Inbound device events by use case and routing outcome",
            ),
            &["use_case", "outcome"],
        )?;
        registry.register(Box::new(device_events.clone()))?;

        let device_writes = IntCounterVec::new(
            Opts::new(
                "r_cbx_device_writes_total",
                "Outbound device writes by use case and result",
            ),
            &["use_case", "result"],
        )?;
        registry.register(Box::new(device_writes.clone()))?;

        let ui_pushes = IntCounterVec::new(
            Opts::new(
                "r_cbx_ui_pushes_total",
                "Messages pushed to the UI client by result",
            ),
            &["result"],
        )?;
        registry.register(Box::new(ui_pushes.clone()))?;

        let ui_commands = IntCounterVec::new(
            Opts::new(
                "r_cbx_ui_commands_total",
                "Frames received from the UI client by decode result",
            ),
            &["result"],
        )?;
        registry.register(Box::new(ui_commands.clone()))?;

        let connected_sessions = IntGauge::with_opts(Opts::new(
            "r_cbx_connected_sessions",
            "Remote device sessions currently connected",
        ))?;
        registry.register(Box::new(connected_sessions.clone()))?;

        Ok(Self {
            device_events,
            device_writes,
            ui_pushes,
            ui_commands,
            connected_sessions,
        })
    }

    /// Metrics bound to a private registry, for tests and embedded use.
    pub fn unregistered() -> Self {
        Self::new(&Registry::new()).expect("fresh registry accepts hub metrics")
    }

    pub fn record_event(&self, use_case: &str, outcome: &str) {
        self.device_events
            .with_label_values(&[use_case, outcome])
            .inc();
    }

    pub fn record_write(&self, use_case: &str, ok: bool) {
        let result = if ok { "sent" } else { "failed" };
        self.device_writes
            .with_label_values(&[use_case, result])
            .inc();
    }

    pub fn record_push(&self, delivered: bool) {
        let result = if delivered { "delivered" } else { "dropped" };
        self.ui_pushes.with_label_values(&[result]).inc();
    }

    pub fn record_command(&self, decoded: bool) {
        let result = if decoded { "decoded" } else { "malformed" };
        self.ui_commands.with_label_values(&[result]).inc();
    }

    pub fn set_connected_sessions(&self, count: usize) {
        self.connected_sessions.set(count as i64);
    }
}

pub use prometheus;
