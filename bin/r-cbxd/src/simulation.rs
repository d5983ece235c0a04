//! ---
//! ems_section: "11-simulation-test-harness"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Drives the simulated device stack against the hub."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::TimeDelta;
use r_cbx_common::{SimulationConfig, UseCase};
use r_cbx_core::sim::SimStack;
use r_cbx_core::{
    ControlHub, EventKind, HubError, LoadLimit, Measurement, PairingState, RemoteDevice,
};
use r_cbx_msg::RemoteService;
use rand::prelude::*;
use rand_distr::Normal;
use tokio::sync::watch;
use tracing::{debug, info};

const NOMINAL_MAX_W: f64 = 11_000.0;
const FAILSAFE_W: f64 = 4_200.0;
const FAILSAFE_SECS: i64 = 7_200;
const BASE_POWER_W: f64 = 3_000.0;

/// Create the configured devices in `stack` and seed their limit values.
pub fn populate(stack: &SimStack, config: &SimulationConfig) {
    for (ski, device) in &config.devices {
        let created = stack.add_device(
            ski,
            &device.device_type,
            &device.use_cases,
            usize::from(device.entities),
        );
        for use_case in &device.use_cases {
            let Some(client) = stack.load_control(*use_case) else {
                continue;
            };
            for entity in created.entities() {
                client.set_limit(entity.as_ref(), LoadLimit::new(false, NOMINAL_MAX_W, TimeDelta::zero()));
                client.set_failsafe_value(entity.as_ref(), FAILSAFE_W);
                client.set_failsafe_duration(entity.as_ref(), TimeDelta::seconds(FAILSAFE_SECS));
                client.set_nominal_max(entity.as_ref(), NOMINAL_MAX_W);
            }
        }
        debug!(ski = %ski, use_cases = ?device.use_cases, "simulated device created");
    }
}

/// Announces the simulated devices to the hub and feeds it telemetry.
pub struct SimulationDriver {
    hub: Arc<ControlHub>,
    stack: Arc<SimStack>,
    config: SimulationConfig,
    rng: StdRng,
    noise: Normal<f64>,
    counters: HashMap<String, f64>,
}

impl SimulationDriver {
    pub fn new(hub: Arc<ControlHub>, stack: Arc<SimStack>, config: SimulationConfig) -> Result<Self> {
        let noise = Normal::new(0.0, 1.0).map_err(|err| anyhow!("invalid noise distribution: {err}"))?;
        Ok(Self {
            hub,
            stack,
            rng: StdRng::seed_from_u64(config.random_seed),
            config,
            noise,
            counters: HashMap::new(),
        })
    }

    /// Publish discovery results and connect every configured device.
    pub fn bootstrap(&mut self) -> Result<(), HubError> {
        let services = self
            .config
            .devices
            .iter()
            .map(|(ski, device)| RemoteService {
                name: device.name.clone(),
                ski: ski.clone(),
                identifier: format!("{}-{}-{}", device.brand, device.model, ski),
                brand: device.brand.clone(),
                device_type: device.device_type.clone(),
                model: device.model.clone(),
            })
            .collect();
        self.hub.visible_services_updated(services);

        let skis: Vec<String> = self.config.devices.keys().cloned().collect();
        for ski in skis {
            self.connect(&ski)?;
        }
        Ok(())
    }

    fn connect(&mut self, ski: &str) -> Result<(), HubError> {
        let deny = self
            .config
            .devices
            .get(ski)
            .is_some_and(|device| device.deny_trust);
        self.hub.remote_connected(ski);
        if deny {
            self.hub
                .pairing_state_changed(ski, PairingState::RemoteDeniedTrust)?;
            return Ok(());
        }
        self.hub.pairing_state_changed(ski, PairingState::Trusted)?;
        for event in self.stack.support_events(ski) {
            self.hub.handle_device_event(event);
        }
        info!(ski, "simulated device connected");
        Ok(())
    }

    /// One simulation tick.
    pub fn step(&mut self, elapsed: TimeDelta) -> Result<(), HubError> {
        for ski in self.stack.service.take_registrations() {
            if self.config.devices.contains_key(&ski) && !self.hub.is_connected(&ski) {
                self.connect(&ski)?;
            }
        }

        for event in self.stack.take_write_echoes() {
            self.hub.handle_device_event(event);
        }

        let stack = self.stack.clone();
        for device in stack.devices() {
            let ski = device.ski();
            for use_case in device.supported() {
                let use_case = *use_case;
                let Some(client) = stack.monitoring(use_case) else {
                    continue;
                };
                for (index, entity) in device.entities().into_iter().enumerate() {
                    for measurement in Measurement::supported_by(use_case) {
                        let key = format!("{ski}/{index}/{use_case}/{measurement}");
                        if measurement.is_per_phase() {
                            let values = (0..3)
                                .map(|_| self.sample(&key, *measurement, elapsed))
                                .collect();
                            client.set_per_phase(entity.as_ref(), *measurement, values);
                        } else {
                            let value = self.sample(&key, *measurement, elapsed);
                            client.set_scalar(entity.as_ref(), *measurement, value);
                        }
                        if let Some(event) = stack.event(
                            &ski,
                            index,
                            use_case,
                            EventKind::Measurement(*measurement),
                        ) {
                            self.hub.handle_device_event(event);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn sample(&mut self, key: &str, measurement: Measurement, elapsed: TimeDelta) -> f64 {
        let noise = self.noise.sample(&mut self.rng);
        let hours = elapsed.num_milliseconds() as f64 / 3_600_000.0;
        match measurement {
            Measurement::PowerLimitationFactor => (0.95 + 0.05 * noise).clamp(0.0, 1.0),
            Measurement::Power => BASE_POWER_W + 150.0 * noise,
            Measurement::PowerPerPhase => BASE_POWER_W / 3.0 + 50.0 * noise,
            Measurement::EnergyFeedIn
            | Measurement::EnergyConsumed
            | Measurement::EnergyProduced => {
                let counter = self.counters.entry(key.to_owned()).or_insert(0.0);
                *counter += (BASE_POWER_W * hours).max(0.0);
                *counter
            }
            Measurement::CurrentPerPhase => 4.35 + 0.2 * noise,
            Measurement::VoltagePerPhase => 230.0 + 2.0 * noise,
            Measurement::Frequency => 50.0 + 0.01 * noise,
        }
    }

    /// Bootstrap, then tick until `shutdown` flips. Returns early with
    /// [`HubError::TrustDenied`] when the active target denies trust.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), HubError> {
        self.bootstrap()?;
        let period = self.config.tick_interval;
        let elapsed = TimeDelta::from_std(period).unwrap_or_else(|_| TimeDelta::seconds(5));
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => self.step(elapsed)?,
                _ = shutdown.changed() => {
                    debug!("simulation driver stopping");
                    return Ok(());
                }
            }
        }
    }
}
