//! The assembled engine: registries, serial links, effects and dispatcher
//! behind one registration and status API.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use giftlink_transport::{LinkSnapshot, LinkStatus, PortOpener, SerialLinkManager};

use crate::action::default_action;
use crate::config::Config;
use crate::dispatch::{DispatchCounters, Dispatcher, DispatcherParts, IntakeHandle};
use crate::effect::{ComponentReport, EffectEngine, EffectSummary, Hardware, RunSnapshot};
use crate::error::{GiftlinkError, Result};
use crate::gift::{GiftCatalog, GiftEvent};
use crate::notify::{ActionReport, BoxedSink};
use crate::registry::{
    ActionBinding, ActionRegistry, BindingRequest, DeviceDescriptor, DeviceKind, DeviceRegistry,
    DeviceStatus, NewDevice,
};
use crate::remote::{HttpActuator, RemoteActuator};

/// Point-in-time view for operators and UIs
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub timestamp: DateTime<Utc>,
    pub registered_devices: usize,
    pub connected_devices: usize,
    pub bindings: usize,
    pub connections: Vec<LinkSnapshot>,
    pub active_effects: Vec<RunSnapshot>,
    pub last_effects: std::collections::BTreeMap<String, EffectSummary>,
    pub dispatch: DispatchCounters,
}

/// Result of [`GiftLink::self_test`]
#[derive(Debug, Clone, Serialize)]
pub struct SelfTestReport {
    pub timestamp: DateTime<Utc>,
    pub components: ComponentReport,
    /// One heartbeat per open serial link
    pub serial: Vec<LinkSnapshot>,
}

impl SelfTestReport {
    /// Nothing failed; absent components do not count against it
    pub fn passed(&self) -> bool {
        !self.components.values().any(|check| check.is_failed())
            && self
                .serial
                .iter()
                .all(|link| link.status == LinkStatus::Connected)
    }
}

/// What [`GiftLink::seed`] installed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedSummary {
    pub devices: usize,
    pub bindings: usize,
    pub connected_ports: Vec<String>,
    pub errors: Vec<String>,
}

pub struct GiftLink {
    devices: Arc<DeviceRegistry>,
    actions: Arc<ActionRegistry>,
    serial: Arc<SerialLinkManager>,
    effects: EffectEngine,
    catalog: Arc<GiftCatalog>,
    dispatcher: Dispatcher,
}

/// Swappable collaborators; defaults come from [`Config`]
pub struct GiftLinkBuilder {
    config: Config,
    ports: Option<Arc<dyn PortOpener>>,
    hardware: Option<Hardware>,
    remote: Option<Arc<dyn RemoteActuator>>,
    sink: BoxedSink,
}

impl GiftLinkBuilder {
    pub fn ports(mut self, ports: Arc<dyn PortOpener>) -> Self {
        self.ports = Some(ports);
        self
    }

    pub fn hardware(mut self, hardware: Hardware) -> Self {
        self.hardware = Some(hardware);
        self
    }

    pub fn remote(mut self, remote: Arc<dyn RemoteActuator>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn sink(mut self, sink: BoxedSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn build(self) -> Result<GiftLink> {
        let config = self.config;
        let ports = self
            .ports
            .unwrap_or_else(|| Arc::new(giftlink_transport::NativePorts));
        let remote = match self.remote {
            Some(remote) => remote,
            None => Arc::new(HttpActuator::new(std::time::Duration::from_secs(
                config.dispatch.http_timeout_secs,
            ))?),
        };

        let devices = Arc::new(DeviceRegistry::new(config.dispatch.max_devices));
        let actions = Arc::new(ActionRegistry::new());
        let serial = Arc::new(SerialLinkManager::new(ports, config.serial.link_settings()));
        let effects = EffectEngine::new(
            self.hardware.unwrap_or_else(|| config.effects.hardware()),
            config.effects.settings(),
        );
        let catalog = Arc::new(config.catalog()?);

        let dispatcher = Dispatcher::new(DispatcherParts {
            devices: Arc::clone(&devices),
            actions: Arc::clone(&actions),
            serial: Arc::clone(&serial),
            effects: effects.clone(),
            remote,
            catalog: Arc::clone(&catalog),
            sink: self.sink,
        });

        Ok(GiftLink {
            devices,
            actions,
            serial,
            effects,
            catalog,
            dispatcher,
        })
    }
}

impl GiftLink {
    pub fn builder(config: &Config) -> GiftLinkBuilder {
        GiftLinkBuilder {
            config: config.clone(),
            ports: None,
            hardware: None,
            remote: None,
            sink: Arc::new(crate::notify::LogSink),
        }
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    pub fn serial(&self) -> &Arc<SerialLinkManager> {
        &self.serial
    }

    pub fn effects(&self) -> &EffectEngine {
        &self.effects
    }

    pub fn catalog(&self) -> &GiftCatalog {
        &self.catalog
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    // ── Registration API ─────────────────────────────────────────────

    pub fn add_device(&self, request: NewDevice) -> Result<DeviceDescriptor> {
        let device = self.devices.register(request)?;
        info!("Registered {} device {} ({})", device.kind.label(), device.name, device.id);
        Ok(device)
    }

    pub fn list_devices(&self) -> Vec<DeviceDescriptor> {
        self.devices.list()
    }

    /// Remove a device, stop any effect it is running and drop its
    /// per-device state.
    ///
    /// Bindings that point at it stay in place and fail at dispatch time.
    pub fn remove_device(&self, id: &str) -> Result<DeviceDescriptor> {
        let device = self.devices.remove(id)?;
        self.effects.forget(id);
        self.dispatcher.forget_device(id);
        info!("Removed device {} ({})", device.name, device.id);
        Ok(device)
    }

    pub fn set_action(&self, request: BindingRequest) -> Result<ActionBinding> {
        let binding = self.actions.upsert(request, &self.devices)?;
        info!(
            "Bound {} to {} on {}",
            binding.gift_type, binding.action, binding.device_id
        );
        Ok(binding)
    }

    pub fn list_actions(&self) -> Vec<ActionBinding> {
        self.actions.list()
    }

    /// Bind every catalog gift to its default action on `device_id`
    pub fn install_default_bindings(&self, device_id: &str) -> Result<Vec<ActionBinding>> {
        self.catalog
            .iter()
            .map(|(gift_type, _)| {
                let (action, params) = default_action(*gift_type, &self.catalog);
                self.set_action(
                    BindingRequest::new(gift_type.as_str(), device_id, action.name()).params(params),
                )
            })
            .collect()
    }

    // ── Serial links ─────────────────────────────────────────────────

    pub async fn connect_serial(&self, port: &str, baud_rate: Option<u32>) -> Result<()> {
        let result = self.serial.connect(port, baud_rate).await;
        let status = match &result {
            Ok(()) => DeviceStatus::Connected,
            Err(_) => DeviceStatus::Error,
        };
        self.devices.set_port_status(port, status);
        Ok(result?)
    }

    pub async fn disconnect_serial(&self, port: &str) -> bool {
        let was_tracked = self.serial.disconnect(port).await;
        self.devices.set_port_status(port, DeviceStatus::Disconnected);
        was_tracked
    }

    /// One heartbeat sweep, mirrored onto device statuses
    pub async fn heartbeat(&self) -> Vec<LinkSnapshot> {
        let snapshots = self.serial.heartbeat_sweep().await;
        for snapshot in &snapshots {
            let status = match (snapshot.status, snapshot.open) {
                (LinkStatus::Connected, true) => DeviceStatus::Connected,
                (LinkStatus::Disconnected, _) => DeviceStatus::Disconnected,
                _ => DeviceStatus::Error,
            };
            self.devices.set_port_status(&snapshot.port, status);
        }
        snapshots
    }

    pub fn spawn_heartbeat(self: &Arc<Self>, interval: std::time::Duration) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                engine.heartbeat().await;
            }
        })
    }

    /// Exercise every local actuator and heartbeat every serial link
    pub async fn self_test(&self) -> SelfTestReport {
        let components = self.effects.self_test().await;
        let serial = self.heartbeat().await;
        SelfTestReport {
            timestamp: Utc::now(),
            components,
            serial,
        }
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    pub async fn dispatch(&self, event: GiftEvent) -> ActionReport {
        self.dispatcher.dispatch(event).await
    }

    pub fn spawn_intake(&self, capacity: usize, device_queue: usize) -> (IntakeHandle, JoinHandle<()>) {
        self.dispatcher.spawn_intake(capacity, device_queue)
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            timestamp: Utc::now(),
            registered_devices: self.devices.len(),
            connected_devices: self.devices.connected_count(),
            bindings: self.actions.len(),
            connections: self.serial.statuses(),
            active_effects: self.effects.active_runs(),
            last_effects: self.effects.last_effects(),
            dispatch: self.dispatcher.counters(),
        }
    }

    /// Register the configured devices and bindings.
    ///
    /// Individual failures are collected rather than aborting the rest.
    pub async fn seed(&self, config: &Config) -> SeedSummary {
        let mut summary = SeedSummary::default();

        for seed in &config.devices {
            let device = match self.add_device(NewDevice::new(&seed.name, seed.kind.clone())) {
                Ok(device) => device,
                Err(e) => {
                    summary.errors.push(format!("device {}: {e}", seed.name));
                    continue;
                }
            };
            summary.devices += 1;

            if let (true, Some(port)) = (seed.auto_connect, device.kind.serial_port()) {
                let baud = match &device.kind {
                    DeviceKind::MicrocontrollerSerial { baud_rate, .. } => *baud_rate,
                    _ => None,
                };
                match self.connect_serial(port, baud).await {
                    Ok(()) => summary.connected_ports.push(port.to_string()),
                    Err(e) => {
                        warn!("Auto-connect of {} failed: {}", port, e);
                        summary.errors.push(format!("connect {port}: {e}"));
                    }
                }
            }
        }

        if let Some(name) = &config.default_bindings_device {
            match self.devices.find_by_name(name) {
                Some(device) => match self.install_default_bindings(&device.id) {
                    Ok(bindings) => summary.bindings += bindings.len(),
                    Err(e) => summary.errors.push(format!("default bindings on {name}: {e}")),
                },
                None => summary
                    .errors
                    .push(format!("default bindings: no device named {name:?}")),
            }
        }

        for seed in &config.bindings {
            let Some(device) = self.devices.find_by_name(&seed.device) else {
                summary.errors.push(format!(
                    "binding {}: {}",
                    seed.gift_type,
                    GiftlinkError::DeviceNotFound(seed.device.clone())
                ));
                continue;
            };
            let request = BindingRequest::new(&seed.gift_type, &device.id, &seed.action)
                .params(seed.params.clone())
                .enabled(seed.enabled);
            match self.set_action(request) {
                Ok(_) => summary.bindings += 1,
                Err(e) => summary.errors.push(format!("binding {}: {e}", seed.gift_type)),
            }
        }

        summary
    }

    /// Stop effects and close every serial port
    pub async fn shutdown(&self) {
        self.effects.stop_all();
        self.effects.wait_idle().await;
        self.serial.disconnect_all().await;
    }
}
