//! Device and action registries.
//!
//! Both are in-memory keyed stores behind a `RwLock`: a dispatch reading a
//! binding sees either the old or the new value, never a partial write.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::{ActionKind, ActionParams};
use crate::error::{GiftlinkError, Result};
use crate::gift::GiftType;

/// Default capacity of the device registry
pub const DEFAULT_MAX_DEVICES: usize = 10;

const DEFAULT_HTTP_PORT: u16 = 80;

fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}

// ── Devices ──────────────────────────────────────────────────────────

/// How a device is reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceKind {
    /// A microcontroller speaking the line protocol over serial
    #[serde(alias = "arduino", alias = "esp32", alias = "esp8266")]
    MicrocontrollerSerial {
        port: String,
        /// Falls back to the configured default when absent
        #[serde(default)]
        baud_rate: Option<u32>,
    },
    /// A board with its own HTTP command endpoint
    #[serde(alias = "http")]
    NetworkHttp {
        host: String,
        #[serde(default = "default_http_port")]
        port: u16,
    },
    /// LED strip, servo, buzzer or camera attached to this host
    #[serde(alias = "raspberry_pi", alias = "neopixel", alias = "local")]
    LocalActuator,
}

impl DeviceKind {
    pub fn label(&self) -> &'static str {
        match self {
            DeviceKind::MicrocontrollerSerial { .. } => "microcontroller_serial",
            DeviceKind::NetworkHttp { .. } => "network_http",
            DeviceKind::LocalActuator => "local_actuator",
        }
    }

    pub fn serial_port(&self) -> Option<&str> {
        match self {
            DeviceKind::MicrocontrollerSerial { port, .. } => Some(port),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Connected,
    Disconnected,
    Error,
}

/// A registered device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub kind: DeviceKind,
    pub status: DeviceStatus,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Gifts successfully actuated on this device
    pub gift_count: u64,
    pub last_gift: Option<GiftType>,
}

/// Registration request
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewDevice {
    pub name: String,
    #[serde(flatten)]
    pub kind: DeviceKind,
}

impl NewDevice {
    pub fn new(name: &str, kind: DeviceKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(GiftlinkError::Validation("device name is required".into()));
        }
        match &self.kind {
            DeviceKind::MicrocontrollerSerial { port, .. } if port.trim().is_empty() => Err(
                GiftlinkError::Validation("serial device needs a port".into()),
            ),
            DeviceKind::NetworkHttp { host, .. } if host.trim().is_empty() => Err(
                GiftlinkError::Validation("network device needs a host".into()),
            ),
            _ => Ok(()),
        }
    }
}

/// Registered devices keyed by generated id
pub struct DeviceRegistry {
    devices: RwLock<BTreeMap<String, DeviceDescriptor>>,
    max_devices: usize,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEVICES)
    }
}

impl DeviceRegistry {
    pub fn new(max_devices: usize) -> Self {
        Self {
            devices: RwLock::new(BTreeMap::new()),
            max_devices,
        }
    }

    /// Register a device; it starts out `connected`
    pub fn register(&self, request: NewDevice) -> Result<DeviceDescriptor> {
        request.validate()?;

        let mut devices = self.devices.write();
        if devices.len() >= self.max_devices {
            return Err(GiftlinkError::Validation(format!(
                "device limit of {} reached",
                self.max_devices
            )));
        }

        let now = Utc::now();
        let device = DeviceDescriptor {
            id: Uuid::new_v4().to_string(),
            name: request.name.trim().to_string(),
            kind: request.kind,
            status: DeviceStatus::Connected,
            last_seen: now,
            created_at: now,
            gift_count: 0,
            last_gift: None,
        };
        devices.insert(device.id.clone(), device.clone());
        Ok(device)
    }

    pub fn remove(&self, id: &str) -> Result<DeviceDescriptor> {
        self.devices
            .write()
            .remove(id)
            .ok_or_else(|| GiftlinkError::NotFound(format!("device {id}")))
    }

    pub fn get(&self, id: &str) -> Option<DeviceDescriptor> {
        self.devices.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.devices.read().contains_key(id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<DeviceDescriptor> {
        self.devices
            .read()
            .values()
            .find(|d| d.name == name)
            .cloned()
    }

    /// All devices in registration order
    pub fn list(&self) -> Vec<DeviceDescriptor> {
        let mut devices: Vec<_> = self.devices.read().values().cloned().collect();
        devices.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        devices
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    pub fn connected_count(&self) -> usize {
        self.devices
            .read()
            .values()
            .filter(|d| d.status == DeviceStatus::Connected)
            .count()
    }

    /// Update status; `connected` also refreshes `last_seen`.
    /// Returns false for unknown ids.
    pub fn set_status(&self, id: &str, status: DeviceStatus) -> bool {
        let mut devices = self.devices.write();
        let Some(device) = devices.get_mut(id) else {
            return false;
        };
        device.status = status;
        if status == DeviceStatus::Connected {
            device.last_seen = Utc::now();
        }
        true
    }

    /// Set the status of every serial device on `port`
    pub fn set_port_status(&self, port: &str, status: DeviceStatus) {
        let mut devices = self.devices.write();
        for device in devices
            .values_mut()
            .filter(|d| d.kind.serial_port() == Some(port))
        {
            device.status = status;
            if status == DeviceStatus::Connected {
                device.last_seen = Utc::now();
            }
        }
    }

    pub(crate) fn record_gift(&self, id: &str, gift_type: GiftType) {
        if let Some(device) = self.devices.write().get_mut(id) {
            device.gift_count += 1;
            device.last_gift = Some(gift_type);
            device.last_seen = Utc::now();
        }
    }
}

// ── Action bindings ──────────────────────────────────────────────────

/// Gift type → device action
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionBinding {
    pub gift_type: GiftType,
    pub device_id: String,
    pub action: ActionKind,
    pub params: ActionParams,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// Upsert request; every field is checked by [`ActionRegistry::upsert`]
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BindingRequest {
    pub gift_type: Option<String>,
    pub device_id: Option<String>,
    pub action: Option<String>,
    #[serde(default)]
    pub params: ActionParams,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl BindingRequest {
    pub fn new(gift_type: &str, device_id: &str, action: &str) -> Self {
        Self {
            gift_type: Some(gift_type.to_string()),
            device_id: Some(device_id.to_string()),
            action: Some(action.to_string()),
            ..Self::default()
        }
    }

    pub fn params(mut self, params: ActionParams) -> Self {
        self.params = params;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }
}

fn required(field: Option<String>, name: &str) -> Result<String> {
    field
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| GiftlinkError::Validation(format!("{name} is required")))
}

/// One binding per gift type; the newest upsert wins
#[derive(Default)]
pub struct ActionRegistry {
    bindings: RwLock<BTreeMap<GiftType, ActionBinding>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a binding, replacing any for the same gift type
    pub fn upsert(&self, request: BindingRequest, devices: &DeviceRegistry) -> Result<ActionBinding> {
        let gift_type: GiftType = required(request.gift_type, "gift_type")?.parse()?;
        let device_id = required(request.device_id, "device_id")?;
        let action: ActionKind = required(request.action, "action")?.parse()?;

        let device = devices
            .get(&device_id)
            .ok_or_else(|| GiftlinkError::DeviceNotFound(device_id.clone()))?;
        if !action.supports(&device.kind) {
            return Err(GiftlinkError::Validation(format!(
                "{action} is not supported by {} device {:?}",
                device.kind.label(),
                device.name
            )));
        }

        let binding = ActionBinding {
            gift_type,
            device_id,
            action,
            params: request.params,
            enabled: request.enabled.unwrap_or(true),
            created_at: Utc::now(),
        };
        self.bindings.write().insert(gift_type, binding.clone());
        Ok(binding)
    }

    pub fn get(&self, gift_type: GiftType) -> Option<ActionBinding> {
        self.bindings.read().get(&gift_type).cloned()
    }

    pub fn list(&self) -> Vec<ActionBinding> {
        self.bindings.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.read().is_empty()
    }
}
