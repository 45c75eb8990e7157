//! Common types for the serial link layer

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::protocol::{timing, DEFAULT_BAUD_RATE};

/// A serial endpoint as reported by the OS
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    /// Device path (`/dev/ttyACM0`, `COM3`)
    pub device: String,
    pub description: String,
    /// Hardware id string, `USB VID:PID=2341:0043 SER=...` for USB ports
    pub hwid: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

/// Liveness of a tracked connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Connected,
    Disconnected,
    Error,
}

/// Point-in-time view of one tracked connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkSnapshot {
    pub port: String,
    pub baud_rate: u32,
    pub status: LinkStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    /// False once the handle was closed after too many failures
    pub open: bool,
}

/// Tunables for [`SerialLinkManager`](crate::SerialLinkManager)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    pub default_baud_rate: u32,
    /// Read deadline for handshake, commands and heartbeats
    pub timeout: Duration,
    /// Consecutive failures after which a port's handle is closed
    pub retry_count: u32,
    /// Settle time after opening, for boards that reset on open
    pub boot_delay: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            default_baud_rate: DEFAULT_BAUD_RATE,
            timeout: Duration::from_secs(timing::DEFAULT_TIMEOUT_SECS),
            retry_count: timing::DEFAULT_RETRY_COUNT,
            boot_delay: Duration::from_millis(timing::BOOT_DELAY_MS),
        }
    }
}
