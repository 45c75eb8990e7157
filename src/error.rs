//! Error types for the gift dispatch engine

use giftlink_transport::TransportError;
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by registries, actuation and configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GiftlinkError {
    /// Malformed or missing fields in a request
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A binding (or request) names a device that is not registered
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Hardware feature absent on this host
    #[error("Capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// Network device returned an error status or timed out
    #[error("Remote actuation failed: {0}")]
    RemoteActuationFailed(String),

    /// The device's work queue is full
    #[error("Device busy: {0}")]
    DeviceBusy(String),

    /// A present device failed while rendering
    #[error("Hardware error: {0}")]
    Hardware(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, GiftlinkError>;

/// Stable failure classification carried in notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ValidationError,
    NotFound,
    DeviceNotFound,
    HandshakeFailed,
    NotConnected,
    NoResponse,
    Transport,
    CapabilityUnavailable,
    RemoteActuationFailed,
    DeviceBusy,
    Hardware,
    Config,
}

impl GiftlinkError {
    pub fn kind(&self) -> FailureKind {
        match self {
            GiftlinkError::Validation(_) => FailureKind::ValidationError,
            GiftlinkError::NotFound(_) => FailureKind::NotFound,
            GiftlinkError::DeviceNotFound(_) => FailureKind::DeviceNotFound,
            GiftlinkError::Transport(e) => match e {
                TransportError::HandshakeFailed { .. } => FailureKind::HandshakeFailed,
                TransportError::NotConnected(_) => FailureKind::NotConnected,
                TransportError::NoResponse(_) => FailureKind::NoResponse,
                _ => FailureKind::Transport,
            },
            GiftlinkError::CapabilityUnavailable(_) => FailureKind::CapabilityUnavailable,
            GiftlinkError::RemoteActuationFailed(_) => FailureKind::RemoteActuationFailed,
            GiftlinkError::DeviceBusy(_) => FailureKind::DeviceBusy,
            GiftlinkError::Hardware(_) => FailureKind::Hardware,
            GiftlinkError::Config(_) => FailureKind::Config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kinds() {
        let e: GiftlinkError = TransportError::NoResponse("COM3".into()).into();
        assert_eq!(e.kind(), FailureKind::NoResponse);
        assert_eq!(e.to_string(), "No response from COM3");

        let e: GiftlinkError = TransportError::Internal("boom".into()).into();
        assert_eq!(e.kind(), FailureKind::Transport);
    }

    #[test]
    fn test_failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::DeviceNotFound).unwrap();
        assert_eq!(json, "\"device_not_found\"");
    }
}
