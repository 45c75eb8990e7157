//! Serial transport for gift-driven microcontrollers
//!
//! This crate owns every serial connection: port discovery, the
//! open-boot-handshake sequence, serialized command/response cycles and the
//! periodic heartbeat. Higher layers only ever see ports by name.

pub mod error;
pub mod link;
pub mod port;
pub mod protocol;
pub mod types;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::TransportError;
pub use link::SerialLinkManager;
pub use port::{LinePort, PortOpener};
pub use protocol::Command;
pub use types::{LinkSettings, LinkSnapshot, LinkStatus, PortInfo};

#[cfg(feature = "native")]
pub use port::NativePorts;
