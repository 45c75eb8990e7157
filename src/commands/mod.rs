//! Command handlers for the CLI application.
//!
//! - `serial`: direct board access (ports, probe, send)
//! - `engine`: gift catalog, one-shot simulation, the long-running engine,
//!   and config bootstrap

pub mod engine;
pub mod serial;

pub type CommandResult = anyhow::Result<()>;
