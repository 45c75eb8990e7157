//! Serial command handlers.
//!
//! These talk to boards through the link manager alone; no registry or
//! dispatcher is involved.

use std::sync::Arc;

use anyhow::Context;
use giftlink::transport::{NativePorts, SerialLinkManager};
use giftlink::Config;

use super::CommandResult;

fn link_manager(config: &Config) -> SerialLinkManager {
    SerialLinkManager::new(Arc::new(NativePorts), config.serial.link_settings())
}

/// List serial ports
pub fn ports(config: &Config) -> CommandResult {
    let ports = link_manager(config).list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }

    println!("{:<24} {:<32} HWID", "PORT", "DESCRIPTION");
    for port in ports {
        println!("{:<24} {:<32} {}", port.device, port.description, port.hwid);
    }
    Ok(())
}

/// Open a port, run the handshake and print the link state
pub async fn probe(config: &Config, port: &str, baud: Option<u32>) -> CommandResult {
    let links = link_manager(config);
    println!(
        "Probing {} at {} baud...",
        port,
        baud.unwrap_or(config.serial.baud_rate)
    );

    links
        .connect(port, baud)
        .await
        .with_context(|| format!("probing {port}"))?;

    if let Some(snapshot) = links.status(port) {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }
    links.disconnect(port).await;
    Ok(())
}

/// Send one protocol line and print the reply
pub async fn send(config: &Config, port: &str, command: &str, baud: Option<u32>) -> CommandResult {
    let links = link_manager(config);
    links
        .connect(port, baud)
        .await
        .with_context(|| format!("connecting to {port}"))?;

    let result = links.send_command(command, Some(port)).await;
    links.disconnect(port).await;

    let response = result.with_context(|| format!("sending {command:?}"))?;
    println!("> {command}");
    println!("< {response}");
    Ok(())
}
