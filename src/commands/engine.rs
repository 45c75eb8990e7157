//! Engine command handlers.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use giftlink::action::default_action;
use giftlink::config::DeviceSeed;
use giftlink::effect::ComponentCheck;
use giftlink::notify::{FanoutSink, LogSink};
use giftlink::{
    Config, DeviceKind, GiftEvent, GiftLink, GiftType, IncomingGift, Notification,
    NotificationSink,
};

use super::CommandResult;

/// Writes each notification to stdout as one JSON line
struct JsonLinesSink;

impl NotificationSink for JsonLinesSink {
    fn publish(&self, notification: Notification) {
        match serde_json::to_string(&notification) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("Failed to encode notification: {}", e),
        }
    }
}

async fn start_engine(config: &Config) -> anyhow::Result<Arc<GiftLink>> {
    let sink = FanoutSink::new()
        .with(Arc::new(LogSink))
        .with(Arc::new(JsonLinesSink));
    let engine = Arc::new(GiftLink::builder(config).sink(Arc::new(sink)).build()?);

    let summary = engine.seed(config).await;
    for error in &summary.errors {
        warn!("{}", error);
    }
    info!(
        "Seeded {} device(s), {} binding(s), {} port(s) connected",
        summary.devices,
        summary.bindings,
        summary.connected_ports.len()
    );
    if summary.devices == 0 {
        warn!("No devices configured; every gift will be a no-op");
    }
    Ok(engine)
}

/// Print the gift catalog and the action each gift gets by default
pub fn gifts(config: &Config) -> CommandResult {
    let catalog = config.catalog()?;
    println!(
        "{:<8} {:<12} {:>6} {:<8} {:<12} PARAMS",
        "TYPE", "NAME", "VALUE", "COLOR", "ACTION"
    );
    for gift_type in GiftType::ALL {
        let info = catalog.info(gift_type);
        let (action, params) = default_action(gift_type, &catalog);
        println!(
            "{:<8} {:<12} {:>6} {:<8} {:<12} {}",
            gift_type,
            info.name,
            info.value,
            info.color,
            action.name(),
            serde_json::to_string(&params)?
        );
    }
    Ok(())
}

/// Dispatch one gift and wait for its effects to finish
pub async fn simulate(config: &Config, gift: &str, sender: &str) -> CommandResult {
    let gift_type: GiftType = gift.parse()?;
    let engine = start_engine(config).await?;

    let event = GiftEvent::from_catalog(gift_type, sender, engine.catalog());
    let report = engine.dispatch(event).await;
    engine.effects().wait_idle().await;
    engine.shutdown().await;

    if let Some(kind) = report.failure_kind() {
        bail!("{} dispatch failed ({:?})", gift_type, kind);
    }
    Ok(())
}

/// Run the component self-test and print the report
pub async fn self_test(config: &Config) -> CommandResult {
    let engine = start_engine(config).await?;
    let report = engine.self_test().await;
    engine.shutdown().await;

    println!("{:<12} RESULT", "COMPONENT");
    for (component, check) in &report.components {
        let result = match check {
            ComponentCheck::Passed { detail: Some(detail) } => format!("ok ({detail})"),
            ComponentCheck::Passed { detail: None } => "ok".to_string(),
            ComponentCheck::Failed { error } => format!("FAILED: {error}"),
            ComponentCheck::Unavailable => "not attached".to_string(),
        };
        println!("{:<12} {}", component.to_string(), result);
    }
    for link in &report.serial {
        println!("{:<12} {:?}", link.port, link.status);
    }

    if !report.passed() {
        bail!("self-test failed");
    }
    Ok(())
}

/// Long-running mode: gifts from stdin, notifications to stdout
pub async fn run(config: &Config) -> CommandResult {
    let engine = start_engine(config).await?;
    let heartbeat = engine.spawn_heartbeat(config.serial.heartbeat_interval());
    let (intake, intake_task) = engine.spawn_intake(
        config.dispatch.intake_capacity,
        config.dispatch.device_queue,
    );

    info!("Ready. Reading gifts from stdin, Ctrl+C to stop.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut interrupted = false;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let event = serde_json::from_str::<IncomingGift>(line)
                    .map_err(anyhow::Error::from)
                    .and_then(|gift| Ok(gift.into_event(engine.catalog())?));
                match event {
                    Ok(event) => {
                        intake.submit(event);
                    }
                    Err(e) => warn!("Ignoring input {:?}: {}", line, e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                interrupted = true;
                break;
            }
        }
    }

    drop(intake);
    intake_task.await?;
    heartbeat.abort();
    if !interrupted {
        engine.effects().wait_idle().await;
    }

    let status = serde_json::json!({ "event": "status", "status": engine.status() });
    println!("{}", serde_json::to_string(&status)?);

    engine.shutdown().await;
    Ok(())
}

/// Write a starter config with one simulated LED strip and the default bindings
pub fn init_config(config: &Config, path: &Path, force: bool) -> CommandResult {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    let mut starter = config.clone();
    if starter.devices.is_empty() {
        starter.devices.push(DeviceSeed {
            name: "strip".to_string(),
            kind: DeviceKind::LocalActuator,
            auto_connect: false,
        });
        starter.default_bindings_device = Some("strip".to_string());
        // Until real actuators are configured the strip is a logging stand-in
        starter.effects.simulate = true;
    }
    starter.save(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}
