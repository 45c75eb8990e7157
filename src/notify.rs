//! Notifications emitted by the dispatcher.
//!
//! Sinks are fire-and-forget: `publish` never blocks and never fails, so a
//! slow or absent consumer cannot hold up actuation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::action::ActionKind;
use crate::error::{FailureKind, GiftlinkError};
use crate::gift::GiftEvent;

/// Result of one dispatch attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// No enabled binding; nothing was actuated
    NoOp { reason: String },
    Success { result: String },
    Failed { kind: FailureKind, message: String },
}

impl From<GiftlinkError> for Outcome {
    fn from(e: GiftlinkError) -> Self {
        Outcome::Failed {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// Payload of an `action_executed` notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionReport {
    pub gift: GiftEvent,
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    pub action: Option<ActionKind>,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
}

impl ActionReport {
    pub fn new(gift: GiftEvent, outcome: Outcome) -> Self {
        Self {
            gift,
            device_id: None,
            device_name: None,
            action: None,
            outcome,
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }

    pub fn is_no_op(&self) -> bool {
        matches!(self.outcome, Outcome::NoOp { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self.outcome {
            Outcome::Failed { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    GiftReceived { gift: GiftEvent },
    ActionExecuted(ActionReport),
}

pub trait NotificationSink: Send + Sync {
    fn publish(&self, notification: Notification);
}

pub type BoxedSink = Arc<dyn NotificationSink>;

/// Writes notifications to the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn publish(&self, notification: Notification) {
        match notification {
            Notification::GiftReceived { gift } => {
                info!("Gift received: {} from {} (value {})", gift.gift_type, gift.sender, gift.value)
            }
            Notification::ActionExecuted(report) => match &report.outcome {
                Outcome::NoOp { reason } => info!("{}: no action ({})", report.gift.gift_type, reason),
                Outcome::Success { result } => info!(
                    "{} -> {} on {}: {}",
                    report.gift.gift_type,
                    report.action.map(|a| a.name()).unwrap_or("-"),
                    report.device_name.as_deref().unwrap_or("-"),
                    result
                ),
                Outcome::Failed { message, .. } => warn!(
                    "{} -> {} failed: {}",
                    report.gift.gift_type,
                    report.device_name.as_deref().unwrap_or("-"),
                    message
                ),
            },
        }
    }
}

/// Keeps every notification; handy for tests and one-shot commands
#[derive(Debug, Default)]
pub struct MemorySink {
    notifications: Mutex<Vec<Notification>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.notifications.lock())
    }

    pub fn reports(&self) -> Vec<ActionReport> {
        self.notifications
            .lock()
            .iter()
            .filter_map(|n| match n {
                Notification::ActionExecuted(report) => Some(report.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.notifications.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.lock().is_empty()
    }
}

impl NotificationSink for MemorySink {
    fn publish(&self, notification: Notification) {
        self.notifications.lock().push(notification);
    }
}

/// Publishes to several sinks in order
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<BoxedSink>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: BoxedSink) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl NotificationSink for FanoutSink {
    fn publish(&self, notification: Notification) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.publish(notification.clone());
            }
            last.publish(notification);
        }
    }
}
