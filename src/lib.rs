// giftlink - Shared Library
// Gift catalog, device/action registries, effect engine and dispatcher

pub mod action;
pub mod color;
pub mod config;
pub mod dispatch;
pub mod effect;
pub mod error;
pub mod gift;
pub mod notify;
pub mod registry;
pub mod remote;
pub mod service;

pub use action::{ActionKind, ActionParams};
pub use color::Rgb;
pub use config::Config;
pub use dispatch::{DispatchCounters, Dispatcher, DispatcherParts, IntakeHandle};
pub use effect::{ComponentCheck, Effect, EffectEngine, EffectOutcome, EffectSettings, Hardware};
pub use error::{FailureKind, GiftlinkError, Result};
pub use gift::{GiftCatalog, GiftEvent, GiftInfo, GiftType, IncomingGift};
pub use notify::{ActionReport, Notification, NotificationSink, Outcome};
pub use registry::{
    ActionBinding, ActionRegistry, BindingRequest, DeviceDescriptor, DeviceKind, DeviceRegistry,
    DeviceStatus, NewDevice,
};
pub use remote::{HttpActuator, RemoteActuator, RemoteCommand};
pub use service::{GiftLink, GiftLinkBuilder, SeedSummary, SelfTestReport, StatusSnapshot};

pub use giftlink_transport as transport;
