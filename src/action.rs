//! Action vocabulary
//!
//! Every bindable action name resolves to one [`ActionKind`]. Each kind
//! knows how to become a serial protocol command and/or a local effect;
//! unsupported combinations are validation errors rather than silent no-ops.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use giftlink_transport::protocol::defaults;
use giftlink_transport::Command;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::color::Rgb;
use crate::effect::Effect;
use crate::error::{GiftlinkError, Result};
use crate::gift::{GiftCatalog, GiftEvent, GiftType};
use crate::registry::DeviceKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ActionKind {
    SetColor,
    LedRainbow,
    LedClear,
    Pulse,
    Twinkle,
    Chase,
    Unicorn,
    ServoMove,
    SoundPlay,
    BuzzerBeep,
    DisplayMessage,
    CameraCapture,
    GiftEffect,
}

// (canonical name, aliases)
const NAMES: &[(ActionKind, &str, &[&str])] = &[
    (ActionKind::SetColor, "set_color", &[]),
    (ActionKind::LedRainbow, "led_rainbow", &["rainbow"]),
    (ActionKind::LedClear, "led_clear", &["clear"]),
    (ActionKind::Pulse, "pulse_effect", &["pulse"]),
    (ActionKind::Twinkle, "twinkle_effect", &["twinkle"]),
    (ActionKind::Chase, "chase_effect", &["chase"]),
    (ActionKind::Unicorn, "unicorn_effect", &["unicorn"]),
    (ActionKind::ServoMove, "servo_move", &["move", "rotate"]),
    (ActionKind::SoundPlay, "sound_play", &["play_sound"]),
    (ActionKind::BuzzerBeep, "buzzer_beep", &[]),
    (ActionKind::DisplayMessage, "display_message", &["show_text"]),
    (ActionKind::CameraCapture, "camera_capture", &["take_photo"]),
    (ActionKind::GiftEffect, "gift_effect", &[]),
];

impl ActionKind {
    pub fn all() -> impl Iterator<Item = ActionKind> {
        NAMES.iter().map(|(kind, _, _)| *kind)
    }

    pub fn name(self) -> &'static str {
        NAMES
            .iter()
            .find(|(kind, _, _)| *kind == self)
            .map(|(_, name, _)| *name)
            .unwrap_or("unknown")
    }

    /// Resolve a canonical name or alias (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        NAMES
            .iter()
            .find(|(_, canonical, aliases)| *canonical == name || aliases.contains(&name.as_str()))
            .map(|(kind, _, _)| *kind)
    }

    fn has_serial_form(self) -> bool {
        !matches!(
            self,
            ActionKind::Pulse
                | ActionKind::Twinkle
                | ActionKind::Chase
                | ActionKind::Unicorn
                | ActionKind::CameraCapture
        )
    }

    fn has_local_form(self) -> bool {
        self != ActionKind::DisplayMessage
    }

    /// Whether a device of `kind` can carry out this action.
    ///
    /// Network devices interpret actions themselves, so they accept all.
    pub fn supports(self, kind: &DeviceKind) -> bool {
        match kind {
            DeviceKind::MicrocontrollerSerial { .. } => self.has_serial_form(),
            DeviceKind::NetworkHttp { .. } => true,
            DeviceKind::LocalActuator => self.has_local_form(),
        }
    }

    /// Encode as a protocol command for a serial microcontroller
    pub fn serial_command(self, params: &ActionParams, event: &GiftEvent) -> Result<Command> {
        let command = match self {
            ActionKind::SetColor => Command::LedColor {
                color: params
                    .color("color")?
                    .map(Rgb::to_hex)
                    .unwrap_or_else(|| defaults::LED_COLOR.to_string()),
                brightness: params.percent("brightness")?.unwrap_or(defaults::LED_BRIGHTNESS),
                duration_ms: params.millis("duration")?.unwrap_or(defaults::LED_DURATION_MS),
            },
            ActionKind::LedRainbow => Command::LedRainbow {
                duration_ms: params
                    .millis("duration")?
                    .unwrap_or(defaults::RAINBOW_DURATION_MS),
            },
            ActionKind::LedClear => Command::LedClear,
            ActionKind::ServoMove => Command::Servo {
                index: params.integer("servo", u8::MAX as u64)?.unwrap_or(0) as u8,
                angle: params
                    .integer("angle", u16::MAX as u64)?
                    .map(|a| a as u16)
                    .unwrap_or(defaults::SERVO_ANGLE),
            },
            ActionKind::SoundPlay => Command::Sound {
                name: params
                    .text("sound")
                    .unwrap_or(defaults::SOUND_NAME)
                    .to_string(),
                duration_ms: params
                    .millis("duration")?
                    .unwrap_or(defaults::SOUND_DURATION_MS),
            },
            ActionKind::BuzzerBeep => Command::Sound {
                name: defaults::SOUND_NAME.to_string(),
                duration_ms: params
                    .millis("duration")?
                    .unwrap_or(defaults::SOUND_DURATION_MS),
            },
            ActionKind::DisplayMessage => Command::Display {
                text: params
                    .text("text")
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{} sent {}", event.sender, event.gift_type)),
                duration_ms: params
                    .millis("duration")?
                    .unwrap_or(defaults::DISPLAY_DURATION_MS),
            },
            ActionKind::GiftEffect => Command::Gift {
                gift_type: event.gift_type.to_string(),
            },
            ActionKind::Pulse
            | ActionKind::Twinkle
            | ActionKind::Chase
            | ActionKind::Unicorn
            | ActionKind::CameraCapture => {
                return Err(GiftlinkError::Validation(format!(
                    "{self} has no serial command form"
                )))
            }
        };
        Ok(command)
    }

    /// Translate into an effect for the local effect engine
    pub fn local_effect(
        self,
        params: &ActionParams,
        event: &GiftEvent,
        catalog: &GiftCatalog,
    ) -> Result<Effect> {
        let color = |fallback: Rgb| -> Result<Rgb> {
            Ok(params.color("color")?.unwrap_or(fallback))
        };
        let gift_color = Rgb::parse(&catalog.color(event.gift_type)).unwrap_or(Rgb::WHITE);
        let duration = |default_ms: u32| -> Result<Duration> {
            let ms = params.millis("duration")?.unwrap_or(default_ms);
            Ok(Duration::from_millis(ms as u64))
        };

        let effect = match self {
            ActionKind::SetColor => Effect::SetColor {
                color: color(gift_color)?,
                brightness: params.fraction("brightness")?.unwrap_or(0.5),
            },
            ActionKind::LedClear => Effect::SetColor {
                color: Rgb::BLACK,
                brightness: 0.0,
            },
            ActionKind::LedRainbow => Effect::Rainbow {
                duration: duration(3000)?,
            },
            ActionKind::Pulse => Effect::Pulse {
                color: color(gift_color)?,
                duration: duration(3000)?,
            },
            ActionKind::Twinkle => Effect::Twinkle {
                color: color(gift_color)?,
                duration: duration(2000)?,
            },
            ActionKind::Chase => Effect::Chase {
                color: color(gift_color)?,
                duration: duration(2000)?,
            },
            ActionKind::Unicorn => Effect::Unicorn {
                duration: duration(5000)?,
            },
            ActionKind::ServoMove => {
                let angle = params.integer("angle", 180)?.unwrap_or(90);
                Effect::ServoMove { angle: angle as u8 }
            }
            ActionKind::SoundPlay => Effect::SoundPlay {
                name: params
                    .text("sound")
                    .unwrap_or(event.gift_type.as_str())
                    .to_ascii_lowercase(),
            },
            ActionKind::BuzzerBeep => Effect::SoundPlay {
                name: defaults::SOUND_NAME.to_string(),
            },
            ActionKind::CameraCapture => Effect::CameraCapture {
                filename: params.text("filename").map(str::to_string),
            },
            ActionKind::GiftEffect => gift_effect(event.gift_type),
            ActionKind::DisplayMessage => {
                return Err(GiftlinkError::Validation(format!(
                    "{self} needs a device with a display"
                )))
            }
        };
        Ok(effect)
    }
}

/// Signature LED effect of each gift on a local strip
pub fn gift_effect(gift_type: GiftType) -> Effect {
    match gift_type {
        GiftType::Rose => Effect::SetColor {
            color: Rgb::new(255, 105, 180),
            brightness: 0.3,
        },
        GiftType::Heart => Effect::Pulse {
            color: Rgb::new(255, 0, 0),
            duration: Duration::from_secs(3),
        },
        GiftType::Star => Effect::Twinkle {
            color: Rgb::new(255, 215, 0),
            duration: Duration::from_secs(2),
        },
        GiftType::Crown => Effect::Rainbow {
            duration: Duration::from_secs(3),
        },
        GiftType::Diamond => Effect::SetColor {
            color: Rgb::new(0, 191, 255),
            brightness: 1.0,
        },
        GiftType::Rocket => Effect::Chase {
            color: Rgb::new(255, 69, 0),
            duration: Duration::from_secs(2),
        },
        GiftType::Unicorn => Effect::Unicorn {
            duration: Duration::from_secs(5),
        },
    }
}

/// Default binding for a gift: (action, params)
pub fn default_action(gift_type: GiftType, catalog: &GiftCatalog) -> (ActionKind, ActionParams) {
    let color = catalog.color(gift_type);
    match gift_type {
        GiftType::Rose => (
            ActionKind::SetColor,
            ActionParams::new()
                .with("color", color)
                .with("brightness", 30)
                .with("duration", 2000),
        ),
        GiftType::Heart => (
            ActionKind::LedRainbow,
            ActionParams::new().with("duration", 3000),
        ),
        GiftType::Diamond => (
            ActionKind::SetColor,
            ActionParams::new()
                .with("color", color)
                .with("brightness", 100)
                .with("duration", 5000),
        ),
        _ => (
            ActionKind::SetColor,
            ActionParams::new()
                .with("color", color)
                .with("brightness", 50)
                .with("duration", 3000),
        ),
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ActionKind {
    type Err = GiftlinkError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ActionKind::from_name(s)
            .ok_or_else(|| GiftlinkError::Validation(format!("unknown action: {s:?}")))
    }
}

impl TryFrom<String> for ActionKind {
    type Error = GiftlinkError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ActionKind> for String {
    fn from(kind: ActionKind) -> Self {
        kind.name().to_string()
    }
}

// ── Parameters ───────────────────────────────────────────────────────

/// Free-form action parameters with typed accessors.
///
/// Absent keys read as `None`; present keys of the wrong shape are
/// validation errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionParams(pub Map<String, Value>);

impl ActionParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Numbers, or strings holding numbers
    pub fn number(&self, key: &str) -> Result<Option<f64>> {
        let Some(value) = self.0.get(key) else {
            return Ok(None);
        };
        let number = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        number
            .filter(|n| n.is_finite())
            .map(Some)
            .ok_or_else(|| GiftlinkError::Validation(format!("{key} must be a number, got {value}")))
    }

    /// Non-negative integer no larger than `max`
    pub fn integer(&self, key: &str, max: u64) -> Result<Option<u64>> {
        match self.number(key)? {
            None => Ok(None),
            Some(n) if n >= 0.0 && n.round() <= max as f64 => Ok(Some(n.round() as u64)),
            Some(n) => Err(GiftlinkError::Validation(format!(
                "{key} must be between 0 and {max}, got {n}"
            ))),
        }
    }

    pub fn millis(&self, key: &str) -> Result<Option<u32>> {
        Ok(self.integer(key, u32::MAX as u64)?.map(|ms| ms as u32))
    }

    /// Brightness level in 0-1.
    ///
    /// Values up to 1 are fractions, larger ones percentages, so `0.3` and
    /// `30` mean the same and `1` is full brightness.
    pub fn fraction(&self, key: &str) -> Result<Option<f32>> {
        Ok(self.number(key)?.map(|n| {
            let n = if n > 1.0 { n / 100.0 } else { n };
            n.clamp(0.0, 1.0) as f32
        }))
    }

    /// The [`fraction`](Self::fraction) level as a 0-100 percentage
    pub fn percent(&self, key: &str) -> Result<Option<u8>> {
        Ok(self
            .fraction(key)?
            .map(|level| (level * 100.0).round().clamp(0.0, 100.0) as u8))
    }

    pub fn color(&self, key: &str) -> Result<Option<Rgb>> {
        match self.0.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Rgb::parse(s)
                .map(Some)
                .ok_or_else(|| GiftlinkError::Validation(format!("{key}: invalid color {s:?}"))),
            Some(other) => Err(GiftlinkError::Validation(format!(
                "{key} must be a color string, got {other}"
            ))),
        }
    }
}

impl From<Map<String, Value>> for ActionParams {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn rose() -> GiftEvent {
        GiftEvent::from_catalog(GiftType::Rose, "alice", &GiftCatalog::default())
    }

    #[test]
    fn test_names_and_aliases() {
        assert_eq!(ActionKind::from_name("set_color"), Some(ActionKind::SetColor));
        assert_eq!(ActionKind::from_name("RAINBOW"), Some(ActionKind::LedRainbow));
        assert_eq!(ActionKind::from_name("take_photo"), Some(ActionKind::CameraCapture));
        assert_eq!(ActionKind::from_name("explode"), None);
        assert!(matches!(
            "explode".parse::<ActionKind>(),
            Err(GiftlinkError::Validation(_))
        ));
        for kind in ActionKind::all() {
            assert_eq!(ActionKind::from_name(kind.name()), Some(kind));
        }
    }

    #[test]
    fn test_set_color_serial_command() {
        let params = ActionParams::new()
            .with("color", "#FF69B4")
            .with("brightness", 30);
        let cmd = ActionKind::SetColor.serial_command(&params, &rose()).unwrap();
        assert_eq!(cmd.to_string(), "LED:COLOR:#ff69b4:30:3000");

        let cmd = ActionKind::SetColor
            .serial_command(&ActionParams::new(), &rose())
            .unwrap();
        assert_eq!(cmd.to_string(), "LED:COLOR:#ffffff:50:3000");
    }

    #[test]
    fn test_other_serial_commands() {
        let event = rose();
        let none = ActionParams::new();
        let encode = |kind: ActionKind, params: &ActionParams| {
            kind.serial_command(params, &event).unwrap().to_string()
        };

        assert_eq!(encode(ActionKind::LedRainbow, &none), "LED:RAINBOW:5000");
        assert_eq!(encode(ActionKind::LedClear, &none), "LED:CLEAR");
        assert_eq!(encode(ActionKind::GiftEffect, &none), "GIFT:ROSE");
        assert_eq!(encode(ActionKind::BuzzerBeep, &none), "SOUND:beep:1000");
        assert_eq!(
            encode(ActionKind::ServoMove, &ActionParams::new().with("servo", 2).with("angle", 45)),
            "SERVO:2:45"
        );
        assert_eq!(
            encode(ActionKind::SoundPlay, &ActionParams::new().with("sound", "tada")),
            "SOUND:tada:1000"
        );
        assert_eq!(
            encode(ActionKind::DisplayMessage, &none),
            "DISPLAY:alice sent ROSE:5000"
        );
    }

    #[test]
    fn test_serial_rejects_local_only_actions() {
        let err = ActionKind::Pulse
            .serial_command(&ActionParams::new(), &rose())
            .unwrap_err();
        assert!(matches!(err, GiftlinkError::Validation(_)));
    }

    #[test]
    fn test_bad_params_are_validation_errors() {
        let params = ActionParams::new().with("color", "not-a-color");
        assert!(matches!(
            ActionKind::SetColor.serial_command(&params, &rose()),
            Err(GiftlinkError::Validation(_))
        ));

        let params = ActionParams::new().with("angle", -5);
        assert!(matches!(
            ActionKind::ServoMove.local_effect(&params, &rose(), &GiftCatalog::default()),
            Err(GiftlinkError::Validation(_))
        ));

        let params = ActionParams::new().with("duration", "soon");
        assert!(ActionKind::Pulse
            .local_effect(&params, &rose(), &GiftCatalog::default())
            .is_err());
    }

    #[test]
    fn test_local_effects() {
        let catalog = GiftCatalog::default();
        let event = rose();

        let effect = ActionKind::SetColor
            .local_effect(&ActionParams::new().with("brightness", 30), &event, &catalog)
            .unwrap();
        assert_eq!(
            effect,
            Effect::SetColor {
                color: Rgb::new(255, 105, 180),
                brightness: 0.3
            }
        );

        let effect = ActionKind::Pulse
            .local_effect(&ActionParams::new().with("duration", 1500), &event, &catalog)
            .unwrap();
        assert_eq!(effect.duration(), Duration::from_millis(1500));

        let effect = ActionKind::GiftEffect
            .local_effect(&ActionParams::new(), &event, &catalog)
            .unwrap();
        assert_eq!(effect, gift_effect(GiftType::Rose));

        assert!(ActionKind::DisplayMessage
            .local_effect(&ActionParams::new(), &event, &catalog)
            .is_err());
    }

    #[test]
    fn test_supports_device_kind() {
        let serial = DeviceKind::MicrocontrollerSerial {
            port: "COM3".into(),
            baud_rate: None,
        };
        assert!(ActionKind::SetColor.supports(&serial));
        assert!(!ActionKind::Twinkle.supports(&serial));
        assert!(!ActionKind::DisplayMessage.supports(&DeviceKind::LocalActuator));
        assert!(ActionKind::CameraCapture.supports(&DeviceKind::LocalActuator));
    }

    #[test]
    fn test_default_action_table() {
        let catalog = GiftCatalog::default();
        let (kind, params) = default_action(GiftType::Rose, &catalog);
        assert_eq!(kind, ActionKind::SetColor);
        assert_eq!(params.text("color"), Some("#ff69b4"));
        assert_eq!(params.millis("duration").unwrap(), Some(2000));

        let (kind, _) = default_action(GiftType::Heart, &catalog);
        assert_eq!(kind, ActionKind::LedRainbow);

        let (_, params) = default_action(GiftType::Rocket, &catalog);
        assert_eq!(params.percent("brightness").unwrap(), Some(50));
    }

    #[test]
    fn test_params_from_toml() {
        let params: ActionParams = toml::from_str("color = \"#00ff00\"\nbrightness = 0.75").unwrap();
        assert_eq!(params.color("color").unwrap(), Some(Rgb::new(0, 255, 0)));
        assert_eq!(params.fraction("brightness").unwrap(), Some(0.75));
    }

    #[test]
    fn test_brightness_scales_agree() {
        let level = |value: Value| ActionParams::new().with("brightness", value);

        let fractional = level(json!(0.3));
        assert_eq!(fractional.percent("brightness").unwrap(), Some(30));
        assert_eq!(fractional.fraction("brightness").unwrap(), Some(0.3));

        let full = level(json!(1));
        assert_eq!(full.percent("brightness").unwrap(), Some(100));
        assert_eq!(full.fraction("brightness").unwrap(), Some(1.0));

        let percent = level(json!(30));
        assert_eq!(percent.percent("brightness").unwrap(), Some(30));
        assert_eq!(percent.fraction("brightness").unwrap(), Some(0.3));

        assert_eq!(level(json!(250)).percent("brightness").unwrap(), Some(100));
        assert_eq!(level(json!(-5)).fraction("brightness").unwrap(), Some(0.0));
    }
}
