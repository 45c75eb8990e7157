//! Configuration
//!
//! Loaded from `<config_dir>/giftlink/config.toml` (or `--config`), then
//! overridden by `GIFTLINK_*` environment variables. A missing file means
//! defaults throughout.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::warn;

use giftlink_transport::protocol::{timing, DEFAULT_BAUD_RATE};
use giftlink_transport::LinkSettings;

use crate::action::ActionParams;
use crate::effect::{EffectSettings, Hardware, PwmPin};
use crate::error::GiftlinkError;
use crate::gift::{GiftCatalog, GiftInfo, GiftType};
use crate::registry::{DeviceKind, DEFAULT_MAX_DEVICES};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Install the default gift→action table onto this device (by name)
    pub default_bindings_device: Option<String>,
    pub serial: SerialConfig,
    pub dispatch: DispatchConfig,
    pub effects: EffectsConfig,
    /// Catalog overrides keyed by gift type (`ROSE`, `HEART`, ...)
    pub gifts: BTreeMap<String, GiftInfo>,
    pub devices: Vec<DeviceSeed>,
    pub bindings: Vec<BindingSeed>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_bindings_device: None,
            serial: SerialConfig::default(),
            dispatch: DispatchConfig::default(),
            effects: EffectsConfig::default(),
            gifts: BTreeMap::new(),
            devices: Vec::new(),
            bindings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub timeout_secs: u64,
    pub retry_count: u32,
    pub boot_delay_ms: u64,
    pub heartbeat_interval_secs: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_secs: timing::DEFAULT_TIMEOUT_SECS,
            retry_count: timing::DEFAULT_RETRY_COUNT,
            boot_delay_ms: timing::BOOT_DELAY_MS,
            heartbeat_interval_secs: timing::HEARTBEAT_INTERVAL_SECS,
        }
    }
}

impl SerialConfig {
    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            default_baud_rate: self.baud_rate,
            timeout: Duration::from_secs(self.timeout_secs),
            retry_count: self.retry_count,
            boot_delay: Duration::from_millis(self.boot_delay_ms),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Intake ring size; the oldest events are dropped past this
    pub intake_capacity: usize,
    /// Per-device backlog before gifts are rejected as busy
    pub device_queue: usize,
    pub http_timeout_secs: u64,
    pub max_devices: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            intake_capacity: 256,
            device_queue: 16,
            http_timeout_secs: 5,
            max_devices: DEFAULT_MAX_DEVICES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectsConfig {
    /// Drive logging stand-ins instead of real actuators
    pub simulate: bool,
    pub led_count: usize,
    /// PWM channel of the servo, e.g. `{ chip = 0, channel = 0 }`
    pub servo_pwm: Option<PwmPin>,
    /// PWM channel of a passive buzzer
    pub buzzer_pwm: Option<PwmPin>,
    pub photo_dir: PathBuf,
    pub sounds: BTreeMap<String, PathBuf>,
}

impl Default for EffectsConfig {
    fn default() -> Self {
        let settings = EffectSettings::default();
        Self {
            simulate: false,
            led_count: 60,
            servo_pwm: None,
            buzzer_pwm: None,
            photo_dir: settings.photo_dir,
            sounds: settings.sounds,
        }
    }
}

impl EffectsConfig {
    pub fn settings(&self) -> EffectSettings {
        EffectSettings {
            photo_dir: self.photo_dir.clone(),
            sounds: self
                .sounds
                .iter()
                .map(|(name, path)| (name.to_ascii_lowercase(), path.clone()))
                .collect(),
        }
    }

    /// Actuators attached to this host.
    ///
    /// A backend that fails to open is logged and left out, so effects
    /// needing it report the capability as unavailable.
    pub fn hardware(&self) -> Hardware {
        if self.simulate {
            return Hardware::simulated(self.led_count);
        }
        let hardware = Hardware::none();
        #[cfg(feature = "pwm")]
        let hardware = {
            use crate::effect::pwm::{PwmBuzzer, PwmServo};
            let mut hardware = hardware;
            if let Some(pin) = self.servo_pwm {
                match PwmServo::open(pin) {
                    Ok(servo) => hardware = hardware.with_servo(servo),
                    Err(e) => warn!("Servo unavailable: {}", e),
                }
            }
            if let Some(pin) = self.buzzer_pwm {
                match PwmBuzzer::open(pin) {
                    Ok(buzzer) => hardware = hardware.with_buzzer(buzzer),
                    Err(e) => warn!("Buzzer unavailable: {}", e),
                }
            }
            hardware
        };
        #[cfg(not(feature = "pwm"))]
        if self.servo_pwm.is_some() || self.buzzer_pwm.is_some() {
            warn!("PWM outputs configured but giftlink was built without the pwm feature");
        }
        hardware
    }
}

/// A device registered at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSeed {
    pub name: String,
    #[serde(flatten)]
    pub kind: DeviceKind,
    /// Connect the serial port right after registering
    #[serde(default)]
    pub auto_connect: bool,
}

/// A binding installed at startup; `device` is a device name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingSeed {
    pub gift_type: String,
    pub device: String,
    pub action: String,
    #[serde(default)]
    pub params: ActionParams,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("giftlink")
            .join("config.toml")
    }

    /// Load config from a file, or return default if not found
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config: Config =
                toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// [`load`](Self::load) followed by environment overrides
    pub fn load_with_env(path: &Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `GIFTLINK_*` overrides; unparsable values are logged and skipped
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parse<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            let raw = lookup(key)?;
            match raw.trim().parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring {}={:?}: cannot parse", key, raw);
                    None
                }
            }
        }

        if let Some(v) = parse(&lookup, "GIFTLINK_BAUD_RATE") {
            self.serial.baud_rate = v;
        }
        if let Some(v) = parse(&lookup, "GIFTLINK_SERIAL_TIMEOUT") {
            self.serial.timeout_secs = v;
        }
        if let Some(v) = parse(&lookup, "GIFTLINK_RETRY_COUNT") {
            self.serial.retry_count = v;
        }
        if let Some(v) = parse(&lookup, "GIFTLINK_HEARTBEAT_INTERVAL") {
            self.serial.heartbeat_interval_secs = v;
        }
        if let Some(v) = parse(&lookup, "GIFTLINK_MAX_DEVICES") {
            self.dispatch.max_devices = v;
        }
        if let Some(v) = parse(&lookup, "GIFTLINK_SIMULATE") {
            self.effects.simulate = v;
        }
    }

    /// Gift catalog with `[gifts]` overrides applied
    pub fn catalog(&self) -> Result<GiftCatalog, GiftlinkError> {
        let overrides = self
            .gifts
            .iter()
            .map(|(name, info)| {
                let gift_type: GiftType = name
                    .parse()
                    .map_err(|_| GiftlinkError::Config(format!("[gifts.{name}]: unknown gift type")))?;
                Ok((gift_type, info.clone()))
            })
            .collect::<Result<BTreeMap<_, _>, GiftlinkError>>()?;
        Ok(GiftCatalog::with_overrides(&overrides))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::Capability;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.serial.link_settings().timeout, Duration::from_secs(5));
        assert_eq!(config.serial.retry_count, 3);
        assert_eq!(config.serial.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.dispatch.max_devices, 10);
        assert_eq!(config.effects.led_count, 60);
        assert!(config.effects.sounds.contains_key("unicorn"));
    }

    #[test]
    fn test_no_actuators_unless_configured() {
        let effects = EffectsConfig::default();
        assert!(!effects.simulate);
        let hardware = effects.hardware();
        for capability in [
            Capability::LedStrip,
            Capability::Servo,
            Capability::Sound,
            Capability::Camera,
        ] {
            assert!(!hardware.supports(capability), "{capability} should be absent");
        }

        let simulated = EffectsConfig {
            simulate: true,
            ..EffectsConfig::default()
        };
        assert!(simulated.hardware().supports(Capability::Camera));
    }

    #[test]
    fn test_parse_pwm_pins() {
        let config: Config = toml::from_str(
            r#"
[effects]
servo_pwm = { chip = 0, channel = 1 }
"#,
        )
        .unwrap();
        assert_eq!(config.effects.servo_pwm, Some(PwmPin { chip: 0, channel: 1 }));
        assert_eq!(config.effects.buzzer_pwm, None);
        // The chip does not exist here, so the servo is simply left out
        let missing = EffectsConfig {
            servo_pwm: Some(PwmPin { chip: 250, channel: 0 }),
            ..EffectsConfig::default()
        };
        assert!(!missing.hardware().supports(Capability::Servo));
    }

    #[test]
    fn test_parse_full_config() {
        let toml_str = r##"
default_bindings_device = "strip"

[serial]
baud_rate = 115200
boot_delay_ms = 0

[effects]
led_count = 30

[gifts.ROSE]
name = "Red Rose"
value = 2
color = "#ff0000"

[[devices]]
name = "uno"
kind = "microcontroller_serial"
port = "/dev/ttyACM0"
auto_connect = true

[[devices]]
name = "strip"
kind = "local_actuator"

[[devices]]
name = "esp"
kind = "http"
host = "192.168.1.40"
port = 8080

[[bindings]]
gift_type = "ROSE"
device = "uno"
action = "set_color"
params = { color = "#ff69b4", brightness = 30 }
"##;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.serial.baud_rate, 115200);
        assert_eq!(config.serial.timeout_secs, 5);
        assert_eq!(config.effects.led_count, 30);
        assert_eq!(config.devices.len(), 3);
        assert!(config.devices[0].auto_connect);
        assert_eq!(config.devices[1].kind, DeviceKind::LocalActuator);
        assert_eq!(
            config.devices[2].kind,
            DeviceKind::NetworkHttp {
                host: "192.168.1.40".into(),
                port: 8080
            }
        );
        assert_eq!(config.bindings[0].params.percent("brightness").unwrap(), Some(30));
        assert!(config.bindings[0].enabled);

        let catalog = config.catalog().unwrap();
        assert_eq!(catalog.value(GiftType::Rose), 2);
        assert_eq!(catalog.value(GiftType::Star), 10);
    }

    #[test]
    fn test_unknown_gift_override_is_config_error() {
        let config: Config = toml::from_str("[gifts.LION]\nname = \"Lion\"\nvalue = 1\ncolor = \"#ffffff\"").unwrap();
        assert!(matches!(config.catalog(), Err(GiftlinkError::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        let env: BTreeMap<&str, &str> = [
            ("GIFTLINK_BAUD_RATE", "57600"),
            ("GIFTLINK_RETRY_COUNT", "5"),
            ("GIFTLINK_MAX_DEVICES", "many"),
            ("GIFTLINK_SIMULATE", "true"),
        ]
        .into_iter()
        .collect();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.serial.baud_rate, 57600);
        assert_eq!(config.serial.retry_count, 5);
        assert_eq!(config.dispatch.max_devices, 10);
        assert!(config.effects.simulate);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir()
            .join(format!("giftlink-config-{}", std::process::id()))
            .join("config.toml");
        let mut config = Config::default();
        config.serial.retry_count = 7;
        config.devices.push(DeviceSeed {
            name: "strip".into(),
            kind: DeviceKind::LocalActuator,
            auto_connect: false,
        });
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = Config::load(Path::new("/nonexistent/giftlink.toml")).unwrap();
        assert_eq!(config, Config::default());
    }
}
