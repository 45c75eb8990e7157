//! Local effect engine.
//!
//! Renders timed LED animations and single-shot servo, sound and camera
//! actions on hardware attached to this host. Each actuator has one effect
//! slot; starting a new effect cancels whatever is running there.

pub mod engine;
pub mod hardware;
#[cfg(feature = "pwm")]
pub mod pwm;
pub mod render;
pub mod selftest;

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::color::Rgb;

pub use engine::{EffectEngine, EffectOutcome, EffectSettings, EffectSummary, RunHandle, RunSnapshot};
pub use hardware::{Hardware, PwmPin};
pub use selftest::{ComponentCheck, ComponentReport};

/// One renderable effect with its parameters
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum Effect {
    /// Single frame: every pixel `color` scaled by `brightness`
    SetColor { color: Rgb, brightness: f32 },
    Pulse { color: Rgb, duration: Duration },
    Twinkle { color: Rgb, duration: Duration },
    Rainbow { duration: Duration },
    Chase { color: Rgb, duration: Duration },
    Unicorn { duration: Duration },
    ServoMove { angle: u8 },
    SoundPlay { name: String },
    CameraCapture { filename: Option<String> },
}

/// Hardware an effect needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    LedStrip,
    Servo,
    Sound,
    Camera,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Capability::LedStrip => "LED strip",
            Capability::Servo => "servo",
            Capability::Sound => "sound output",
            Capability::Camera => "camera",
        })
    }
}

impl Effect {
    pub fn name(&self) -> &'static str {
        match self {
            Effect::SetColor { .. } => "set_color",
            Effect::Pulse { .. } => "pulse",
            Effect::Twinkle { .. } => "twinkle",
            Effect::Rainbow { .. } => "rainbow",
            Effect::Chase { .. } => "chase",
            Effect::Unicorn { .. } => "unicorn",
            Effect::ServoMove { .. } => "servo_move",
            Effect::SoundPlay { .. } => "sound_play",
            Effect::CameraCapture { .. } => "camera_capture",
        }
    }

    /// Animation length; zero for single-shot effects
    pub fn duration(&self) -> Duration {
        match self {
            Effect::Pulse { duration, .. }
            | Effect::Twinkle { duration, .. }
            | Effect::Rainbow { duration }
            | Effect::Chase { duration, .. }
            | Effect::Unicorn { duration } => *duration,
            _ => Duration::ZERO,
        }
    }

    /// True for effects that complete in one step rather than animate
    pub fn is_single_shot(&self) -> bool {
        self.duration().is_zero()
    }

    pub fn capability(&self) -> Capability {
        match self {
            Effect::ServoMove { .. } => Capability::Servo,
            Effect::SoundPlay { .. } => Capability::Sound,
            Effect::CameraCapture { .. } => Capability::Camera,
            _ => Capability::LedStrip,
        }
    }
}
