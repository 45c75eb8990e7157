//! Actuator traits and the simulated backends used when no GPIO is present.
//!
//! A [`Hardware`] bundle holds whatever this host actually has; an empty
//! slot means the matching effects report `CapabilityUnavailable`.

use std::path::Path;
use std::sync::Arc;

use image::{Rgb as Pixel, RgbImage};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::Capability;
use crate::color::Rgb;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{device}: {message}")]
pub struct HardwareError {
    pub device: &'static str,
    pub message: String,
}

impl HardwareError {
    pub fn new(device: &'static str, message: impl Into<String>) -> Self {
        Self {
            device,
            message: message.into(),
        }
    }
}

pub type HwResult<T> = std::result::Result<T, HardwareError>;

/// Addressable LED strip
pub trait LedStrip: Send {
    fn len(&self) -> usize;

    /// Latch one full frame; `pixels.len()` equals [`len`](Self::len)
    fn show(&mut self, pixels: &[Rgb]) -> HwResult<()>;
}

/// PWM servo output
pub trait Servo: Send {
    /// Duty cycle in percent; 0 releases the signal
    fn set_duty_cycle(&mut self, duty: f32) -> HwResult<()>;
}

/// On/off piezo buzzer
pub trait Buzzer: Send {
    fn set(&mut self, on: bool) -> HwResult<()>;
}

/// Plays sample files without blocking
pub trait SamplePlayer: Send {
    fn play(&mut self, path: &Path) -> HwResult<()>;
}

pub trait Camera: Send {
    fn capture(&mut self) -> HwResult<RgbImage>;
}

pub type Shared<T> = Arc<Mutex<T>>;

/// A PWM output: `/sys/class/pwm/pwmchip<chip>/pwm<channel>` on Linux
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PwmPin {
    pub chip: u32,
    pub channel: u32,
}

/// Actuators available on this host
#[derive(Clone, Default)]
pub struct Hardware {
    pub strip: Option<Shared<dyn LedStrip>>,
    pub servo: Option<Shared<dyn Servo>>,
    pub buzzer: Option<Shared<dyn Buzzer>>,
    pub player: Option<Shared<dyn SamplePlayer>>,
    pub camera: Option<Shared<dyn Camera>>,
}

impl Hardware {
    /// Nothing attached
    pub fn none() -> Self {
        Self::default()
    }

    /// Logging stand-ins for every actuator
    pub fn simulated(led_count: usize) -> Self {
        Self {
            strip: Some(Arc::new(Mutex::new(LogStrip::new(led_count)))),
            servo: Some(Arc::new(Mutex::new(LogServo))),
            buzzer: Some(Arc::new(Mutex::new(LogBuzzer))),
            player: Some(Arc::new(Mutex::new(LogPlayer))),
            camera: Some(Arc::new(Mutex::new(TestPatternCamera::new(640, 480)))),
        }
    }

    pub fn with_strip(mut self, strip: impl LedStrip + 'static) -> Self {
        self.strip = Some(Arc::new(Mutex::new(strip)));
        self
    }

    pub fn with_servo(mut self, servo: impl Servo + 'static) -> Self {
        self.servo = Some(Arc::new(Mutex::new(servo)));
        self
    }

    pub fn with_buzzer(mut self, buzzer: impl Buzzer + 'static) -> Self {
        self.buzzer = Some(Arc::new(Mutex::new(buzzer)));
        self
    }

    pub fn with_player(mut self, player: impl SamplePlayer + 'static) -> Self {
        self.player = Some(Arc::new(Mutex::new(player)));
        self
    }

    pub fn with_camera(mut self, camera: impl Camera + 'static) -> Self {
        self.camera = Some(Arc::new(Mutex::new(camera)));
        self
    }

    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::LedStrip => self.strip.is_some(),
            Capability::Servo => self.servo.is_some(),
            // Either a sample player or the buzzer fallback will do
            Capability::Sound => self.player.is_some() || self.buzzer.is_some(),
            Capability::Camera => self.camera.is_some(),
        }
    }
}

// ── Simulated backends ───────────────────────────────────────────────

/// Strip that keeps the last frame and logs at debug level
pub struct LogStrip {
    pixels: Vec<Rgb>,
    frames: u64,
}

impl LogStrip {
    pub fn new(len: usize) -> Self {
        Self {
            pixels: vec![Rgb::BLACK; len],
            frames: 0,
        }
    }
}

impl LedStrip for LogStrip {
    fn len(&self) -> usize {
        self.pixels.len()
    }

    fn show(&mut self, pixels: &[Rgb]) -> HwResult<()> {
        let n = self.pixels.len().min(pixels.len());
        self.pixels[..n].copy_from_slice(&pixels[..n]);
        self.frames += 1;
        debug!(
            "strip frame {}: first pixel {}",
            self.frames,
            pixels.first().copied().unwrap_or(Rgb::BLACK)
        );
        Ok(())
    }
}

pub struct LogServo;

impl Servo for LogServo {
    fn set_duty_cycle(&mut self, duty: f32) -> HwResult<()> {
        debug!("servo duty {:.2}%", duty);
        Ok(())
    }
}

pub struct LogBuzzer;

impl Buzzer for LogBuzzer {
    fn set(&mut self, on: bool) -> HwResult<()> {
        debug!("buzzer {}", if on { "on" } else { "off" });
        Ok(())
    }
}

pub struct LogPlayer;

impl SamplePlayer for LogPlayer {
    fn play(&mut self, path: &Path) -> HwResult<()> {
        info!("Playing {}", path.display());
        Ok(())
    }
}

/// Camera producing a fixed gradient image
pub struct TestPatternCamera {
    width: u32,
    height: u32,
}

impl TestPatternCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Camera for TestPatternCamera {
    fn capture(&mut self) -> HwResult<RgbImage> {
        let (w, h) = (self.width.max(1), self.height.max(1));
        Ok(RgbImage::from_fn(w, h, |x, y| {
            Pixel([(x * 255 / w) as u8, (y * 255 / h) as u8, 128])
        }))
    }
}

#[cfg(test)]
pub(crate) mod recording {
    use super::*;

    pub type Frames = Arc<Mutex<Vec<Vec<Rgb>>>>;

    /// Strip that keeps every frame it was shown
    pub struct RecordingStrip {
        pub len: usize,
        pub frames: Frames,
    }

    impl LedStrip for RecordingStrip {
        fn len(&self) -> usize {
            self.len
        }

        fn show(&mut self, pixels: &[Rgb]) -> HwResult<()> {
            self.frames.lock().push(pixels.to_vec());
            Ok(())
        }
    }

    pub struct RecordingServo(pub Arc<Mutex<Vec<f32>>>);

    impl Servo for RecordingServo {
        fn set_duty_cycle(&mut self, duty: f32) -> HwResult<()> {
            self.0.lock().push(duty);
            Ok(())
        }
    }

    pub struct RecordingBuzzer(pub Arc<Mutex<Vec<bool>>>);

    impl Buzzer for RecordingBuzzer {
        fn set(&mut self, on: bool) -> HwResult<()> {
            self.0.lock().push(on);
            Ok(())
        }
    }

    /// Servo whose driver always errors
    pub struct JammedServo;

    impl Servo for JammedServo {
        fn set_duty_cycle(&mut self, _duty: f32) -> HwResult<()> {
            Err(HardwareError::new("servo", "PWM write failed"))
        }
    }
}
