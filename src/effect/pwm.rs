//! Linux sysfs PWM backends for the servo and the buzzer
//!
//! A channel lives under `/sys/class/pwm/pwmchipN/pwmM`. It is exported on
//! open, then driven by writing decimal nanoseconds to `period` and
//! `duty_cycle`, and `0`/`1` to `enable`.

use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::hardware::{Buzzer, HardwareError, HwResult, PwmPin, Servo};

pub const SYSFS_PWM_ROOT: &str = "/sys/class/pwm";

/// 50 Hz, the usual hobby servo frame
pub const SERVO_PERIOD_NS: u64 = 20_000_000;
/// 2 kHz tone for a passive piezo
pub const BUZZER_PERIOD_NS: u64 = 500_000;

/// The kernel creates the channel directory asynchronously after export
const EXPORT_WAIT: Duration = Duration::from_millis(500);
const EXPORT_POLL: Duration = Duration::from_millis(10);

/// One exported PWM channel; disabled again on drop
pub struct PwmChannel {
    dir: PathBuf,
    period_ns: u64,
    device: &'static str,
}

impl PwmChannel {
    pub fn open(pin: PwmPin, period_ns: u64, device: &'static str) -> HwResult<Self> {
        Self::open_at(Path::new(SYSFS_PWM_ROOT), pin, period_ns, device)
    }

    /// Like [`open`](Self::open) with a different sysfs root
    pub fn open_at(root: &Path, pin: PwmPin, period_ns: u64, device: &'static str) -> HwResult<Self> {
        let chip_dir = root.join(format!("pwmchip{}", pin.chip));
        if !chip_dir.is_dir() {
            return Err(HardwareError::new(
                device,
                format!("{} not found", chip_dir.display()),
            ));
        }

        let channel = Self {
            dir: chip_dir.join(format!("pwm{}", pin.channel)),
            period_ns,
            device,
        };
        if !channel.dir.is_dir() {
            channel.write_path(&chip_dir.join("export"), pin.channel)?;
            let deadline = Instant::now() + EXPORT_WAIT;
            while !channel.dir.join("period").exists() {
                if Instant::now() >= deadline {
                    return Err(HardwareError::new(
                        device,
                        format!("{} did not appear after export", channel.dir.display()),
                    ));
                }
                thread::sleep(EXPORT_POLL);
            }
        }

        // duty_cycle may never exceed period, so clear it first
        channel.write("duty_cycle", 0)?;
        channel.write("period", period_ns)?;
        channel.write("enable", 1)?;
        info!("{} on {} ({} ns period)", device, channel.dir.display(), period_ns);
        Ok(channel)
    }

    /// Set the duty cycle as a percentage of the period
    pub fn set_duty_percent(&self, percent: f32) -> HwResult<()> {
        let duty_ns =
            (self.period_ns as f64 * f64::from(percent.clamp(0.0, 100.0)) / 100.0).round() as u64;
        debug!("{} duty {} ns", self.device, duty_ns);
        self.write("duty_cycle", duty_ns)
    }

    fn write(&self, attribute: &str, value: impl Display) -> HwResult<()> {
        self.write_path(&self.dir.join(attribute), value)
    }

    fn write_path(&self, path: &Path, value: impl Display) -> HwResult<()> {
        fs::write(path, value.to_string())
            .map_err(|e| HardwareError::new(self.device, format!("{}: {e}", path.display())))
    }
}

impl Drop for PwmChannel {
    fn drop(&mut self) {
        let _ = self.write("duty_cycle", 0);
        let _ = self.write("enable", 0);
    }
}

/// Hobby servo on a 50 Hz PWM channel
pub struct PwmServo(PwmChannel);

impl PwmServo {
    pub fn open(pin: PwmPin) -> HwResult<Self> {
        PwmChannel::open(pin, SERVO_PERIOD_NS, "servo").map(Self)
    }

    pub fn new(channel: PwmChannel) -> Self {
        Self(channel)
    }
}

impl Servo for PwmServo {
    fn set_duty_cycle(&mut self, duty: f32) -> HwResult<()> {
        self.0.set_duty_percent(duty)
    }
}

/// Passive piezo driven with a square wave
pub struct PwmBuzzer(PwmChannel);

impl PwmBuzzer {
    pub fn open(pin: PwmPin) -> HwResult<Self> {
        PwmChannel::open(pin, BUZZER_PERIOD_NS, "buzzer").map(Self)
    }

    pub fn new(channel: PwmChannel) -> Self {
        Self(channel)
    }
}

impl Buzzer for PwmBuzzer {
    fn set(&mut self, on: bool) -> HwResult<()> {
        self.0.set_duty_percent(if on { 50.0 } else { 0.0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_sysfs(name: &str, exported: bool) -> PathBuf {
        let root = std::env::temp_dir().join(format!("giftlink-pwm-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&root);
        let chip = root.join("pwmchip0");
        fs::create_dir_all(&chip).unwrap();
        if exported {
            fs::create_dir_all(chip.join("pwm1")).unwrap();
        }
        root
    }

    fn read(root: &Path, attribute: &str) -> String {
        fs::read_to_string(root.join("pwmchip0/pwm1").join(attribute)).unwrap()
    }

    const PIN: PwmPin = PwmPin { chip: 0, channel: 1 };

    #[test]
    fn test_servo_writes_period_and_duty() {
        let root = fake_sysfs("servo", true);
        let channel = PwmChannel::open_at(&root, PIN, SERVO_PERIOD_NS, "servo").unwrap();
        assert_eq!(read(&root, "period"), "20000000");
        assert_eq!(read(&root, "enable"), "1");

        let mut servo = PwmServo::new(channel);
        servo.set_duty_cycle(7.0).unwrap();
        assert_eq!(read(&root, "duty_cycle"), "1400000");

        drop(servo);
        assert_eq!(read(&root, "duty_cycle"), "0");
        assert_eq!(read(&root, "enable"), "0");
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_buzzer_square_wave() {
        let root = fake_sysfs("buzzer", true);
        let mut buzzer =
            PwmBuzzer::new(PwmChannel::open_at(&root, PIN, BUZZER_PERIOD_NS, "buzzer").unwrap());
        buzzer.set(true).unwrap();
        assert_eq!(read(&root, "duty_cycle"), "250000");
        buzzer.set(false).unwrap();
        assert_eq!(read(&root, "duty_cycle"), "0");
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_unexported_channel_is_exported_first() {
        let root = fake_sysfs("export", false);
        // No kernel behind the fake tree, so the channel never appears
        let err = PwmChannel::open_at(&root, PIN, SERVO_PERIOD_NS, "servo").err().unwrap();
        assert!(err.message.contains("did not appear"));
        assert_eq!(fs::read_to_string(root.join("pwmchip0/export")).unwrap(), "1");
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_missing_chip() {
        let root = fake_sysfs("missing", false);
        let pin = PwmPin { chip: 3, channel: 0 };
        let err = PwmChannel::open_at(&root, pin, SERVO_PERIOD_NS, "servo").err().unwrap();
        assert_eq!(err.device, "servo");
        let _ = fs::remove_dir_all(&root);
    }
}
