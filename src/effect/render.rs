//! Frame renderers.
//!
//! Pure functions from (step, elapsed time, strip length) to pixel colors.
//! The engine owns timing and cancellation; nothing here sleeps.

use std::time::Duration;

use crate::color::Rgb;

/// Brightness ramp swept by `pulse`
pub const PULSE_RAMP: [f32; 9] = [0.1, 0.3, 0.5, 0.7, 1.0, 0.7, 0.5, 0.3, 0.1];

pub const PULSE_FRAME: Duration = Duration::from_millis(100);
pub const TWINKLE_FRAME: Duration = Duration::from_millis(200);
pub const RAINBOW_FRAME: Duration = Duration::from_millis(100);
pub const CHASE_FRAME: Duration = Duration::from_millis(50);
pub const UNICORN_FRAME: Duration = Duration::from_millis(100);

/// How long the servo holds its position before the signal is released
pub const SERVO_HOLD: Duration = Duration::from_millis(500);

/// Buzzer fallback: this many beeps, each on then off for `BEEP_TONE`
pub const BEEP_COUNT: usize = 3;
pub const BEEP_TONE: Duration = Duration::from_millis(100);

// Hue speeds in degrees per second
const RAINBOW_SPEED: f64 = 50.0;
const UNICORN_SPEED: f64 = 30.0;
const UNICORN_PHASE: f64 = 240.0;
const UNICORN_SPAN: f64 = 120.0;
const UNICORN_SATURATION: f32 = 0.8;

pub fn fill(color: Rgb, len: usize) -> Vec<Rgb> {
    vec![color; len]
}

pub fn pulse(color: Rgb, step: u64, len: usize) -> Vec<Rgb> {
    let level = PULSE_RAMP[(step % PULSE_RAMP.len() as u64) as usize];
    fill(color.scale(level), len)
}

/// Even steps light every third pixel, odd steps blank the strip
pub fn twinkle(color: Rgb, step: u64, len: usize) -> Vec<Rgb> {
    if step % 2 == 1 {
        return fill(Rgb::BLACK, len);
    }
    (0..len)
        .map(|i| if i % 3 == 0 { color } else { Rgb::BLACK })
        .collect()
}

pub fn rainbow(elapsed_secs: f64, len: usize) -> Vec<Rgb> {
    (0..len)
        .map(|i| {
            let hue = (i as f64 * 360.0 / len as f64 + elapsed_secs * RAINBOW_SPEED) % 360.0;
            Rgb::from_hsv(hue as f32, 1.0, 1.0)
        })
        .collect()
}

/// One lit pixel at `step % len` with half-bright neighbours
pub fn chase(color: Rgb, step: u64, len: usize) -> Vec<Rgb> {
    let mut pixels = fill(Rgb::BLACK, len);
    if len == 0 {
        return pixels;
    }
    let pos = (step % len as u64) as usize;
    let dim = color.scale(0.5);
    if pos > 0 {
        pixels[pos - 1] = dim;
    }
    if pos + 1 < len {
        pixels[pos + 1] = dim;
    }
    pixels[pos] = color;
    pixels
}

pub fn unicorn(elapsed_secs: f64, len: usize) -> Vec<Rgb> {
    (0..len)
        .map(|i| {
            let hue = (UNICORN_PHASE
                + i as f64 * UNICORN_SPAN / len as f64
                + elapsed_secs * UNICORN_SPEED)
                % 360.0;
            Rgb::from_hsv(hue as f32, UNICORN_SATURATION, 1.0)
        })
        .collect()
}

/// PWM duty cycle (percent) for a hobby servo at `angle` degrees
pub fn servo_duty(angle: u8) -> f32 {
    2.0 + angle.min(180) as f32 / 18.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgb = Rgb::new(255, 0, 0);

    #[test]
    fn test_pulse_follows_ramp() {
        assert_eq!(pulse(RED, 0, 3), vec![Rgb::new(25, 0, 0); 3]);
        assert_eq!(pulse(RED, 4, 1), vec![RED]);
        // Wraps after the ninth frame
        assert_eq!(pulse(RED, 9, 1), pulse(RED, 0, 1));
    }

    #[test]
    fn test_twinkle_alternates() {
        let lit = twinkle(RED, 0, 7);
        let lit_idx: Vec<usize> = (0..7).filter(|&i| lit[i] == RED).collect();
        assert_eq!(lit_idx, vec![0, 3, 6]);
        assert!(twinkle(RED, 1, 7).iter().all(|&p| p == Rgb::BLACK));
    }

    #[test]
    fn test_chase_neighbours() {
        let frame = chase(RED, 3, 6);
        assert_eq!(frame[3], RED);
        assert_eq!(frame[2], RED.scale(0.5));
        assert_eq!(frame[4], RED.scale(0.5));
        assert_eq!(frame.iter().filter(|&&p| p == Rgb::BLACK).count(), 3);

        // Head at the ends keeps only the in-range neighbour
        let frame = chase(RED, 6, 6);
        assert_eq!(frame[0], RED);
        assert_eq!(frame[1], RED.scale(0.5));
        assert_eq!(frame[5], Rgb::BLACK);

        assert!(chase(RED, 0, 0).is_empty());
    }

    #[test]
    fn test_rainbow_moves_with_time() {
        let start = rainbow(0.0, 4);
        assert_eq!(start[0], Rgb::new(255, 0, 0));
        assert_eq!(start.len(), 4);
        // 2.4s at 50 deg/s shifts hue by 120 degrees
        assert_eq!(rainbow(2.4, 4)[0], Rgb::new(0, 255, 0));
    }

    #[test]
    fn test_unicorn_phase_and_saturation() {
        let frame = unicorn(0.0, 2);
        // Hue 240 at reduced saturation: blue with a white floor
        assert_eq!(frame[0], Rgb::from_hsv(240.0, 0.8, 1.0));
        assert!(frame[0].b == 255 && frame[0].r > 0);
        assert_eq!(frame[1], Rgb::from_hsv(300.0, 0.8, 1.0));
    }

    #[test]
    fn test_servo_duty() {
        assert_eq!(servo_duty(0), 2.0);
        assert_eq!(servo_duty(90), 7.0);
        assert_eq!(servo_duty(180), 12.0);
        assert_eq!(servo_duty(255), 12.0);
    }
}
