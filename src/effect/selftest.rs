//! Component self-test: exercise each attached actuator once

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use super::engine::{EffectEngine, EffectOutcome};
use super::{Capability, Effect};
use crate::color::Rgb;

/// Device id the self-test runs under
pub const SELF_TEST_DEVICE: &str = "self-test";
pub const SELF_TEST_PHOTO: &str = "self_test.jpg";
pub const SELF_TEST_SOUND: &str = "beep";
const LED_HOLD: Duration = Duration::from_secs(1);
const GREEN: Rgb = Rgb::new(0, 255, 0);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ComponentCheck {
    Passed { detail: Option<String> },
    Failed { error: String },
    /// Not attached to this host
    Unavailable,
}

impl ComponentCheck {
    pub fn is_failed(&self) -> bool {
        matches!(self, ComponentCheck::Failed { .. })
    }
}

impl From<EffectOutcome> for ComponentCheck {
    fn from(outcome: EffectOutcome) -> Self {
        match outcome {
            EffectOutcome::Completed { detail, .. } => ComponentCheck::Passed { detail },
            EffectOutcome::Failed { error } => ComponentCheck::Failed { error },
            EffectOutcome::Cancelled { .. } => ComponentCheck::Failed {
                error: "interrupted by another effect".to_string(),
            },
        }
    }
}

pub type ComponentReport = BTreeMap<Capability, ComponentCheck>;

impl EffectEngine {
    /// Exercise every actuator in turn.
    ///
    /// LED strip green at half brightness for a second then dark, servo to
    /// 90 degrees, one sound and one photo. Anything running on the
    /// actuators is superseded.
    pub async fn self_test(&self) -> ComponentReport {
        let mut report = ComponentReport::new();

        report.insert(
            Capability::LedStrip,
            self.check_step(&[
                Effect::SetColor {
                    color: GREEN,
                    brightness: 0.5,
                },
                Effect::SetColor {
                    color: Rgb::BLACK,
                    brightness: 0.0,
                },
            ])
            .await,
        );
        report.insert(
            Capability::Servo,
            self.check_step(&[Effect::ServoMove { angle: 90 }]).await,
        );
        report.insert(
            Capability::Sound,
            self.check_step(&[Effect::SoundPlay {
                name: SELF_TEST_SOUND.to_string(),
            }])
            .await,
        );
        report.insert(
            Capability::Camera,
            self.check_step(&[Effect::CameraCapture {
                filename: Some(SELF_TEST_PHOTO.to_string()),
            }])
            .await,
        );

        for (component, check) in &report {
            match check {
                ComponentCheck::Failed { error } => warn!("Self-test {}: {}", component, error),
                other => info!("Self-test {}: {:?}", component, other),
            }
        }
        report
    }

    /// Run `effects` back to back; LED steps are held for a second in between
    async fn check_step(&self, effects: &[Effect]) -> ComponentCheck {
        let mut check = ComponentCheck::Unavailable;
        for (i, effect) in effects.iter().enumerate() {
            let handle = match self.start(SELF_TEST_DEVICE, effect.clone()) {
                Ok(handle) => handle,
                Err(_) => return ComponentCheck::Unavailable,
            };
            check = handle.wait().await.into();
            if check.is_failed() {
                return check;
            }
            if i + 1 < effects.len() {
                tokio::time::sleep(LED_HOLD).await;
            }
        }
        check
    }
}
