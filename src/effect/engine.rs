//! Effect runner.
//!
//! Slots are keyed by the actuator an effect drives, since every local
//! device shares the host's strip, servo, buzzer and camera. `start` cancels
//! whatever holds that actuator, plus any other run of the same device, and
//! chains the new run behind the old tasks, so two runs never write to the
//! same hardware at once and a device never has two runs. Runs check their
//! cancel token before every frame and wake from frame sleeps as soon as it
//! fires.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::hardware::Hardware;
use super::render;
use super::{Capability, Effect};
use crate::color::Rgb;
use crate::error::{GiftlinkError, Result};

/// Where effects find their files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectSettings {
    pub photo_dir: PathBuf,
    /// Sample name (lowercase) → sound file
    pub sounds: BTreeMap<String, PathBuf>,
}

impl Default for EffectSettings {
    fn default() -> Self {
        let sounds = ["rose", "heart", "star", "crown", "diamond", "rocket", "unicorn"]
            .into_iter()
            .map(|name| (name.to_string(), PathBuf::from(format!("sounds/{name}.wav"))))
            .collect();
        Self {
            photo_dir: PathBuf::from("photos"),
            sounds,
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EffectOutcome {
    Completed { frames: u64, detail: Option<String> },
    /// Superseded or stopped
    Cancelled { frames: u64 },
    Failed { error: String },
}

/// A running effect as seen from outside
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSnapshot {
    pub run_id: u64,
    pub device_id: String,
    pub effect: &'static str,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub frames: u64,
}

/// Most recent effect started on a device; `outcome` is `None` while running
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectSummary {
    pub run_id: u64,
    pub effect: &'static str,
    pub started_at: DateTime<Utc>,
    pub outcome: Option<EffectOutcome>,
}

/// Completion handle returned by [`EffectEngine::start`]
pub struct RunHandle {
    pub run_id: u64,
    done: oneshot::Receiver<EffectOutcome>,
}

impl RunHandle {
    pub async fn wait(self) -> EffectOutcome {
        self.done.await.unwrap_or(EffectOutcome::Failed {
            error: "effect task aborted".to_string(),
        })
    }
}

#[derive(Default)]
struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
}

#[derive(Clone, Default)]
struct CancelToken(Arc<CancelInner>);

impl CancelToken {
    fn cancel(&self) {
        self.0.flag.store(true, Ordering::Release);
        self.0.notify.notify_one();
    }

    fn is_cancelled(&self) -> bool {
        self.0.flag.load(Ordering::Acquire)
    }

    /// Sleep for `duration`; returns true if cancelled meanwhile
    async fn sleep(&self, duration: Duration) -> bool {
        let notified = self.0.notify.notified();
        if self.is_cancelled() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_cancelled(),
            _ = notified => true,
        }
    }
}

struct EffectRun {
    run_id: u64,
    device_id: String,
    effect: Effect,
    started_at: DateTime<Utc>,
    frames: AtomicU64,
}

impl EffectRun {
    fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            run_id: self.run_id,
            device_id: self.device_id.clone(),
            effect: self.effect.name(),
            started_at: self.started_at,
            duration_ms: self.effect.duration().as_millis() as u64,
            frames: self.frames.load(Ordering::Relaxed),
        }
    }
}

struct Slot {
    run: Arc<EffectRun>,
    cancel: CancelToken,
    task: JoinHandle<()>,
}

struct EngineInner {
    hardware: Hardware,
    settings: EffectSettings,
    slots: Mutex<HashMap<Capability, Slot>>,
    last: Mutex<HashMap<String, EffectSummary>>,
    next_run: AtomicU64,
    idle: Notify,
}

impl EngineInner {
    fn finish(&self, run: &EffectRun, outcome: &EffectOutcome) {
        {
            let capability = run.effect.capability();
            let mut slots = self.slots.lock();
            if slots
                .get(&capability)
                .is_some_and(|slot| slot.run.run_id == run.run_id)
            {
                slots.remove(&capability);
            }
        }
        if let Some(summary) = self.last.lock().get_mut(&run.device_id) {
            if summary.run_id == run.run_id {
                summary.outcome = Some(outcome.clone());
            }
        }
        self.idle.notify_waiters();
    }
}

/// Runs effects on local hardware, one slot per actuator
#[derive(Clone)]
pub struct EffectEngine {
    inner: Arc<EngineInner>,
}

impl EffectEngine {
    pub fn new(hardware: Hardware, settings: EffectSettings) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                hardware,
                settings,
                slots: Mutex::new(HashMap::new()),
                last: Mutex::new(HashMap::new()),
                next_run: AtomicU64::new(1),
                idle: Notify::new(),
            }),
        }
    }

    pub fn hardware(&self) -> &Hardware {
        &self.inner.hardware
    }

    /// Fails with `CapabilityUnavailable` if this host cannot render `effect`
    pub fn check_capability(&self, effect: &Effect) -> Result<()> {
        let capability = effect.capability();
        if self.inner.hardware.supports(capability) {
            Ok(())
        } else {
            Err(GiftlinkError::CapabilityUnavailable(format!(
                "{} needs a {}, none attached",
                effect.name(),
                capability
            )))
        }
    }

    /// Start `effect` on `device_id`.
    ///
    /// Supersedes the run holding the same actuator, whichever device owns
    /// it, and any other run of `device_id`.
    pub fn start(&self, device_id: &str, effect: Effect) -> Result<RunHandle> {
        self.check_capability(&effect)?;

        let capability = effect.capability();
        let run_id = self.inner.next_run.fetch_add(1, Ordering::Relaxed);
        let run = Arc::new(EffectRun {
            run_id,
            device_id: device_id.to_string(),
            effect,
            started_at: Utc::now(),
            frames: AtomicU64::new(0),
        });
        let cancel = CancelToken::default();
        let (done_tx, done) = oneshot::channel();

        let mut slots = self.inner.slots.lock();
        self.inner.last.lock().insert(
            device_id.to_string(),
            EffectSummary {
                run_id,
                effect: run.effect.name(),
                started_at: run.started_at,
                outcome: None,
            },
        );
        let superseded: Vec<Capability> = slots
            .iter()
            .filter(|(held, slot)| **held == capability || slot.run.device_id == device_id)
            .map(|(held, _)| *held)
            .collect();
        let previous: Vec<JoinHandle<()>> = superseded
            .into_iter()
            .filter_map(|held| slots.remove(&held))
            .map(|slot| {
                debug!(
                    "{}: {} (run {}) superseded by {} on {}",
                    slot.run.device_id,
                    slot.run.effect.name(),
                    slot.run.run_id,
                    run.effect.name(),
                    device_id
                );
                slot.cancel.cancel();
                slot.task
            })
            .collect();

        let ctx = RunContext {
            inner: Arc::clone(&self.inner),
            run: Arc::clone(&run),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(async move {
            for previous in previous {
                let _ = previous.await;
            }
            let outcome = ctx.execute().await;
            match &outcome {
                EffectOutcome::Failed { error } => {
                    warn!("{}: {} failed: {}", ctx.run.device_id, ctx.run.effect.name(), error)
                }
                other => debug!("{}: {} {:?}", ctx.run.device_id, ctx.run.effect.name(), other),
            }
            ctx.inner.finish(&ctx.run, &outcome);
            let _ = done_tx.send(outcome);
        });

        slots.insert(capability, Slot { run, cancel, task });
        Ok(RunHandle { run_id, done })
    }

    /// Cancel the effect running on `device_id`. Returns false if idle.
    pub fn stop(&self, device_id: &str) -> bool {
        let slots = self.inner.slots.lock();
        let mut stopped = false;
        for slot in slots.values().filter(|slot| slot.run.device_id == device_id) {
            slot.cancel.cancel();
            stopped = true;
        }
        stopped
    }

    pub fn stop_all(&self) {
        for slot in self.inner.slots.lock().values() {
            slot.cancel.cancel();
        }
    }

    /// Drop what is remembered about `device_id` once it is unregistered
    pub fn forget(&self, device_id: &str) {
        self.stop(device_id);
        self.inner.last.lock().remove(device_id);
    }

    pub fn active(&self, device_id: &str) -> Option<RunSnapshot> {
        self.inner
            .slots
            .lock()
            .values()
            .find(|slot| slot.run.device_id == device_id)
            .map(|slot| slot.run.snapshot())
    }

    pub fn active_runs(&self) -> Vec<RunSnapshot> {
        let mut runs: Vec<_> = self
            .inner
            .slots
            .lock()
            .values()
            .map(|slot| slot.run.snapshot())
            .collect();
        runs.sort_by_key(|r| r.run_id);
        runs
    }

    pub fn last_effect(&self, device_id: &str) -> Option<EffectSummary> {
        self.inner.last.lock().get(device_id).cloned()
    }

    pub fn last_effects(&self) -> BTreeMap<String, EffectSummary> {
        self.inner
            .last
            .lock()
            .iter()
            .map(|(device, summary)| (device.clone(), summary.clone()))
            .collect()
    }

    /// Wait until no effect is running
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.slots.lock().is_empty() {
                return;
            }
            notified.await;
        }
    }
}

// ── Rendering ────────────────────────────────────────────────────────

struct RunContext {
    inner: Arc<EngineInner>,
    run: Arc<EffectRun>,
    cancel: CancelToken,
}

fn failed(error: impl ToString) -> EffectOutcome {
    EffectOutcome::Failed {
        error: error.to_string(),
    }
}

impl RunContext {
    async fn execute(&self) -> EffectOutcome {
        if self.cancel.is_cancelled() {
            return EffectOutcome::Cancelled { frames: 0 };
        }

        match self.run.effect.clone() {
            Effect::SetColor { color, brightness } => {
                self.animate(Duration::ZERO, |_, _, len| {
                    render::fill(color.scale(brightness), len)
                })
                .await
            }
            Effect::Pulse { color, .. } => {
                self.animate(render::PULSE_FRAME, |step, _, len| {
                    render::pulse(color, step, len)
                })
                .await
            }
            Effect::Twinkle { color, .. } => {
                self.animate(render::TWINKLE_FRAME, |step, _, len| {
                    render::twinkle(color, step, len)
                })
                .await
            }
            Effect::Rainbow { .. } => {
                self.animate(render::RAINBOW_FRAME, |_, elapsed, len| {
                    render::rainbow(elapsed, len)
                })
                .await
            }
            Effect::Chase { color, .. } => {
                self.animate(render::CHASE_FRAME, |step, _, len| {
                    render::chase(color, step, len)
                })
                .await
            }
            Effect::Unicorn { .. } => {
                self.animate(render::UNICORN_FRAME, |_, elapsed, len| {
                    render::unicorn(elapsed, len)
                })
                .await
            }
            Effect::ServoMove { angle } => self.servo_move(angle).await,
            Effect::SoundPlay { name } => self.sound_play(&name).await,
            Effect::CameraCapture { filename } => self.camera_capture(filename).await,
        }
    }

    /// Render frames until the effect's duration elapses.
    ///
    /// A zero duration renders exactly one frame.
    async fn animate<F>(&self, interval: Duration, render: F) -> EffectOutcome
    where
        F: Fn(u64, f64, usize) -> Vec<Rgb>,
    {
        let Some(strip) = self.inner.hardware.strip.clone() else {
            return failed("no LED strip attached");
        };
        let duration = self.run.effect.duration();
        let start = Instant::now();
        let mut step = 0u64;

        loop {
            if self.cancel.is_cancelled() {
                return EffectOutcome::Cancelled { frames: step };
            }

            let elapsed = start.elapsed().as_secs_f64();
            let shown = {
                let mut strip = strip.lock();
                let pixels = render(step, elapsed, strip.len());
                strip.show(&pixels)
            };
            if let Err(e) = shown {
                return failed(e);
            }
            step += 1;
            self.run.frames.store(step, Ordering::Relaxed);

            if duration.is_zero() {
                break;
            }
            if self.cancel.sleep(interval).await {
                return EffectOutcome::Cancelled { frames: step };
            }
            if start.elapsed() >= duration {
                break;
            }
        }

        EffectOutcome::Completed {
            frames: step,
            detail: None,
        }
    }

    async fn servo_move(&self, angle: u8) -> EffectOutcome {
        let Some(servo) = self.inner.hardware.servo.clone() else {
            return failed("no servo attached");
        };
        let angle = angle.min(180);
        if let Err(e) = servo.lock().set_duty_cycle(render::servo_duty(angle)) {
            return failed(e);
        }
        self.run.frames.store(1, Ordering::Relaxed);

        let cancelled = self.cancel.sleep(render::SERVO_HOLD).await;
        // Always release, or the servo jitters while holding
        if let Err(e) = servo.lock().set_duty_cycle(0.0) {
            return failed(e);
        }
        if cancelled {
            EffectOutcome::Cancelled { frames: 1 }
        } else {
            EffectOutcome::Completed {
                frames: 1,
                detail: Some(format!("servo at {angle} degrees")),
            }
        }
    }

    async fn sound_play(&self, name: &str) -> EffectOutcome {
        let hardware = &self.inner.hardware;
        let sample = self
            .inner
            .settings
            .sounds
            .get(&name.to_ascii_lowercase())
            .filter(|path| path.exists());

        if let (Some(path), Some(player)) = (sample, hardware.player.as_ref()) {
            return match player.lock().play(path) {
                Ok(()) => EffectOutcome::Completed {
                    frames: 1,
                    detail: Some(format!("played {}", path.display())),
                },
                Err(e) => failed(e),
            };
        }

        let Some(buzzer) = hardware.buzzer.clone() else {
            return failed(format!("no sample for {name:?} and no buzzer attached"));
        };
        let mut beeps = 0u64;
        for _ in 0..render::BEEP_COUNT {
            if let Err(e) = buzzer.lock().set(true) {
                return failed(e);
            }
            let cancelled = self.cancel.sleep(render::BEEP_TONE).await;
            if let Err(e) = buzzer.lock().set(false) {
                return failed(e);
            }
            beeps += 1;
            self.run.frames.store(beeps, Ordering::Relaxed);
            if cancelled || self.cancel.sleep(render::BEEP_TONE).await {
                return EffectOutcome::Cancelled { frames: beeps };
            }
        }
        EffectOutcome::Completed {
            frames: beeps,
            detail: Some(format!("beeped {beeps} times")),
        }
    }

    async fn camera_capture(&self, filename: Option<String>) -> EffectOutcome {
        let Some(camera) = self.inner.hardware.camera.clone() else {
            return failed("no camera attached");
        };
        let path = photo_path(&self.inner.settings.photo_dir, filename.as_deref());

        let saved = tokio::task::spawn_blocking(move || -> std::result::Result<PathBuf, String> {
            let image = camera.lock().capture().map_err(|e| e.to_string())?;
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir).map_err(|e| format!("{}: {e}", dir.display()))?;
            }
            image
                .save(&path)
                .map_err(|e| format!("{}: {e}", path.display()))?;
            Ok(path)
        })
        .await;

        match saved {
            Ok(Ok(path)) => {
                info!("Photo saved to {}", path.display());
                self.run.frames.store(1, Ordering::Relaxed);
                EffectOutcome::Completed {
                    frames: 1,
                    detail: Some(path.display().to_string()),
                }
            }
            Ok(Err(e)) => failed(e),
            Err(e) => failed(e),
        }
    }
}

/// `photo_dir/<name>`, keeping only the file-name part of `filename`
fn photo_path(photo_dir: &Path, filename: Option<&str>) -> PathBuf {
    let name = filename
        .and_then(|f| Path::new(f).file_name())
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("gift_photo_{}.jpg", Utc::now().format("%Y%m%d_%H%M%S")));
    photo_dir.join(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::hardware::recording::{Frames, RecordingBuzzer, RecordingServo, RecordingStrip};
    use crate::effect::hardware::TestPatternCamera;

    fn strip_engine(len: usize) -> (EffectEngine, Frames) {
        let frames = Frames::default();
        let hardware = Hardware::none().with_strip(RecordingStrip {
            len,
            frames: Arc::clone(&frames),
        });
        (EffectEngine::new(hardware, EffectSettings::default()), frames)
    }

    const RED: Rgb = Rgb::new(255, 0, 0);
    const BLUE: Rgb = Rgb::new(0, 0, 255);

    #[tokio::test(start_paused = true)]
    async fn test_set_color_single_frame() {
        let (engine, frames) = strip_engine(4);
        let handle = engine
            .start("strip", Effect::SetColor { color: RED, brightness: 0.5 })
            .unwrap();

        assert_eq!(
            handle.wait().await,
            EffectOutcome::Completed { frames: 1, detail: None }
        );
        assert_eq!(frames.lock().as_slice(), &[vec![Rgb::new(127, 0, 0); 4]]);
        engine.wait_idle().await;
        assert!(engine.active("strip").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pulse_runs_for_duration() {
        let (engine, frames) = strip_engine(2);
        let handle = engine
            .start(
                "strip",
                Effect::Pulse {
                    color: RED,
                    duration: Duration::from_secs(1),
                },
            )
            .unwrap();

        assert_eq!(
            handle.wait().await,
            EffectOutcome::Completed { frames: 10, detail: None }
        );
        let frames = frames.lock();
        assert_eq!(frames[0], vec![RED.scale(0.1); 2]);
        assert_eq!(frames[4], vec![RED; 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_effect_preempts_running_one() {
        let (engine, frames) = strip_engine(3);
        let first = engine
            .start(
                "strip",
                Effect::Pulse {
                    color: RED,
                    duration: Duration::from_secs(3),
                },
            )
            .unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(engine.active("strip").unwrap().effect, "pulse");

        let second = engine
            .start("strip", Effect::SetColor { color: BLUE, brightness: 1.0 })
            .unwrap();

        assert_eq!(first.wait().await, EffectOutcome::Cancelled { frames: 3 });
        assert!(matches!(second.wait().await, EffectOutcome::Completed { .. }));

        // Nothing from the pulse is drawn after the replacement frame
        let frames = frames.lock();
        assert_eq!(frames.len(), 4);
        assert_eq!(frames.last().unwrap(), &vec![BLUE; 3]);

        let last = engine.last_effect("strip").unwrap();
        assert_eq!(last.effect, "set_color");
        assert!(matches!(last.outcome, Some(EffectOutcome::Completed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_within_a_frame() {
        let (engine, _frames) = strip_engine(3);
        let handle = engine
            .start("strip", Effect::Rainbow { duration: Duration::from_secs(10) })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let stopped_at = Instant::now();
        assert!(engine.stop("strip"));
        assert_eq!(handle.wait().await, EffectOutcome::Cancelled { frames: 2 });
        assert!(stopped_at.elapsed() < render::RAINBOW_FRAME);
        assert!(!engine.stop("strip"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_devices_sharing_the_strip_preempt_each_other() {
        let (engine, frames) = strip_engine(3);
        let rainbow = engine
            .start("strip", Effect::Rainbow { duration: Duration::from_secs(3) })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        let pulse = engine
            .start("arm", Effect::Pulse { color: RED, duration: Duration::from_secs(3) })
            .unwrap();
        assert_eq!(rainbow.wait().await, EffectOutcome::Cancelled { frames: 3 });
        tokio::time::sleep(Duration::from_millis(500)).await;

        let runs = engine.active_runs();
        assert_eq!(runs.len(), 1);
        assert_eq!((runs[0].device_id.as_str(), runs[0].effect), ("arm", "pulse"));
        assert!(engine.active("strip").is_none());

        // After the three rainbow frames only uniform pulse frames follow
        let frames = frames.lock();
        assert!(frames[3..]
            .iter()
            .all(|frame| frame.iter().all(|pixel| *pixel == frame[0])));
        drop(frames);

        let last = engine.last_effect("strip").unwrap();
        assert_eq!(last.outcome, Some(EffectOutcome::Cancelled { frames: 3 }));
        engine.stop("arm");
        assert!(matches!(pulse.wait().await, EffectOutcome::Cancelled { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_actuators_run_together() {
        let frames = Frames::default();
        let duties = Arc::new(Mutex::new(Vec::new()));
        let hardware = Hardware::none()
            .with_strip(RecordingStrip {
                len: 3,
                frames: Arc::clone(&frames),
            })
            .with_servo(RecordingServo(Arc::clone(&duties)));
        let engine = EffectEngine::new(hardware, EffectSettings::default());

        let chase = engine
            .start("strip", Effect::Chase { color: RED, duration: Duration::from_millis(500) })
            .unwrap();
        let servo = engine.start("arm", Effect::ServoMove { angle: 180 }).unwrap();
        assert_eq!(engine.active_runs().len(), 2);

        assert_eq!(chase.wait().await, EffectOutcome::Completed { frames: 10, detail: None });
        assert!(matches!(servo.wait().await, EffectOutcome::Completed { frames: 1, .. }));
        assert_eq!(duties.lock().as_slice(), &[12.0, 0.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_switching_actuator_cancels_its_own_run() {
        let frames = Frames::default();
        let hardware = Hardware::none()
            .with_strip(RecordingStrip {
                len: 2,
                frames: Arc::clone(&frames),
            })
            .with_servo(RecordingServo(Arc::default()));
        let engine = EffectEngine::new(hardware, EffectSettings::default());

        let twinkle = engine
            .start("kit", Effect::Twinkle { color: BLUE, duration: Duration::from_secs(2) })
            .unwrap();
        let servo = engine.start("kit", Effect::ServoMove { angle: 0 }).unwrap();

        assert!(matches!(twinkle.wait().await, EffectOutcome::Cancelled { .. }));
        assert!(matches!(servo.wait().await, EffectOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn test_forget_clears_last_effect() {
        let (engine, _frames) = strip_engine(2);
        engine
            .start("strip", Effect::SetColor { color: RED, brightness: 1.0 })
            .unwrap()
            .wait()
            .await;
        assert!(engine.last_effect("strip").is_some());

        engine.forget("strip");
        assert!(engine.last_effect("strip").is_none());
        assert!(engine.last_effects().is_empty());
    }

    #[tokio::test]
    async fn test_missing_hardware_is_capability_unavailable() {
        let engine = EffectEngine::new(Hardware::none(), EffectSettings::default());
        let err = engine
            .start("strip", Effect::SetColor { color: RED, brightness: 1.0 })
            .err()
            .unwrap();
        assert!(matches!(err, GiftlinkError::CapabilityUnavailable(_)));
        assert!(engine.last_effect("strip").is_none());

        let err = engine
            .start("cam", Effect::CameraCapture { filename: None })
            .err()
            .unwrap();
        assert!(matches!(err, GiftlinkError::CapabilityUnavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_servo_holds_then_releases() {
        let duties = Arc::new(Mutex::new(Vec::new()));
        let hardware = Hardware::none().with_servo(RecordingServo(Arc::clone(&duties)));
        let engine = EffectEngine::new(hardware, EffectSettings::default());

        let outcome = engine
            .start("arm", Effect::ServoMove { angle: 90 })
            .unwrap()
            .wait()
            .await;
        assert!(matches!(outcome, EffectOutcome::Completed { frames: 1, .. }));
        assert_eq!(duties.lock().as_slice(), &[7.0, 0.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sound_without_sample_beeps_buzzer() {
        let toggles = Arc::new(Mutex::new(Vec::new()));
        let hardware = Hardware::none().with_buzzer(RecordingBuzzer(Arc::clone(&toggles)));
        let settings = EffectSettings {
            sounds: BTreeMap::new(),
            ..EffectSettings::default()
        };
        let engine = EffectEngine::new(hardware, settings);

        let outcome = engine
            .start("buzzer", Effect::SoundPlay { name: "rose".into() })
            .unwrap()
            .wait()
            .await;
        assert!(matches!(outcome, EffectOutcome::Completed { frames: 3, .. }));
        assert_eq!(
            toggles.lock().as_slice(),
            &[true, false, true, false, true, false]
        );
    }

    #[tokio::test]
    async fn test_camera_capture_writes_jpeg() {
        let dir = std::env::temp_dir().join(format!("giftlink-photos-{}", std::process::id()));
        let hardware = Hardware::none().with_camera(TestPatternCamera::new(32, 24));
        let settings = EffectSettings {
            photo_dir: dir.clone(),
            ..EffectSettings::default()
        };
        let engine = EffectEngine::new(hardware, settings);

        let outcome = engine
            .start("cam", Effect::CameraCapture { filename: Some("../escape.jpg".into()) })
            .unwrap()
            .wait()
            .await;
        let expected = dir.join("escape.jpg");
        assert_eq!(
            outcome,
            EffectOutcome::Completed {
                frames: 1,
                detail: Some(expected.display().to_string())
            }
        );
        let img = image::open(&expected).unwrap();
        assert_eq!((img.width(), img.height()), (32, 24));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_photo_path_default_name() {
        let path = photo_path(Path::new("photos"), None);
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("gift_photo_") && name.ends_with(".jpg"));
        assert_eq!(path.parent().unwrap(), Path::new("photos"));
    }
}
