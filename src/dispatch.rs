//! Gift dispatcher.
//!
//! Resolves a gift to its bound device action and carries it out on the
//! right backend: the serial link manager, a network device, or the local
//! effect engine. Every attempt ends in exactly one `action_executed`
//! notification; failures are reported, never propagated.
//!
//! Events enter through a bounded intake ring. The intake task routes each
//! event to a per-device worker with its own bounded queue, so a wedged
//! device only ever backs up its own queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use giftlink_transport::{LinkStatus, SerialLinkManager};

use crate::effect::{EffectEngine, EffectOutcome};
use crate::error::{FailureKind, GiftlinkError, Result};
use crate::gift::{GiftCatalog, GiftEvent};
use crate::notify::{ActionReport, BoxedSink, Notification, Outcome};
use crate::registry::{ActionBinding, ActionRegistry, DeviceDescriptor, DeviceKind, DeviceRegistry, DeviceStatus};
use crate::remote::{RemoteActuator, RemoteCommand};

/// Running totals, exposed in status snapshots
#[derive(Debug, Default)]
struct DispatchStats {
    received: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    no_op: AtomicU64,
    busy: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchCounters {
    pub received: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub no_op: u64,
    /// Rejected because the device queue was full
    pub busy: u64,
    /// Overwritten in the intake ring before they were read
    pub dropped: u64,
}

/// Everything the dispatcher talks to
pub struct DispatcherParts {
    pub devices: Arc<DeviceRegistry>,
    pub actions: Arc<ActionRegistry>,
    pub serial: Arc<SerialLinkManager>,
    pub effects: EffectEngine,
    pub remote: Arc<dyn RemoteActuator>,
    pub catalog: Arc<GiftCatalog>,
    pub sink: BoxedSink,
}

struct DispatcherInner {
    parts: DispatcherParts,
    device_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    stats: DispatchStats,
}

/// A resolved gift, ready to actuate
struct Job {
    event: GiftEvent,
    binding: ActionBinding,
    device: DeviceDescriptor,
}

impl Job {
    fn report(&self, outcome: Outcome) -> ActionReport {
        ActionReport {
            device_id: Some(self.device.id.clone()),
            device_name: Some(self.device.name.clone()),
            action: Some(self.binding.action),
            ..ActionReport::new(self.event.clone(), outcome)
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    pub fn new(parts: DispatcherParts) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                parts,
                device_locks: Mutex::new(HashMap::new()),
                stats: DispatchStats::default(),
            }),
        }
    }

    pub fn counters(&self) -> DispatchCounters {
        let s = &self.inner.stats;
        DispatchCounters {
            received: s.received.load(Ordering::Relaxed),
            succeeded: s.succeeded.load(Ordering::Relaxed),
            failed: s.failed.load(Ordering::Relaxed),
            no_op: s.no_op.load(Ordering::Relaxed),
            busy: s.busy.load(Ordering::Relaxed),
            dropped: s.dropped.load(Ordering::Relaxed),
        }
    }

    /// Dispatch one gift and wait for its outcome
    pub async fn dispatch(&self, event: GiftEvent) -> ActionReport {
        self.announce(&event);
        let report = match self.resolve(&event) {
            Ok(job) => self.execute(job).await,
            Err(report) => report,
        };
        self.publish_report(report.clone());
        report
    }

    fn announce(&self, event: &GiftEvent) {
        self.inner.stats.received.fetch_add(1, Ordering::Relaxed);
        self.inner
            .parts
            .sink
            .publish(Notification::GiftReceived { gift: event.clone() });
    }

    fn publish_report(&self, report: ActionReport) {
        let stats = &self.inner.stats;
        let counter = match report.outcome {
            Outcome::NoOp { .. } => &stats.no_op,
            Outcome::Success { .. } => &stats.succeeded,
            Outcome::Failed {
                kind: FailureKind::DeviceBusy,
                ..
            } => &stats.busy,
            Outcome::Failed { .. } => &stats.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.inner
            .parts
            .sink
            .publish(Notification::ActionExecuted(report));
    }

    /// Binding and device lookup. `Err` carries the final report.
    fn resolve(&self, event: &GiftEvent) -> std::result::Result<Job, ActionReport> {
        let parts = &self.inner.parts;
        let Some(binding) = parts.actions.get(event.gift_type) else {
            debug!("No action bound to {}", event.gift_type);
            return Err(ActionReport::new(
                event.clone(),
                Outcome::NoOp {
                    reason: format!("no action bound to {}", event.gift_type),
                },
            ));
        };

        let base = ActionReport {
            device_id: Some(binding.device_id.clone()),
            action: Some(binding.action),
            ..ActionReport::new(event.clone(), Outcome::NoOp { reason: String::new() })
        };
        if !binding.enabled {
            debug!("Binding for {} is disabled", event.gift_type);
            return Err(ActionReport {
                outcome: Outcome::NoOp {
                    reason: format!("binding for {} is disabled", event.gift_type),
                },
                ..base
            });
        }

        match parts.devices.get(&binding.device_id) {
            Some(device) => Ok(Job {
                event: event.clone(),
                binding,
                device,
            }),
            None => Err(ActionReport {
                outcome: GiftlinkError::DeviceNotFound(binding.device_id.clone()).into(),
                ..base
            }),
        }
    }

    fn device_lock(&self, device_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.inner
                .device_locks
                .lock()
                .entry(device_id.to_string())
                .or_default(),
        )
    }

    /// Drop per-device state once `device_id` is unregistered.
    ///
    /// A job already holding the old lock finishes with `DeviceNotFound`.
    pub fn forget_device(&self, device_id: &str) {
        self.inner.device_locks.lock().remove(device_id);
    }

    /// Actuate under the device's lock
    async fn execute(&self, job: Job) -> ActionReport {
        let lock = self.device_lock(&job.device.id);
        let _guard = lock.lock().await;

        let parts = &self.inner.parts;
        // The device may have been removed while this job waited
        if !parts.devices.contains(&job.device.id) {
            return job.report(GiftlinkError::DeviceNotFound(job.device.id.clone()).into());
        }

        match self.actuate(&job).await {
            Ok(result) => {
                parts.devices.record_gift(&job.device.id, job.event.gift_type);
                job.report(Outcome::Success { result })
            }
            Err(e) => {
                warn!(
                    "{} on {} ({}) failed: {}",
                    job.binding.action, job.device.name, job.device.id, e
                );
                job.report(e.into())
            }
        }
    }

    async fn actuate(&self, job: &Job) -> Result<String> {
        let parts = &self.inner.parts;
        let Job {
            event,
            binding,
            device,
        } = job;

        match &device.kind {
            DeviceKind::MicrocontrollerSerial { port, .. } => {
                let command = binding.action.serial_command(&binding.params, event)?;
                let response = parts
                    .serial
                    .send_command(&command.to_string(), Some(port))
                    .await;
                self.sync_port_status(port);
                Ok(response?)
            }
            DeviceKind::NetworkHttp { host, port } => {
                let command = RemoteCommand {
                    action: binding.action,
                    params: &binding.params,
                    gift: event,
                };
                let result = parts.remote.actuate(host, *port, &command).await;
                let status = match &result {
                    Ok(_) => DeviceStatus::Connected,
                    Err(_) => DeviceStatus::Error,
                };
                parts.devices.set_status(&device.id, status);
                result
            }
            DeviceKind::LocalActuator => {
                let effect = binding
                    .action
                    .local_effect(&binding.params, event, &parts.catalog)?;
                let name = effect.name();
                let duration = effect.duration();
                let single_shot = effect.is_single_shot();
                let handle = parts.effects.start(&device.id, effect)?;

                if !single_shot {
                    return Ok(format!("{name} started for {}ms", duration.as_millis()));
                }
                match handle.wait().await {
                    EffectOutcome::Completed { detail, .. } => Ok(detail.unwrap_or_else(|| name.to_string())),
                    EffectOutcome::Cancelled { .. } => Ok(format!("{name} superseded")),
                    EffectOutcome::Failed { error } => Err(GiftlinkError::Hardware(error)),
                }
            }
        }
    }

    /// Mirror the link manager's view of `port` onto its devices
    fn sync_port_status(&self, port: &str) {
        let parts = &self.inner.parts;
        let status = match parts.serial.status(port).map(|s| (s.status, s.open)) {
            Some((LinkStatus::Connected, true)) => DeviceStatus::Connected,
            Some((LinkStatus::Disconnected, _)) | None => DeviceStatus::Disconnected,
            Some(_) => DeviceStatus::Error,
        };
        parts.devices.set_port_status(port, status);
    }

    /// Start the intake task.
    ///
    /// `capacity` bounds the intake ring; when the router falls behind the
    /// oldest events are overwritten and counted as dropped. `device_queue`
    /// bounds each device's backlog; overflow is reported as `DeviceBusy`.
    /// The task ends, after draining every device queue, once all
    /// [`IntakeHandle`]s are dropped.
    pub fn spawn_intake(&self, capacity: usize, device_queue: usize) -> (IntakeHandle, JoinHandle<()>) {
        let (tx, mut rx) = broadcast::channel(capacity.max(1));
        let router = self.clone();
        let device_queue = device_queue.max(1);

        let task = tokio::spawn(async move {
            let mut workers: HashMap<String, Worker> = HashMap::new();
            loop {
                match rx.recv().await {
                    Ok(event) => router.route(&mut workers, event, device_queue),
                    Err(RecvError::Lagged(n)) => {
                        router.inner.stats.dropped.fetch_add(n, Ordering::Relaxed);
                        warn!("Intake overflow: dropped {} oldest gift events", n);
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            info!("Intake closed, draining {} device queues", workers.len());
            for (_, worker) in workers {
                drop(worker.tx);
                let _ = worker.task.await;
            }
        });

        (IntakeHandle { tx }, task)
    }

    fn route(&self, workers: &mut HashMap<String, Worker>, event: GiftEvent, device_queue: usize) {
        self.announce(&event);
        let job = match self.resolve(&event) {
            Ok(job) => job,
            Err(report) => {
                if report.failure_kind() == Some(FailureKind::DeviceNotFound) {
                    if let Some(id) = &report.device_id {
                        workers.remove(id);
                    }
                }
                self.publish_report(report);
                return;
            }
        };

        let device_id = job.device.id.clone();
        let worker = workers
            .entry(device_id.clone())
            .or_insert_with(|| Worker::spawn(self.clone(), device_queue));

        match worker.tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                warn!("{} queue full, rejecting {}", job.device.name, job.event.gift_type);
                let report = job.report(GiftlinkError::DeviceBusy(job.device.name.clone()).into());
                self.publish_report(report);
            }
            Err(TrySendError::Closed(job)) => {
                warn!("Worker for {} exited, restarting", device_id);
                let worker = Worker::spawn(self.clone(), device_queue);
                if let Err(e) = worker.tx.try_send(job) {
                    let job = e.into_inner();
                    let report = job.report(GiftlinkError::DeviceBusy(job.device.name.clone()).into());
                    self.publish_report(report);
                }
                workers.insert(device_id, worker);
            }
        }
    }
}

struct Worker {
    tx: mpsc::Sender<Job>,
    task: JoinHandle<()>,
}

impl Worker {
    fn spawn(dispatcher: Dispatcher, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity);
        let task = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let report = dispatcher.execute(job).await;
                dispatcher.publish_report(report);
            }
        });
        Self { tx, task }
    }
}

/// Producer side of the intake ring; never blocks
#[derive(Clone)]
pub struct IntakeHandle {
    tx: broadcast::Sender<GiftEvent>,
}

impl IntakeHandle {
    /// Queue an event. Returns false once the intake task has stopped.
    pub fn submit(&self, event: GiftEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}
