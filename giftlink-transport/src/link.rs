//! Serial link manager
//!
//! Tracks one live connection per port. A command-response cycle holds the
//! port's async lock for its whole duration so two callers never interleave
//! their lines on the same wire; the blocking read runs on tokio's blocking
//! pool.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::port::{LinePort, PortOpener};
use crate::protocol::{is_handshake_ack, is_single_line, HANDSHAKE_PROBE, HEARTBEAT_PROBE};
use crate::types::{LinkSettings, LinkSnapshot, LinkStatus, PortInfo};

type Handle = Option<Box<dyn LinePort>>;

struct LinkState {
    status: LinkStatus,
    last_seen: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    open: bool,
}

/// One tracked port
struct Link {
    port: String,
    baud_rate: u32,
    io: Arc<tokio::sync::Mutex<Handle>>,
    state: Mutex<LinkState>,
}

impl Link {
    fn new(port: &str, baud_rate: u32, handle: Box<dyn LinePort>) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            io: Arc::new(tokio::sync::Mutex::new(Some(handle))),
            state: Mutex::new(LinkState {
                status: LinkStatus::Connected,
                last_seen: Some(Utc::now()),
                consecutive_failures: 0,
                open: true,
            }),
        }
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn snapshot(&self) -> LinkSnapshot {
        let state = self.state.lock();
        LinkSnapshot {
            port: self.port.clone(),
            baud_rate: self.baud_rate,
            status: state.status,
            last_seen: state.last_seen,
            consecutive_failures: state.consecutive_failures,
            open: state.open,
        }
    }

    fn record_success(&self) {
        let mut state = self.state.lock();
        state.status = LinkStatus::Connected;
        state.last_seen = Some(Utc::now());
        state.consecutive_failures = 0;
    }

    /// Returns true when the failure streak reached `retry_count`
    fn record_failure(&self, retry_count: u32) -> bool {
        let mut state = self.state.lock();
        state.status = LinkStatus::Error;
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        retry_count > 0 && state.consecutive_failures >= retry_count
    }

    async fn close(&self) {
        let handle = self.io.lock().await.take();
        drop(handle);
        let mut state = self.state.lock();
        state.open = false;
        state.status = LinkStatus::Disconnected;
    }
}

/// Owns every open serial connection
pub struct SerialLinkManager {
    opener: Arc<dyn PortOpener>,
    settings: LinkSettings,
    links: Mutex<BTreeMap<String, Arc<Link>>>,
}

impl SerialLinkManager {
    pub fn new(opener: Arc<dyn PortOpener>, settings: LinkSettings) -> Self {
        Self {
            opener,
            settings,
            links: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    /// Enumerate serial endpoints, ordered by device path
    pub fn list_ports(&self) -> Result<Vec<PortInfo>, TransportError> {
        let mut ports = self.opener.list_ports()?;
        ports.sort_by(|a, b| a.device.cmp(&b.device));
        Ok(ports)
    }

    /// Open `port`, wait for the board to boot, and handshake.
    ///
    /// An existing connection on the same port is closed first. On failure
    /// nothing is tracked and the freshly opened handle is released.
    pub async fn connect(&self, port: &str, baud_rate: Option<u32>) -> Result<(), TransportError> {
        let baud_rate = baud_rate.unwrap_or(self.settings.default_baud_rate);

        if self.disconnect(port).await {
            debug!("Replacing existing connection on {}", port);
        }

        let handle = self.open_and_handshake(port, baud_rate).await?;
        let replaced = self
            .links
            .lock()
            .insert(port.to_string(), Arc::new(Link::new(port, baud_rate, handle)));
        if let Some(old) = replaced {
            old.close().await;
        }

        info!("Connected to {} at {} baud", port, baud_rate);
        Ok(())
    }

    async fn open_and_handshake(
        &self,
        port: &str,
        baud_rate: u32,
    ) -> Result<Box<dyn LinePort>, TransportError> {
        let opener = Arc::clone(&self.opener);
        let timeout = self.settings.timeout;
        let name = port.to_string();
        let handle =
            tokio::task::spawn_blocking(move || opener.open(&name, baud_rate, timeout)).await??;

        if !self.settings.boot_delay.is_zero() {
            tokio::time::sleep(self.settings.boot_delay).await;
        }

        let name = port.to_string();
        tokio::task::spawn_blocking(move || handshake(&name, handle, timeout)).await?
    }

    /// Close and forget `port`. Returns false if it was not tracked.
    pub async fn disconnect(&self, port: &str) -> bool {
        let link = self.links.lock().remove(port);
        match link {
            Some(link) => {
                link.close().await;
                info!("Disconnected from {}", port);
                true
            }
            None => false,
        }
    }

    pub async fn disconnect_all(&self) {
        let links: Vec<Arc<Link>> = std::mem::take(&mut *self.links.lock())
            .into_values()
            .collect();
        for link in links {
            link.close().await;
            info!("Disconnected from {}", link.port);
        }
    }

    /// With a port: tracked and healthy. Without: anything tracked at all.
    pub fn is_connected(&self, port: Option<&str>) -> bool {
        let links = self.links.lock();
        match port {
            Some(port) => links
                .get(port)
                .is_some_and(|link| link.snapshot().status == LinkStatus::Connected),
            None => !links.is_empty(),
        }
    }

    pub fn status(&self, port: &str) -> Option<LinkSnapshot> {
        self.links.lock().get(port).map(|link| link.snapshot())
    }

    pub fn statuses(&self) -> Vec<LinkSnapshot> {
        self.links.lock().values().map(|link| link.snapshot()).collect()
    }

    /// Send one command line and wait for one response line.
    ///
    /// Without a port, the first tracked port with an open handle is used.
    /// Which port that is, when several are open, is unspecified.
    pub async fn send_command(
        &self,
        command: &str,
        port: Option<&str>,
    ) -> Result<String, TransportError> {
        if !is_single_line(command) {
            return Err(TransportError::InvalidCommand(command.to_string()));
        }
        let link = self.select_link(port)?;
        self.round_trip(&link, command).await
    }

    fn select_link(&self, port: Option<&str>) -> Result<Arc<Link>, TransportError> {
        let links = self.links.lock();
        match port {
            Some(port) => links
                .get(port)
                .cloned()
                .ok_or_else(|| TransportError::NotConnected(port.to_string())),
            None => links
                .values()
                .find(|link| link.is_open())
                .cloned()
                .ok_or_else(|| TransportError::NotConnected("no connected devices".to_string())),
        }
    }

    async fn round_trip(&self, link: &Arc<Link>, command: &str) -> Result<String, TransportError> {
        let guard = Arc::clone(&link.io).lock_owned().await;
        if guard.is_none() {
            return Err(TransportError::NotConnected(link.port.clone()));
        }

        let timeout = self.settings.timeout;
        let port = link.port.clone();
        let line = command.to_string();
        let (mut guard, result) = tokio::task::spawn_blocking(move || {
            let mut guard = guard;
            let result = match guard.as_mut() {
                Some(handle) => exchange(&port, handle.as_mut(), &line, timeout),
                None => Err(TransportError::NotConnected(port)),
            };
            (guard, result)
        })
        .await?;

        match &result {
            Ok(response) => {
                debug!("{} <- {:?} -> {:?}", link.port, command, response);
                link.record_success();
            }
            Err(e) => {
                warn!("{} <- {:?} failed: {}", link.port, command, e);
                if link.record_failure(self.settings.retry_count) {
                    warn!(
                        "Closing {} after {} consecutive failures",
                        link.port, self.settings.retry_count
                    );
                    guard.take();
                    link.state.lock().open = false;
                }
            }
        }
        result
    }

    /// Probe every tracked port once.
    ///
    /// Open ports get a HEARTBEAT; ports whose handle was closed after
    /// repeated failures get a reopen attempt. Ports are never dropped from
    /// tracking here.
    pub async fn heartbeat_sweep(&self) -> Vec<LinkSnapshot> {
        let links: Vec<Arc<Link>> = self.links.lock().values().cloned().collect();
        futures::future::join_all(links.iter().map(|link| self.probe(link))).await;
        links.iter().map(|link| link.snapshot()).collect()
    }

    async fn probe(&self, link: &Arc<Link>) {
        if link.is_open() {
            if let Err(e) = self.round_trip(link, HEARTBEAT_PROBE).await {
                debug!("Heartbeat on {} failed: {}", link.port, e);
            }
            return;
        }

        match self.open_and_handshake(&link.port, link.baud_rate).await {
            Ok(handle) => {
                *link.io.lock().await = Some(handle);
                link.state.lock().open = true;
                link.record_success();
                info!("Reopened {}", link.port);
            }
            Err(e) => {
                link.state.lock().status = LinkStatus::Error;
                debug!("Reopen of {} failed: {}", link.port, e);
            }
        }
    }
}

/// TEST the freshly opened port; any failure to get a greeting, I/O
/// included, is a failed handshake
fn handshake(
    port: &str,
    mut handle: Box<dyn LinePort>,
    timeout: Duration,
) -> Result<Box<dyn LinePort>, TransportError> {
    let response = handle
        .clear_input()
        .and_then(|()| handle.write_line(HANDSHAKE_PROBE))
        .and_then(|()| handle.read_line(timeout));
    let response = match response {
        Ok(response) => response,
        Err(e) => {
            warn!("{} handshake I/O error: {}", port, e);
            return Err(TransportError::HandshakeFailed {
                port: port.to_string(),
                response: None,
            });
        }
    };

    match response {
        Some(greeting) if is_handshake_ack(&greeting) => {
            debug!("{} handshake: {:?}", port, greeting);
            Ok(handle)
        }
        response => Err(TransportError::HandshakeFailed {
            port: port.to_string(),
            response: response.filter(|r| !r.is_empty()),
        }),
    }
}

fn exchange(
    port: &str,
    handle: &mut dyn LinePort,
    line: &str,
    timeout: Duration,
) -> Result<String, TransportError> {
    // A reply that missed its own deadline must not answer this command
    handle
        .clear_input()
        .map_err(|e| TransportError::io(port, &e))?;
    handle
        .write_line(line)
        .map_err(|e| TransportError::io(port, &e))?;
    match handle
        .read_line(timeout)
        .map_err(|e| TransportError::io(port, &e))?
    {
        Some(response) if !response.is_empty() => Ok(response),
        _ => Err(TransportError::NoResponse(port.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPorts;

    fn manager(ports: &MockPorts) -> SerialLinkManager {
        SerialLinkManager::new(
            Arc::new(ports.clone()),
            LinkSettings {
                boot_delay: Duration::ZERO,
                ..LinkSettings::default()
            },
        )
    }

    #[tokio::test]
    async fn test_connect_handshake_and_send() {
        let ports = MockPorts::new();
        ports.add_board("/dev/ttyACM0");
        let mgr = manager(&ports);

        mgr.connect("/dev/ttyACM0", None).await.unwrap();
        assert!(mgr.is_connected(Some("/dev/ttyACM0")));
        assert_eq!(mgr.status("/dev/ttyACM0").unwrap().baud_rate, 9600);

        let response = mgr.send_command("GIFT:ROSE", None).await.unwrap();
        assert_eq!(response, "OK");
        assert_eq!(ports.writes_to("/dev/ttyACM0"), vec!["TEST", "GIFT:ROSE"]);
    }

    #[tokio::test]
    async fn test_handshake_rejected_leaves_nothing_tracked() {
        let ports = MockPorts::new();
        ports.add_port("/dev/ttyUSB0", |_| Some("ERR".to_string()));
        let mgr = manager(&ports);

        let err = mgr.connect("/dev/ttyUSB0", Some(115200)).await.unwrap_err();
        assert!(matches!(err, TransportError::HandshakeFailed { ref response, .. } if response.as_deref() == Some("ERR")));
        assert!(!mgr.is_connected(None));
        assert_eq!(ports.live_handles("/dev/ttyUSB0"), 0);
    }

    #[tokio::test]
    async fn test_handshake_write_error_is_handshake_failure() {
        let ports = MockPorts::new();
        ports.add_board("/dev/ttyACM0");
        ports.fail_io("/dev/ttyACM0");
        let mgr = manager(&ports);

        let err = mgr.connect("/dev/ttyACM0", None).await.unwrap_err();
        assert_eq!(
            err,
            TransportError::HandshakeFailed {
                port: "/dev/ttyACM0".to_string(),
                response: None,
            }
        );
        assert!(mgr.statuses().is_empty());
        assert_eq!(ports.live_handles("/dev/ttyACM0"), 0);
    }

    #[tokio::test]
    async fn test_late_reply_is_discarded() {
        let ports = MockPorts::new();
        ports.add_port("/dev/ttyACM0", |cmd| match cmd {
            "TEST" => Some("OK".to_string()),
            "GIFT:STAR" => None,
            other => Some(format!("ACK {other}")),
        });
        let mgr = manager(&ports);
        mgr.connect("/dev/ttyACM0", None).await.unwrap();

        let err = mgr.send_command("GIFT:STAR", None).await;
        assert!(matches!(err, Err(TransportError::NoResponse(_))));
        // The board answers GIFT:STAR only after the read gave up
        ports.push_unread("/dev/ttyACM0", "ACK GIFT:STAR");

        let response = mgr.send_command("GIFT:ROSE", None).await.unwrap();
        assert_eq!(response, "ACK GIFT:ROSE");
        assert_eq!(ports.unread("/dev/ttyACM0"), 0);
    }

    #[tokio::test]
    async fn test_boot_noise_does_not_answer_handshake() {
        let ports = MockPorts::new();
        ports.add_port("/dev/ttyACM0", |_| None);
        ports.push_unread("/dev/ttyACM0", "OK");
        let mgr = manager(&ports);

        let err = mgr.connect("/dev/ttyACM0", None).await.unwrap_err();
        assert!(matches!(err, TransportError::HandshakeFailed { response: None, .. }));
    }

    #[tokio::test]
    async fn test_open_failure() {
        let ports = MockPorts::new();
        ports.add_board("/dev/ttyACM0");
        ports.fail_open("/dev/ttyACM0");
        let mgr = manager(&ports);

        let err = mgr.connect("/dev/ttyACM0", None).await.unwrap_err();
        assert!(matches!(err, TransportError::PortUnavailable { .. }));
        assert!(mgr.statuses().is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_replaces_connection() {
        let ports = MockPorts::new();
        ports.add_board("/dev/ttyACM0");
        let mgr = manager(&ports);

        mgr.connect("/dev/ttyACM0", None).await.unwrap();
        mgr.connect("/dev/ttyACM0", Some(115200)).await.unwrap();

        assert_eq!(mgr.statuses().len(), 1);
        assert_eq!(mgr.status("/dev/ttyACM0").unwrap().baud_rate, 115200);
        assert_eq!(ports.live_handles("/dev/ttyACM0"), 1);
    }

    #[tokio::test]
    async fn test_send_without_connection() {
        let ports = MockPorts::new();
        let mgr = manager(&ports);

        assert!(matches!(
            mgr.send_command("LED:CLEAR", None).await,
            Err(TransportError::NotConnected(_))
        ));
        assert!(matches!(
            mgr.send_command("LED:CLEAR", Some("/dev/ttyACM9")).await,
            Err(TransportError::NotConnected(p)) if p == "/dev/ttyACM9"
        ));
    }

    #[tokio::test]
    async fn test_multiline_command_rejected_before_write() {
        let ports = MockPorts::new();
        ports.add_board("/dev/ttyACM0");
        let mgr = manager(&ports);
        mgr.connect("/dev/ttyACM0", None).await.unwrap();

        let err = mgr.send_command("LED:CLEAR\nGIFT:ROSE", None).await;
        assert!(matches!(err, Err(TransportError::InvalidCommand(_))));
        assert_eq!(ports.writes_to("/dev/ttyACM0"), vec!["TEST"]);
    }

    #[tokio::test]
    async fn test_silence_counts_failures_and_closes_handle() {
        let ports = MockPorts::new();
        ports.add_board("/dev/ttyACM0");
        let mgr = manager(&ports);
        mgr.connect("/dev/ttyACM0", None).await.unwrap();

        ports.set_responder("/dev/ttyACM0", |_| None);
        for _ in 0..2 {
            let err = mgr.send_command("GIFT:STAR", Some("/dev/ttyACM0")).await;
            assert!(matches!(err, Err(TransportError::NoResponse(_))));
        }
        let snap = mgr.status("/dev/ttyACM0").unwrap();
        assert_eq!(snap.status, LinkStatus::Error);
        assert_eq!(snap.consecutive_failures, 2);
        assert!(snap.open);

        let _ = mgr.send_command("GIFT:STAR", Some("/dev/ttyACM0")).await;
        let snap = mgr.status("/dev/ttyACM0").unwrap();
        assert!(!snap.open);
        assert_eq!(ports.live_handles("/dev/ttyACM0"), 0);

        // Still tracked, but unusable until the heartbeat reopens it
        assert!(matches!(
            mgr.send_command("GIFT:STAR", Some("/dev/ttyACM0")).await,
            Err(TransportError::NotConnected(_))
        ));
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let ports = MockPorts::new();
        ports.add_board("/dev/ttyACM0");
        let mgr = manager(&ports);
        mgr.connect("/dev/ttyACM0", None).await.unwrap();

        ports.set_responder("/dev/ttyACM0", |_| None);
        let _ = mgr.send_command("GIFT:STAR", None).await;
        ports.set_responder("/dev/ttyACM0", |_| Some("OK".into()));
        mgr.send_command("GIFT:STAR", None).await.unwrap();

        let snap = mgr.status("/dev/ttyACM0").unwrap();
        assert_eq!(snap.status, LinkStatus::Connected);
        assert_eq!(snap.consecutive_failures, 0);
        assert!(snap.last_seen.is_some());
    }

    #[tokio::test]
    async fn test_heartbeat_marks_error_and_reopens() {
        let ports = MockPorts::new();
        ports.add_board("/dev/ttyACM0");
        ports.add_board("/dev/ttyACM1");
        let mgr = manager(&ports);
        mgr.connect("/dev/ttyACM0", None).await.unwrap();
        mgr.connect("/dev/ttyACM1", None).await.unwrap();

        ports.set_responder("/dev/ttyACM1", |_| None);
        let snaps = mgr.heartbeat_sweep().await;
        assert_eq!(snaps.len(), 2);
        assert_eq!(mgr.status("/dev/ttyACM0").unwrap().status, LinkStatus::Connected);
        assert_eq!(mgr.status("/dev/ttyACM1").unwrap().status, LinkStatus::Error);

        for _ in 0..2 {
            mgr.heartbeat_sweep().await;
        }
        assert!(!mgr.status("/dev/ttyACM1").unwrap().open);

        ports.add_board("/dev/ttyACM1");
        mgr.heartbeat_sweep().await;
        let snap = mgr.status("/dev/ttyACM1").unwrap();
        assert!(snap.open);
        assert_eq!(snap.status, LinkStatus::Connected);
        assert!(ports.writes_to("/dev/ttyACM0").contains(&"HEARTBEAT".to_string()));
    }

    #[tokio::test]
    async fn test_disconnect_and_disconnect_all() {
        let ports = MockPorts::new();
        ports.add_board("/dev/ttyACM0");
        ports.add_board("/dev/ttyACM1");
        let mgr = manager(&ports);
        mgr.connect("/dev/ttyACM0", None).await.unwrap();
        mgr.connect("/dev/ttyACM1", None).await.unwrap();

        assert!(mgr.disconnect("/dev/ttyACM0").await);
        assert!(!mgr.disconnect("/dev/ttyACM0").await);
        assert_eq!(ports.live_handles("/dev/ttyACM0"), 0);

        mgr.disconnect_all().await;
        assert!(!mgr.is_connected(None));
        assert_eq!(ports.live_handles("/dev/ttyACM1"), 0);
    }

    #[tokio::test]
    async fn test_list_ports_sorted() {
        let ports = MockPorts::new();
        ports.add_board("/dev/ttyUSB0");
        ports.add_board("/dev/ttyACM0");
        let mgr = manager(&ports);

        let devices: Vec<String> = mgr.list_ports().unwrap().into_iter().map(|p| p.device).collect();
        assert_eq!(devices, vec!["/dev/ttyACM0", "/dev/ttyUSB0"]);
    }

    #[tokio::test]
    async fn test_concurrent_commands_do_not_interleave() {
        let ports = MockPorts::new();
        ports.add_port("/dev/ttyACM0", |cmd| Some(format!("ACK {cmd}")));
        let mgr = Arc::new(manager(&ports));
        mgr.connect("/dev/ttyACM0", None).await.unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let mgr = Arc::clone(&mgr);
                tokio::spawn(async move { mgr.send_command(&format!("GIFT:{i}"), None).await })
            })
            .collect();
        for (i, task) in tasks.into_iter().enumerate() {
            assert_eq!(task.await.unwrap().unwrap(), format!("ACK GIFT:{i}"));
        }
    }
}
