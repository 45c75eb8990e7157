//! Scripted in-memory serial ports
//!
//! Each port answers through a responder closure: it sees the command line
//! and returns the reply line, or `None` to stay silent. Silence is reported
//! as an immediate read timeout, so tests never sleep.
//!
//! Lines queued with [`MockPorts::push_unread`] sit in the port's input
//! buffer ahead of any reply until the link clears it.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::TransportError;
use crate::port::{LinePort, PortOpener};
use crate::protocol::HANDSHAKE_PROBE;
use crate::types::PortInfo;

type Responder = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

struct MockDevice {
    responder: Responder,
    fail_open: bool,
    fail_io: bool,
    unread: VecDeque<String>,
}

#[derive(Default)]
struct MockState {
    devices: BTreeMap<String, MockDevice>,
    writes: Vec<(String, String)>,
    live: BTreeMap<String, usize>,
    opens: BTreeMap<String, usize>,
}

/// A fake set of serial ports implementing [`PortOpener`]
#[derive(Clone, Default)]
pub struct MockPorts {
    state: Arc<Mutex<MockState>>,
}

impl MockPorts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a port answering with `responder`
    pub fn add_port<F>(&self, port: &str, responder: F)
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.state.lock().devices.insert(
            port.to_string(),
            MockDevice {
                responder: Arc::new(responder),
                fail_open: false,
                fail_io: false,
                unread: VecDeque::new(),
            },
        );
    }

    /// Add (or replace) a port that behaves like the stock firmware
    pub fn add_board(&self, port: &str) {
        self.add_port(port, |line| {
            let reply = if line == HANDSHAKE_PROBE {
                "ARDUINO READY"
            } else {
                "OK"
            };
            Some(reply.to_string())
        });
    }

    /// Swap the responder of an existing port; open handles see it at once
    pub fn set_responder<F>(&self, port: &str, responder: F)
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        if let Some(device) = self.state.lock().devices.get_mut(port) {
            device.responder = Arc::new(responder);
        }
    }

    /// Make future opens of `port` fail as if the OS refused it
    pub fn fail_open(&self, port: &str) {
        if let Some(device) = self.state.lock().devices.get_mut(port) {
            device.fail_open = true;
        }
    }

    /// Make every write to `port` fail, as if the cable was pulled
    pub fn fail_io(&self, port: &str) {
        if let Some(device) = self.state.lock().devices.get_mut(port) {
            device.fail_io = true;
        }
    }

    /// Put `line` in the input buffer of `port`, unrequested
    pub fn push_unread(&self, port: &str, line: &str) {
        if let Some(device) = self.state.lock().devices.get_mut(port) {
            device.unread.push_back(line.to_string());
        }
    }

    /// Lines still sitting unread in the input buffer of `port`
    pub fn unread(&self, port: &str) -> usize {
        self.state
            .lock()
            .devices
            .get(port)
            .map_or(0, |device| device.unread.len())
    }

    /// Every line written so far, as `(port, line)`
    pub fn writes(&self) -> Vec<(String, String)> {
        self.state.lock().writes.clone()
    }

    pub fn writes_to(&self, port: &str) -> Vec<String> {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|(p, _)| p == port)
            .map(|(_, line)| line.clone())
            .collect()
    }

    /// Handles currently open on `port`
    pub fn live_handles(&self, port: &str) -> usize {
        self.state.lock().live.get(port).copied().unwrap_or(0)
    }

    /// Total successful opens of `port`
    pub fn open_count(&self, port: &str) -> usize {
        self.state.lock().opens.get(port).copied().unwrap_or(0)
    }
}

impl PortOpener for MockPorts {
    fn list_ports(&self) -> Result<Vec<PortInfo>, TransportError> {
        Ok(self
            .state
            .lock()
            .devices
            .keys()
            .map(|device| PortInfo {
                device: device.clone(),
                description: "Mock board".to_string(),
                hwid: "MOCK".to_string(),
                manufacturer: None,
                product: None,
                serial_number: None,
            })
            .collect())
    }

    fn open(
        &self,
        port: &str,
        _baud_rate: u32,
        _timeout: Duration,
    ) -> Result<Box<dyn LinePort>, TransportError> {
        let mut state = self.state.lock();
        match state.devices.get(port) {
            Some(device) if !device.fail_open => {}
            Some(_) => {
                return Err(TransportError::PortUnavailable {
                    port: port.to_string(),
                    reason: "permission denied".to_string(),
                })
            }
            None => {
                return Err(TransportError::PortUnavailable {
                    port: port.to_string(),
                    reason: "no such device".to_string(),
                })
            }
        }
        *state.live.entry(port.to_string()).or_default() += 1;
        *state.opens.entry(port.to_string()).or_default() += 1;

        Ok(Box::new(MockLinePort {
            port: port.to_string(),
            state: Arc::clone(&self.state),
            pending: None,
        }))
    }
}

struct MockLinePort {
    port: String,
    state: Arc<Mutex<MockState>>,
    pending: Option<String>,
}

impl LinePort for MockLinePort {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let responder = {
            let mut state = self.state.lock();
            if state.devices.get(&self.port).is_some_and(|device| device.fail_io) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device disconnected"));
            }
            state.writes.push((self.port.clone(), line.to_string()));
            state
                .devices
                .get(&self.port)
                .map(|device| Arc::clone(&device.responder))
        };
        self.pending = responder.and_then(|respond| respond(line));
        Ok(())
    }

    fn read_line(&mut self, _timeout: Duration) -> io::Result<Option<String>> {
        let stale = self
            .state
            .lock()
            .devices
            .get_mut(&self.port)
            .and_then(|device| device.unread.pop_front());
        Ok(stale.or_else(|| self.pending.take()))
    }

    fn clear_input(&mut self) -> io::Result<()> {
        if let Some(device) = self.state.lock().devices.get_mut(&self.port) {
            device.unread.clear();
        }
        self.pending = None;
        Ok(())
    }
}

impl Drop for MockLinePort {
    fn drop(&mut self) {
        if let Some(count) = self.state.lock().live.get_mut(&self.port) {
            *count = count.saturating_sub(1);
        }
    }
}
