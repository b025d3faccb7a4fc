//! In-memory stand-ins for the serial firmware, the servo board and the relay.
//!
//! `MockConnector` behaves like a GRBL controller at the line level: a `?`
//! query is answered with the next scripted status frame (or the default
//! one) followed by `ok`, and every G-code line written is acknowledged
//! with `ok`. All handles share state, so a test keeps one clone for
//! inspection and gives another to the controller.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use super::serial::{Connector, Transport, TransportError};
use super::{HardwareError, RelayDriver, ServoDriver};
use crate::gcode::{SETTINGS_QUERY, SOFT_RESET, STATUS_QUERY, WAKE_SEQUENCE};

pub const MOCK_BANNER: &str = "Grbl 1.1h ['$' for help]";
pub const MOCK_IDLE_STATUS: &str = "<Idle|MPos:0.000,0.000,0.000|FS:0,0>";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
struct FirmwareState {
    writes: Vec<Vec<u8>>,
    opens: usize,
    statuses: VecDeque<String>,
    default_status: String,
    settings_reply: Vec<String>,
    inbox: VecDeque<String>,
    fail_open: bool,
    fail_write: bool,
    command_limit: Option<usize>,
}

impl Default for FirmwareState {
    fn default() -> Self {
        Self {
            writes: Vec::new(),
            opens: 0,
            statuses: VecDeque::new(),
            default_status: MOCK_IDLE_STATUS.to_string(),
            settings_reply: vec!["$0=10".to_string(), "ok".to_string()],
            inbox: VecDeque::new(),
            fail_open: false,
            fail_write: false,
            command_limit: None,
        }
    }
}

fn is_command(bytes: &[u8]) -> bool {
    bytes != WAKE_SEQUENCE && bytes != STATUS_QUERY
}

impl FirmwareState {
    fn accepts(&self, bytes: &[u8]) -> bool {
        if self.fail_write {
            return false;
        }
        match self.command_limit {
            Some(limit) if is_command(bytes) => {
                self.writes.iter().filter(|w| is_command(w)).count() < limit
            }
            _ => true,
        }
    }

    fn respond(&mut self, bytes: &[u8]) {
        if bytes == WAKE_SEQUENCE || bytes == SOFT_RESET {
            self.inbox.push_back(MOCK_BANNER.to_string());
        } else if bytes == STATUS_QUERY {
            let reply = self
                .statuses
                .pop_front()
                .unwrap_or_else(|| self.default_status.clone());
            // An empty scripted reply models a firmware that stays silent.
            if !reply.is_empty() {
                self.inbox.push_back(reply);
                self.inbox.push_back("ok".to_string());
            }
        } else if bytes == SETTINGS_QUERY {
            self.inbox.extend(self.settings_reply.iter().cloned());
        } else {
            let text = String::from_utf8_lossy(bytes);
            for _ in text.lines().filter(|l| !l.trim().is_empty()) {
                self.inbox.push_back("ok".to_string());
            }
        }
    }
}

/// Scripted GRBL firmware reachable through [`Connector`].
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<FirmwareState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replies handed out to the next `?` queries, in order. An empty
    /// string produces no reply at all.
    pub fn script_statuses<I, S>(&self, replies: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = lock(&self.state);
        for reply in replies {
            state.statuses.push_back(reply.into());
        }
    }

    /// Reply used once the scripted replies run out.
    pub fn set_default_status(&self, reply: impl Into<String>) {
        lock(&self.state).default_status = reply.into();
    }

    /// Lines sent back for `$$`. An empty list keeps the firmware silent.
    pub fn set_settings_reply<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.state).settings_reply = lines.into_iter().map(Into::into).collect();
    }

    pub fn fail_open(&self, fail: bool) {
        lock(&self.state).fail_open = fail;
    }

    pub fn fail_write(&self, fail: bool) {
        lock(&self.state).fail_write = fail;
    }

    /// Lets `limit` command writes through, then fails the rest. Wake and
    /// status writes are unaffected. `None` lifts the limit.
    pub fn fail_commands_after(&self, limit: Option<usize>) {
        lock(&self.state).command_limit = limit;
    }

    /// Number of connections opened so far.
    pub fn opens(&self) -> usize {
        lock(&self.state).opens
    }

    /// Every write, decoded lossily.
    pub fn writes(&self) -> Vec<String> {
        lock(&self.state)
            .writes
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }

    /// Writes other than the wake sequence and status queries.
    pub fn command_writes(&self) -> Vec<String> {
        lock(&self.state)
            .writes
            .iter()
            .filter(|w| is_command(w))
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }

    pub fn status_queries(&self) -> usize {
        lock(&self.state)
            .writes
            .iter()
            .filter(|w| w.as_slice() == STATUS_QUERY)
            .count()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self) -> Result<Box<dyn Transport>, TransportError> {
        let mut state = lock(&self.state);
        if state.fail_open {
            return Err(TransportError::Open {
                port: "mock".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "mock port unavailable"),
            });
        }
        state.opens += 1;
        state.inbox.clear();
        Ok(Box::new(MockTransport { state: self.state.clone() }))
    }

    fn describe(&self) -> String {
        "mock firmware".to_string()
    }
}

/// One open connection to the mock firmware.
pub struct MockTransport {
    state: Arc<Mutex<FirmwareState>>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if !state.accepts(bytes) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock write failure",
            )));
        }
        state.writes.push(bytes.to_vec());
        state.respond(bytes);
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String, TransportError> {
        Ok(lock(&self.state).inbox.pop_front().unwrap_or_default())
    }

    async fn read_available(&mut self) -> Result<String, TransportError> {
        let mut state = lock(&self.state);
        let lines: Vec<String> = state.inbox.drain(..).collect();
        Ok(lines.join("\r\n"))
    }

    async fn discard_input(&mut self) -> Result<(), TransportError> {
        lock(&self.state).inbox.clear();
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ServoLog {
    commands: Vec<(u8, f64)>,
    current: HashMap<u8, f64>,
    released: Vec<u8>,
    fail: bool,
    failing_channel: Option<u8>,
}

impl ServoLog {
    fn check(&self, channel: u8) -> Result<(), HardwareError> {
        if self.fail || self.failing_channel == Some(channel) {
            return Err(HardwareError::Servo { channel, reason: "mock failure".to_string() });
        }
        Ok(())
    }
}

/// [`ServoDriver`] that records every command.
#[derive(Debug, Clone, Default)]
pub struct RecordingServos {
    log: Arc<Mutex<ServoLog>>,
}

impl RecordingServos {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<(u8, f64)> {
        lock(&self.log).commands.clone()
    }

    /// Angles commanded on one channel, oldest first.
    pub fn commands_for(&self, channel: u8) -> Vec<f64> {
        lock(&self.log)
            .commands
            .iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, a)| *a)
            .collect()
    }

    /// Angle currently held, `None` if never set or released.
    pub fn angle(&self, channel: u8) -> Option<f64> {
        lock(&self.log).current.get(&channel).copied()
    }

    pub fn released(&self) -> Vec<u8> {
        lock(&self.log).released.clone()
    }

    pub fn clear(&self) {
        let mut log = lock(&self.log);
        log.commands.clear();
        log.released.clear();
    }

    /// Makes every later command fail.
    pub fn fail(&self, fail: bool) {
        lock(&self.log).fail = fail;
    }

    /// Makes later commands fail on one channel only; `None` clears it.
    pub fn fail_channel(&self, channel: Option<u8>) {
        lock(&self.log).failing_channel = channel;
    }
}

impl ServoDriver for RecordingServos {
    fn set_angle(&mut self, channel: u8, degrees: f64) -> Result<(), HardwareError> {
        let mut log = lock(&self.log);
        log.check(channel)?;
        log.commands.push((channel, degrees));
        log.current.insert(channel, degrees);
        Ok(())
    }

    fn release(&mut self, channel: u8) -> Result<(), HardwareError> {
        let mut log = lock(&self.log);
        log.check(channel)?;
        log.released.push(channel);
        log.current.remove(&channel);
        Ok(())
    }
}

/// [`RelayDriver`] that records every state change.
#[derive(Debug, Clone, Default)]
pub struct RecordingRelay {
    states: Arc<Mutex<Vec<(u8, bool)>>>,
}

impl RecordingRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn states(&self) -> Vec<(u8, bool)> {
        lock(&self.states).clone()
    }

    pub fn is_on(&self, pin: u8) -> Option<bool> {
        lock(&self.states)
            .iter()
            .rev()
            .find(|(p, _)| *p == pin)
            .map(|(_, on)| *on)
    }
}

impl RelayDriver for RecordingRelay {
    fn set_state(&mut self, pin: u8, on: bool) -> Result<(), HardwareError> {
        lock(&self.states).push((pin, on));
        Ok(())
    }
}
