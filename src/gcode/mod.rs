// src/gcode/mod.rs - GRBL wire vocabulary and the command queue
pub mod status;

use std::fmt;

pub use status::{MachinePosition, MachineState, StatusReport};

/// Written on every new connection before anything else.
pub const WAKE_SEQUENCE: &[u8] = b"\r\n\r\n";
pub const HOMING_CYCLE: &[u8] = b"$H\n";
pub const STATUS_QUERY: &[u8] = b"?\n";
pub const SETTINGS_QUERY: &[u8] = b"$$\n";
pub const ALARM_UNLOCK: &[u8] = b"$X\n";
/// Ctrl-X.
pub const SOFT_RESET: &[u8] = &[0x18];

/// A single motion line understood by the firmware.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionCommand {
    /// Rapid move in the XY plane, machine coordinates.
    RapidXY { x: f64, y: f64 },
    /// Rapid move on Z only.
    RapidZ { z: f64 },
}

impl fmt::Display for MotionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotionCommand::RapidXY { x, y } => write!(f, "G0 X{} Y{}", x, y),
            MotionCommand::RapidZ { z } => write!(f, "G0 Z{}", z),
        }
    }
}

/// Ordered G-code lines waiting to be dispatched.
///
/// Nothing empties the queue implicitly: dispatching leaves it intact, and
/// the caller clears it before composing the next logical move.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandQueue {
    lines: Vec<String>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, command: MotionCommand) {
        let line = command.to_string();
        tracing::debug!("Queued: {}", line);
        self.lines.push(line);
    }

    /// Takes every line out, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<String> {
        std::mem::take(&mut self.lines)
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Consecutive batches of at most `batch_size` lines, each framed with a
    /// trailing newline per line, ready to write.
    pub fn batches(&self, batch_size: usize) -> Vec<String> {
        if batch_size == 0 {
            return Vec::new();
        }
        self.lines
            .chunks(batch_size)
            .map(|chunk| {
                let mut payload = chunk.join("\n");
                payload.push('\n');
                payload
            })
            .collect()
    }
}
