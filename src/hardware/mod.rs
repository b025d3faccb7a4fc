// src/hardware/mod.rs - Device seams consumed by the controllers
pub mod mock;
pub mod serial;

use thiserror::Error;

pub use serial::{discover_port, Connector, PortLease, SerialConnector, Transport, TransportError};

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("Servo channel {channel}: {reason}")]
    Servo { channel: u8, reason: String },
    #[error("Relay pin {pin}: {reason}")]
    Relay { pin: u8, reason: String },
}

/// PWM servo output, e.g. one channel of a PCA9685 board.
///
/// Angles are physical servo degrees (0-180 for the usual hobby servo).
pub trait ServoDriver: Send {
    fn set_angle(&mut self, channel: u8, degrees: f64) -> Result<(), HardwareError>;

    /// Stops the PWM signal; the servo no longer holds position.
    fn release(&mut self, channel: u8) -> Result<(), HardwareError>;
}

/// On/off GPIO relay.
pub trait RelayDriver: Send {
    fn set_state(&mut self, pin: u8, on: bool) -> Result<(), HardwareError>;
}
