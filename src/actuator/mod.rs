// src/actuator/mod.rs
pub mod confirm;
pub mod controller;
pub mod safety;

use std::fmt;
use thiserror::Error;

use crate::hardware::HardwareError;

pub use confirm::{ChannelConfirmation, Confirmation};
pub use controller::{
    interpolate, mirrored_servo_angles, CollisionReport, PlateLoader, MAX_INTERPOLATION_STEPS, MIN_MOVE_SPEED,
};
pub use safety::SafetyProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actuator {
    Plate,
    Lid,
}

impl fmt::Display for Actuator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actuator::Plate => f.write_str("plate"),
            Actuator::Lid => f.write_str("lid"),
        }
    }
}

/// How an actuator travels to its target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MoveStyle {
    /// Fixed-size steps with a pause between them.
    #[default]
    Smooth,
    /// One command straight to the target.
    Direct,
}

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error(
        "Collision risk: cannot move {actuator} to {target} (plate at {plate_angle}, lid at {lid_angle}, profile '{profile}')"
    )]
    CollisionRisk {
        actuator: Actuator,
        target: f64,
        plate_angle: f64,
        lid_angle: f64,
        profile: String,
    },
    #[error("Unknown plate type '{name}' (available: {available:?})")]
    UnknownPlateType { name: String, available: Vec<String> },
    #[error("Move speed must be at least 0.01 degrees per step (got {0})")]
    InvalidSpeed(f64),
    #[error("Invalid angle or distance: {0}")]
    InvalidAngle(f64),
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),
    #[error("Sequence aborted: {0}")]
    Aborted(String),
}
