// src/motion/mod.rs
pub mod completion;
pub mod controller;

use std::fmt;
use thiserror::Error;

use crate::hardware::TransportError;

pub use completion::{CompletionOutcome, PollPolicy};
pub use controller::{BatchOutcome, ExecutionReport, MotionController, DOWN_HEIGHT, UP_HEIGHT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum MotionError {
    #[error("{axis} = {value} is outside bounds ({low} to {high})")]
    OutOfBounds { axis: Axis, value: f64, low: f64, high: f64 },
    #[error("No bounds configured for axis {0}")]
    AxisNotConfigured(Axis),
    #[error("Batch size must be at least 1")]
    InvalidBatchSize,
    #[error(
        "Batch {batch} of {total} failed after {} batches were sent: {source}",
        .completed.batches.len()
    )]
    BatchFailed {
        batch: usize,
        total: usize,
        /// Outcomes of the batches that went out before the failure.
        completed: ExecutionReport,
        source: TransportError,
    },
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}
