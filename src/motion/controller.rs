// src/motion/controller.rs - Bounds-checked G-code motion over a leased serial port
use tokio::time::sleep;

use crate::config::{AxisBounds, MachineConfig, TimingConfig};
use crate::gcode::{
    status, CommandQueue, MachinePosition, MachineState, MotionCommand, StatusReport, ALARM_UNLOCK,
    HOMING_CYCLE, SOFT_RESET, STATUS_QUERY,
};
use crate::hardware::{Connector, PortLease, TransportError};
use crate::motion::completion::{wait_for_idle, CompletionOutcome, PollPolicy};
use crate::motion::{Axis, MotionError};

/// Lines written per batch unless the caller asks otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Fixed tool heights used by [`MotionController::move_down`] and
/// [`MotionController::move_up`].
pub const DOWN_HEIGHT: f64 = -33.5;
pub const UP_HEIGHT: f64 = 0.0;

/// Result of dispatching one batch of queued lines.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub lines: usize,
    pub completion: CompletionOutcome,
    /// The line the firmware sent back after the batch settled.
    pub echo: String,
}

/// Result of [`MotionController::execute_queue`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionReport {
    pub batches: Vec<BatchOutcome>,
}

impl ExecutionReport {
    pub fn echoes(&self) -> Vec<&str> {
        self.batches.iter().map(|b| b.echo.as_str()).collect()
    }

    /// False if any batch only had its completion assumed.
    pub fn all_confirmed(&self) -> bool {
        self.batches.iter().all(|b| b.completion.is_confirmed())
    }
}

/// Drives one GRBL-class motion controller.
///
/// Every operation that talks to the firmware leases its own connection
/// (open, wake, use, release). Moves are validated against the machine's
/// logical bounds and only then shifted by the configured offsets.
///
/// Two controllers pointed at the same device will not coordinate.
pub struct MotionController {
    connector: Box<dyn Connector>,
    machine: MachineConfig,
    timing: TimingConfig,
    policy: PollPolicy,
    queue: CommandQueue,
}

impl MotionController {
    pub fn new(connector: Box<dyn Connector>, machine: MachineConfig, timing: TimingConfig) -> Self {
        let policy = timing.poll_policy();
        Self {
            connector,
            machine,
            timing,
            policy,
            queue: CommandQueue::new(),
        }
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn machine(&self) -> &MachineConfig {
        &self.machine
    }

    pub fn poll_policy(&self) -> &PollPolicy {
        &self.policy
    }

    async fn acquire(&self) -> Result<PortLease, MotionError> {
        Ok(PortLease::acquire(self.connector.as_ref(), self.timing.wake_settle()).await?)
    }

    /// Runs the firmware homing cycle and waits for it to settle.
    pub async fn home(&mut self) -> Result<CompletionOutcome, MotionError> {
        tracing::info!("Homing all axes on {}", self.connector.describe());
        let mut lease = self.acquire().await?;
        lease.write_all(HOMING_CYCLE).await?;
        let outcome = wait_for_idle(&mut *lease, &self.policy).await?;
        match outcome {
            CompletionOutcome::Confirmed { .. } => tracing::info!("Homing completed"),
            CompletionOutcome::Assumed { polls } => {
                tracing::warn!("Homing completion assumed after {} polls, not confirmed", polls)
            }
        }
        Ok(outcome)
    }

    pub fn coordinates_within_bounds(&self, x: f64, y: f64) -> bool {
        self.machine.x.contains(x) && self.machine.y.contains(y)
    }

    fn check(axis: Axis, bounds: &AxisBounds, value: f64) -> Result<(), MotionError> {
        if bounds.contains(value) {
            Ok(())
        } else {
            let err = MotionError::OutOfBounds {
                axis,
                value,
                low: bounds.low_bound,
                high: bounds.high_bound,
            };
            tracing::warn!("Rejected move: {}", err);
            Err(err)
        }
    }

    /// Queues a rapid XY move to logical `(x, y)`.
    ///
    /// Bounds apply to the logical coordinates; the queued line carries
    /// `x + x_offset` and `y + y_offset`. A rejected move leaves the queue
    /// untouched.
    pub fn move_to_point(&mut self, x: f64, y: f64) -> Result<(), MotionError> {
        Self::check(Axis::X, &self.machine.x, x)?;
        Self::check(Axis::Y, &self.machine.y, y)?;
        self.queue.append(MotionCommand::RapidXY {
            x: x + self.machine.x_offset,
            y: y + self.machine.y_offset,
        });
        Ok(())
    }

    /// Queues a rapid Z move. Z carries no offset.
    pub fn move_to_height(&mut self, z: f64) -> Result<(), MotionError> {
        let bounds = self.machine.z.ok_or_else(|| {
            tracing::warn!("Rejected move: no Z bounds configured");
            MotionError::AxisNotConfigured(Axis::Z)
        })?;
        Self::check(Axis::Z, &bounds, z)?;
        self.queue.append(MotionCommand::RapidZ { z });
        Ok(())
    }

    /// Queues the descent to the working height.
    pub fn move_down(&mut self) -> Result<(), MotionError> {
        self.move_to_height(DOWN_HEIGHT)
    }

    /// Queues the return to the Z origin.
    pub fn move_up(&mut self) -> Result<(), MotionError> {
        self.move_to_height(UP_HEIGHT)
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn clear_queue(&mut self) {
        self.queue.clear();
    }

    /// Sends the queued lines in batches of at most `batch_size`, waiting for
    /// each batch to finish before the next.
    ///
    /// The queue is left as it was; clear it before composing the next move.
    pub async fn execute_queue(&mut self, batch_size: usize) -> Result<ExecutionReport, MotionError> {
        if batch_size == 0 {
            return Err(MotionError::InvalidBatchSize);
        }
        let batches = self.queue.batches(batch_size);
        if batches.is_empty() {
            tracing::debug!("Nothing queued");
            return Ok(ExecutionReport::default());
        }

        tracing::info!(
            "Executing {} queued lines in {} batches",
            self.queue.len(),
            batches.len()
        );
        let mut lease = self.acquire().await?;
        let mut report = ExecutionReport::default();
        for (index, payload) in batches.iter().enumerate() {
            match Self::run_batch(&mut lease, &self.policy, index + 1, payload).await {
                Ok(outcome) => report.batches.push(outcome),
                Err(source) => {
                    tracing::error!(
                        "Batch {} of {} failed after {} batches were sent: {}",
                        index + 1,
                        batches.len(),
                        report.batches.len(),
                        source
                    );
                    return Err(MotionError::BatchFailed {
                        batch: index + 1,
                        total: batches.len(),
                        completed: report,
                        source,
                    });
                }
            }
        }
        Ok(report)
    }

    async fn run_batch(
        lease: &mut PortLease,
        policy: &PollPolicy,
        number: usize,
        payload: &str,
    ) -> Result<BatchOutcome, TransportError> {
        lease.write_all(payload.as_bytes()).await?;
        let completion = wait_for_idle(&mut **lease, policy).await?;
        if !completion.is_confirmed() {
            tracing::warn!(
                "Batch {} completion assumed after {} polls, not confirmed",
                number,
                completion.polls()
            );
        }
        let echo = lease.read_line().await?;
        Ok(BatchOutcome {
            lines: payload.lines().count(),
            completion,
            echo,
        })
    }

    /// Reads the machine position.
    ///
    /// `Ok(None)` means the reply could not be parsed even after a second
    /// attempt with a line read; only connection failures are errors.
    pub async fn read_position(&mut self) -> Result<Option<MachinePosition>, MotionError> {
        let mut lease = self.acquire().await?;

        lease.discard_input().await?;
        lease.write_all(STATUS_QUERY).await?;
        sleep(self.timing.status_delay()).await;
        let reply = lease.read_available().await?;
        if let Some(position) = status::parse_mpos(&reply) {
            return Ok(Some(position));
        }

        tracing::debug!("No position in {:?}, retrying with a line read", reply);
        lease.discard_input().await?;
        lease.write_all(STATUS_QUERY).await?;
        sleep(self.timing.retry_delay()).await;
        let reply = lease.read_line().await?;
        let position = status::parse_mpos(&reply);
        if position.is_none() {
            tracing::warn!("Could not read machine position (last reply: {:?})", reply);
        }
        Ok(position)
    }

    /// Whether the machine is homed and ready for motion.
    ///
    /// Anything that prevents a clear answer, including failing to talk to
    /// the controller at all, counts as not homed.
    pub async fn is_homed(&mut self) -> bool {
        let reply = match self.query_status().await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!("Status query failed, treating machine as not homed: {}", e);
                return false;
            }
        };
        if reply.is_empty() {
            return false;
        }
        let report = StatusReport::parse(&reply);
        if report.homing_required() {
            tracing::info!("Machine reports alarm, homing required ({:?})", report.alarm);
            return false;
        }
        report.position.is_some() || report.state == MachineState::Idle
    }

    async fn query_status(&mut self) -> Result<String, MotionError> {
        let mut lease = self.acquire().await?;
        lease.discard_input().await?;
        lease.write_all(STATUS_QUERY).await?;
        sleep(self.timing.status_delay()).await;
        Ok(lease.read_available().await?)
    }

    /// Sends the firmware soft reset (Ctrl-X) and drops the start-up banner.
    pub async fn soft_reset(&mut self) -> Result<(), MotionError> {
        tracing::info!("Sending soft reset");
        let mut lease = self.acquire().await?;
        lease.write_all(SOFT_RESET).await?;
        sleep(self.timing.reset_settle()).await;
        lease.discard_input().await?;
        Ok(())
    }

    /// Clears an alarm lock without homing. Returns the firmware's reply.
    pub async fn unlock(&mut self) -> Result<String, MotionError> {
        tracing::warn!("Unlocking alarm state without homing");
        let mut lease = self.acquire().await?;
        lease.write_all(ALARM_UNLOCK).await?;
        Ok(lease.read_line().await?)
    }
}
