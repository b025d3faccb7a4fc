// src/motion/completion.rs - Detecting the end of a motion by polling status
use std::time::Duration;
use tokio::time::sleep;

use crate::gcode::{status, MachineState, STATUS_QUERY};
use crate::hardware::{Transport, TransportError};

/// How completion is detected after a command is written.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    /// Pause before the first status query.
    pub initial_delay: Duration,
    /// Pause between writing `?` and reading the reply.
    pub response_delay: Duration,
    /// Pause between one reply and the next query.
    pub poll_interval: Duration,
    /// Hard cap on status queries.
    pub max_polls: u32,
    /// Consecutive Idle replies needed to call the motion finished.
    pub required_idle: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            response_delay: Duration::from_millis(100),
            poll_interval: Duration::from_millis(500),
            max_polls: 30,
            required_idle: 2,
        }
    }
}

/// How a wait for completion ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The firmware reported Idle the required number of times in a row.
    Confirmed { polls: u32 },
    /// The poll cap was reached first; completion is assumed, not known.
    Assumed { polls: u32 },
}

impl CompletionOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, CompletionOutcome::Confirmed { .. })
    }

    pub fn polls(&self) -> u32 {
        match self {
            CompletionOutcome::Confirmed { polls } | CompletionOutcome::Assumed { polls } => *polls,
        }
    }
}

/// Polls the firmware until it has been Idle `required_idle` times in a row
/// or `max_polls` queries have been sent.
///
/// A cap hit still returns (as [`CompletionOutcome::Assumed`]) so a stalled
/// status channel can never hang the caller. Transport failures are errors.
pub async fn wait_for_idle(
    transport: &mut dyn Transport,
    policy: &PollPolicy,
) -> Result<CompletionOutcome, TransportError> {
    sleep(policy.initial_delay).await;

    let mut idle_streak = 0u32;
    let mut polls = 0u32;
    loop {
        polls += 1;
        transport.discard_input().await?;
        transport.write_all(STATUS_QUERY).await?;
        sleep(policy.response_delay).await;
        let reply = transport.read_line().await?;
        let state = status::parse_state(&reply);
        tracing::debug!("Status poll {}: {:?} ({})", polls, state, reply);

        if state == MachineState::Idle {
            idle_streak += 1;
            if idle_streak >= policy.required_idle {
                tracing::debug!("Motion complete after {} polls", polls);
                return Ok(CompletionOutcome::Confirmed { polls });
            }
        } else {
            idle_streak = 0;
        }

        if polls >= policy.max_polls {
            tracing::warn!(
                "No idle confirmation after {} polls; assuming motion completed",
                polls
            );
            return Ok(CompletionOutcome::Assumed { polls });
        }

        sleep(policy.poll_interval).await;
    }
}
