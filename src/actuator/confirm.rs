// src/actuator/confirm.rs - Operator hand-off points inside load/unload sequences
use async_trait::async_trait;
use tokio::sync::mpsc;

use super::ActuatorError;

/// Suspends a sequence until someone outside says to continue.
#[async_trait]
pub trait Confirmation: Send {
    /// Resolves once the operator has finished; `prompt` says what they
    /// are expected to do.
    async fn wait(&mut self, prompt: &str) -> Result<(), ActuatorError>;
}

/// [`Confirmation`] fed by a channel. Each message received lets one
/// sequence continue; a closed channel aborts it.
pub struct ChannelConfirmation {
    rx: mpsc::Receiver<()>,
}

impl ChannelConfirmation {
    pub fn new(rx: mpsc::Receiver<()>) -> Self {
        Self { rx }
    }

    /// A confirmation together with the sender that releases it.
    pub fn channel() -> (mpsc::Sender<()>, Self) {
        let (tx, rx) = mpsc::channel(1);
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl Confirmation for ChannelConfirmation {
    async fn wait(&mut self, prompt: &str) -> Result<(), ActuatorError> {
        tracing::info!("{}", prompt);
        match self.rx.recv().await {
            Some(()) => Ok(()),
            None => {
                tracing::warn!("Confirmation channel closed while waiting: {}", prompt);
                Err(ActuatorError::Aborted("confirmation channel closed".to_string()))
            }
        }
    }
}
