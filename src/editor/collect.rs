use crate::chat::{ChatEvent, IncomingMessage, ReactionEvent};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

/// Fixed inactivity window for every wait-step of a session.
pub const WAIT_STEP_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WaitError {
    #[error("timed out waiting for a reply")]
    TimedOut,

    #[error("chat event stream closed")]
    Disconnected,
}

/// Waits for the first transport event satisfying a predicate, or times out.
///
/// One collector is subscribed per session, at session start; events that do
/// not match the active predicate are discarded, and the first match wins.
pub struct InputCollector {
    rx: broadcast::Receiver<ChatEvent>,
}

impl InputCollector {
    pub fn new(rx: broadcast::Receiver<ChatEvent>) -> Self {
        Self { rx }
    }

    pub async fn await_message(
        &mut self,
        mut predicate: impl FnMut(&IncomingMessage) -> bool,
        window: Duration,
    ) -> Result<IncomingMessage, WaitError> {
        let wait = async {
            loop {
                match self.rx.recv().await {
                    Ok(ChatEvent::Message(message)) if predicate(&message) => return Ok(message),
                    Ok(_) => {}
                    // Dropped events can only be ones we would have discarded
                    // or stale ones from before this wait; keep listening.
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(WaitError::Disconnected);
                    }
                }
            }
        };
        tokio::time::timeout(window, wait)
            .await
            .map_err(|_| WaitError::TimedOut)?
    }

    pub async fn await_reaction(
        &mut self,
        mut predicate: impl FnMut(&ReactionEvent) -> bool,
        window: Duration,
    ) -> Result<ReactionEvent, WaitError> {
        let wait = async {
            loop {
                match self.rx.recv().await {
                    Ok(ChatEvent::ReactionAdded(reaction)) if predicate(&reaction) => {
                        return Ok(reaction);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(WaitError::Disconnected);
                    }
                }
            }
        };
        tokio::time::timeout(window, wait)
            .await
            .map_err(|_| WaitError::TimedOut)?
    }
}
