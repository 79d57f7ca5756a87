pub mod cleanup;
pub mod collect;
pub mod locks;
pub mod menu;
pub mod parse;
pub mod resolver;
pub mod session;
mod wizard;

pub use cleanup::Janitor;
pub use collect::{InputCollector, WAIT_STEP_TIMEOUT, WaitError};
pub use locks::{ScopeLockGuard, ScopeLocks};
pub use resolver::RefResolver;
pub use session::{Caller, SessionEnd, TemplateEditor};

use crate::error::{ChatError, StoreError};

/// Internal control flow for a running session. These are not user-visible
/// errors: the orchestrator maps each variant to a `SessionEnd` (with a
/// best-effort notice) or escalates it.
#[derive(Debug)]
pub(crate) enum Abort {
    /// No qualifying reply within the wait window; the whole session ends.
    TimedOut,
    /// The event bus closed underneath us (process shutdown).
    Disconnected,
    Transport(ChatError),
    Store(StoreError),
    /// A state that normal UI construction cannot reach. Always a defect.
    Internal(&'static str),
}

impl From<ChatError> for Abort {
    fn from(error: ChatError) -> Self {
        Self::Transport(error)
    }
}

impl From<StoreError> for Abort {
    fn from(error: StoreError) -> Self {
        Self::Store(error)
    }
}

impl From<WaitError> for Abort {
    fn from(error: WaitError) -> Self {
        match error {
            WaitError::TimedOut => Self::TimedOut,
            WaitError::Disconnected => Self::Disconnected,
        }
    }
}
