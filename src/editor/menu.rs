use super::collect::{InputCollector, WAIT_STEP_TIMEOUT, WaitError};
use crate::chat::{ChatTransport, MessageHandle};
use crate::error::ChatError;

/// Keycap digit selectors, in menu order.
pub const DIGITS: [&str; 9] = [
    "1\u{20e3}",
    "2\u{20e3}",
    "3\u{20e3}",
    "4\u{20e3}",
    "5\u{20e3}",
    "6\u{20e3}",
    "7\u{20e3}",
    "8\u{20e3}",
    "9\u{20e3}",
];

/// Terminal confirm/done selector.
pub const TICK: &str = "\u{2705}";
/// Cancel selector for destructive and yes/no flows.
pub const CROSS: &str = "\u{274e}";

/// Field-type selectors offered at field creation.
pub const NUMBERS: &str = "1\u{20e3}";
pub const LETTERS: &str = "\u{1f170}";
pub const PICTURE: &str = "\u{1f5bc}";

#[derive(Debug, Clone)]
pub struct MenuOption<A> {
    pub symbol: &'static str,
    pub action: A,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuOutcome<A> {
    Selected(A),
    Confirmed,
    Cancelled,
    TimedOut,
}

/// A fixed ordered set of reaction selectors attached to one message.
///
/// An unrecognized selection is impossible by construction: the wait
/// predicate only admits members of the offered symbol set.
pub struct Menu<A> {
    options: Vec<MenuOption<A>>,
    confirm: Option<&'static str>,
    cancel: Option<&'static str>,
}

impl<A: Clone> Menu<A> {
    pub fn new(options: Vec<MenuOption<A>>) -> Self {
        Self {
            options,
            confirm: None,
            cancel: None,
        }
    }

    pub fn with_confirm(mut self, symbol: &'static str) -> Self {
        self.confirm = Some(symbol);
        self
    }

    pub fn with_cancel(mut self, symbol: &'static str) -> Self {
        self.cancel = Some(symbol);
        self
    }

    pub fn symbols(&self) -> Vec<&'static str> {
        let mut symbols: Vec<&'static str> = self.options.iter().map(|o| o.symbol).collect();
        symbols.extend(self.confirm);
        symbols.extend(self.cancel);
        symbols
    }

    /// Attach the selector reactions. Done once per menu message; the menu
    /// stays reusable afterwards because selections are removed again.
    pub async fn seed(
        &self,
        chat: &dyn ChatTransport,
        handle: &MessageHandle,
    ) -> Result<(), ChatError> {
        for symbol in self.symbols() {
            chat.add_reaction(handle, symbol).await?;
        }
        Ok(())
    }

    /// Wait for the user to pick a selector.
    ///
    /// After a non-terminal selection the user's reaction is removed
    /// (best-effort) so the same menu can be used for the next round.
    pub async fn await_selection(
        &self,
        chat: &dyn ChatTransport,
        collector: &mut InputCollector,
        handle: &MessageHandle,
        user_id: &str,
    ) -> Result<MenuOutcome<A>, WaitError> {
        let symbols = self.symbols();
        let reaction = match collector
            .await_reaction(
                |r| {
                    r.user_id == user_id
                        && r.message_id == handle.message_id
                        && symbols.iter().any(|s| *s == r.symbol)
                },
                WAIT_STEP_TIMEOUT,
            )
            .await
        {
            Ok(reaction) => reaction,
            Err(WaitError::TimedOut) => return Ok(MenuOutcome::TimedOut),
            Err(error @ WaitError::Disconnected) => return Err(error),
        };

        if self.confirm.is_some_and(|c| c == reaction.symbol) {
            return Ok(MenuOutcome::Confirmed);
        }
        if self.cancel.is_some_and(|c| c == reaction.symbol) {
            return Ok(MenuOutcome::Cancelled);
        }
        if let Some(option) = self.options.iter().find(|o| o.symbol == reaction.symbol) {
            if let Err(error) = chat.remove_reaction(handle, &reaction.symbol, user_id).await {
                tracing::debug!(%error, "failed to remove menu reaction");
            }
            return Ok(MenuOutcome::Selected(option.action.clone()));
        }
        unreachable!("reaction outside the offered symbol set")
    }
}
