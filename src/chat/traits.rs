use super::{Embed, MessageHandle};
use crate::error::ChatError;
use async_trait::async_trait;

/// Core transport trait — implement for any messaging platform that supports
/// plain messages, reaction selectors, and message deletion.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Human-readable transport name.
    fn name(&self) -> &str;

    async fn send(&self, channel_id: &str, content: &str) -> Result<MessageHandle, ChatError>;

    async fn send_embed(&self, channel_id: &str, embed: &Embed) -> Result<MessageHandle, ChatError>;

    /// Edit a previously sent message. Passing `None` for the content clears
    /// it in favour of the embed, and vice versa.
    async fn edit_message(
        &self,
        handle: &MessageHandle,
        content: Option<&str>,
        embed: Option<&Embed>,
    ) -> Result<(), ChatError>;

    async fn delete_message(&self, handle: &MessageHandle) -> Result<(), ChatError>;

    /// Best-effort bulk removal of transient messages. Implementations may
    /// fall back to one-by-one deletion where the platform requires it.
    async fn bulk_delete(
        &self,
        channel_id: &str,
        handles: &[MessageHandle],
    ) -> Result<(), ChatError>;

    async fn add_reaction(&self, handle: &MessageHandle, symbol: &str) -> Result<(), ChatError>;

    /// Remove one user's reaction so a menu stays reusable.
    async fn remove_reaction(
        &self,
        handle: &MessageHandle,
        symbol: &str,
        user_id: &str,
    ) -> Result<(), ChatError>;
}
