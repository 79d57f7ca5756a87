use crate::chat::{ChatTransport, MessageHandle};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Detached background queue for transient-message cleanup.
///
/// Sessions hand their prompt/reply messages here and move on; the consumer
/// task bulk-deletes them without ever blocking the session flow. Failures
/// (missing permissions, already-deleted messages) are logged and dropped —
/// the queue only ever touches transient UI artifacts, so losing entries at
/// shutdown is harmless.
#[derive(Debug, Clone)]
pub struct Janitor {
    tx: mpsc::UnboundedSender<(String, Vec<MessageHandle>)>,
}

impl Janitor {
    pub fn spawn(chat: Arc<dyn ChatTransport>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<(String, Vec<MessageHandle>)>();
        tokio::spawn(async move {
            while let Some((channel_id, handles)) = rx.recv().await {
                if let Err(error) = chat.bulk_delete(&channel_id, &handles).await {
                    tracing::debug!(%error, channel_id, "transient message cleanup failed");
                }
            }
        });
        Self { tx }
    }

    /// Queue messages for deletion. Fire-and-forget: a closed queue (process
    /// shutdown) is not an error.
    pub fn discard(&self, channel_id: &str, handles: Vec<MessageHandle>) {
        if handles.is_empty() {
            return;
        }
        let _ = self.tx.send((channel_id.to_string(), handles));
    }
}
