pub mod discord;
pub mod traits;

pub use discord::DiscordChat;
pub use traits::ChatTransport;

use tokio::sync::broadcast;

/// Address of one message on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHandle {
    pub channel_id: String,
    pub message_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Embed {
    pub title: Option<String>,
    pub description: String,
    pub colour: u32,
    pub fields: Vec<EmbedField>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// A message received from the transport.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub author_id: String,
    pub channel_id: String,
    pub message_id: String,
    pub guild_id: Option<i64>,
    pub content: String,
}

impl IncomingMessage {
    pub fn handle(&self) -> MessageHandle {
        MessageHandle {
            channel_id: self.channel_id.clone(),
            message_id: self.message_id.clone(),
        }
    }
}

/// A reaction added to one of our messages.
#[derive(Debug, Clone)]
pub struct ReactionEvent {
    pub user_id: String,
    pub channel_id: String,
    pub message_id: String,
    pub symbol: String,
}

#[derive(Debug, Clone)]
pub enum ChatEvent {
    Message(IncomingMessage),
    ReactionAdded(ReactionEvent),
}

/// Broadcast bus carrying transport events to any number of sessions.
///
/// The gateway listener publishes here; each edit session subscribes once at
/// session start and filters with its own predicates.
#[derive(Debug, Clone)]
pub struct ChatEvents {
    tx: broadcast::Sender<ChatEvent>,
}

impl ChatEvents {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Having no live subscriber is not an error.
    pub fn publish(&self, event: ChatEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.tx.subscribe()
    }
}

impl Default for ChatEvents {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn published_events_reach_subscribers() {
        let events = ChatEvents::new(8);
        let mut rx = events.subscribe();
        events.publish(ChatEvent::Message(IncomingMessage {
            author_id: "1".into(),
            channel_id: "2".into(),
            message_id: "3".into(),
            guild_id: Some(4),
            content: "hello".into(),
        }));
        match rx.recv().await.unwrap() {
            ChatEvent::Message(m) => assert_eq!(m.content, "hello"),
            ChatEvent::ReactionAdded(_) => panic!("expected a message event"),
        }
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let events = ChatEvents::new(8);
        events.publish(ChatEvent::ReactionAdded(ReactionEvent {
            user_id: "1".into(),
            channel_id: "2".into(),
            message_id: "3".into(),
            symbol: "\u{2705}".into(),
        }));
    }
}
