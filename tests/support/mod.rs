//! Scripted in-memory collaborators for driving whole edit sessions.

use async_trait::async_trait;
use proforma::chat::{
    ChatEvent, ChatEvents, ChatTransport, Embed, IncomingMessage, MessageHandle, ReactionEvent,
};
use proforma::editor::{Caller, RefResolver, TemplateEditor};
use proforma::error::{ChatError, ResolveError};
use proforma::store::SqliteTemplateStore;
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Distinguishes each harness's shared-cache in-memory database by name.
static DB_SEQ: AtomicU64 = AtomicU64::new(0);

pub const GUILD: i64 = 42;
pub const USER: &str = "user-1";
pub const CHANNEL: &str = "chan-1";

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub handle: MessageHandle,
    pub content: Option<String>,
    pub embed: Option<Embed>,
}

/// Transport double that records every call and hands out sequential
/// message ids.
#[derive(Default)]
pub struct FakeChat {
    next_id: AtomicU64,
    pub sent: Mutex<Vec<SentMessage>>,
    pub edits: Mutex<Vec<(String, Option<String>)>>,
    pub deleted: Mutex<Vec<String>>,
    pub bulk_deleted: Mutex<Vec<Vec<String>>>,
    pub reactions_added: Mutex<Vec<(String, String)>>,
    pub reactions_removed: Mutex<Vec<(String, String)>>,
    /// When set, every reaction add fails with a permission error.
    pub fail_reactions: AtomicBool,
}

impl FakeChat {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn next_handle(&self, channel_id: &str) -> MessageHandle {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        MessageHandle {
            channel_id: channel_id.to_string(),
            message_id: format!("m{n}"),
        }
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| m.content.clone())
            .collect()
    }

    /// Search plain text and embed descriptions alike.
    pub fn has_sent_containing(&self, needle: &str) -> bool {
        self.sent.lock().unwrap().iter().any(|m| {
            m.content.as_deref().is_some_and(|t| t.contains(needle))
                || m.embed
                    .as_ref()
                    .is_some_and(|e| e.description.contains(needle))
        })
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Wait (with the paused clock auto-advancing) until a message whose
    /// text contains `needle` has been sent, and return its handle.
    pub async fn wait_for_send_containing(&self, needle: &str) -> MessageHandle {
        self.wait_for_send_containing_from(needle, 0).await
    }

    /// Like `wait_for_send_containing`, but only considers messages sent at
    /// or after position `start` — for prompts whose text repeats within one
    /// session.
    pub async fn wait_for_send_containing_from(
        &self,
        needle: &str,
        start: usize,
    ) -> MessageHandle {
        for _ in 0..100_000 {
            if let Some(message) = self
                .sent
                .lock()
                .unwrap()
                .iter()
                .skip(start)
                .rev()
                .find(|m| m.content.as_deref().is_some_and(|t| t.contains(needle)))
            {
                return message.handle.clone();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "no message containing {needle:?} was sent after position {start}; saw: {:#?}",
            self.sent_texts()
        );
    }

    /// Symbols attached to one message, in order.
    pub fn reactions_on(&self, handle: &MessageHandle) -> Vec<String> {
        self.reactions_added
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == handle.message_id)
            .map(|(_, symbol)| symbol.clone())
            .collect()
    }
}

#[async_trait]
impl ChatTransport for FakeChat {
    fn name(&self) -> &str {
        "fake"
    }

    async fn send(&self, channel_id: &str, content: &str) -> Result<MessageHandle, ChatError> {
        let handle = self.next_handle(channel_id);
        self.sent.lock().unwrap().push(SentMessage {
            handle: handle.clone(),
            content: Some(content.to_string()),
            embed: None,
        });
        Ok(handle)
    }

    async fn send_embed(&self, channel_id: &str, embed: &Embed) -> Result<MessageHandle, ChatError> {
        let handle = self.next_handle(channel_id);
        self.sent.lock().unwrap().push(SentMessage {
            handle: handle.clone(),
            content: None,
            embed: Some(embed.clone()),
        });
        Ok(handle)
    }

    async fn edit_message(
        &self,
        handle: &MessageHandle,
        content: Option<&str>,
        _embed: Option<&Embed>,
    ) -> Result<(), ChatError> {
        self.edits
            .lock()
            .unwrap()
            .push((handle.message_id.clone(), content.map(String::from)));
        Ok(())
    }

    async fn delete_message(&self, handle: &MessageHandle) -> Result<(), ChatError> {
        self.deleted.lock().unwrap().push(handle.message_id.clone());
        Ok(())
    }

    async fn bulk_delete(
        &self,
        _channel_id: &str,
        handles: &[MessageHandle],
    ) -> Result<(), ChatError> {
        self.bulk_deleted
            .lock()
            .unwrap()
            .push(handles.iter().map(|h| h.message_id.clone()).collect());
        Ok(())
    }

    async fn add_reaction(&self, handle: &MessageHandle, symbol: &str) -> Result<(), ChatError> {
        if self.fail_reactions.load(Ordering::Relaxed) {
            return Err(ChatError::PermissionDenied("add reactions".into()));
        }
        self.reactions_added
            .lock()
            .unwrap()
            .push((handle.message_id.clone(), symbol.to_string()));
        Ok(())
    }

    async fn remove_reaction(
        &self,
        handle: &MessageHandle,
        symbol: &str,
        _user_id: &str,
    ) -> Result<(), ChatError> {
        self.reactions_removed
            .lock()
            .unwrap()
            .push((handle.message_id.clone(), symbol.to_string()));
        Ok(())
    }
}

/// Map-backed resolver: known names resolve, everything else is NotFound.
pub struct FakeResolver {
    pub channels: HashMap<String, String>,
    pub roles: HashMap<String, String>,
}

impl Default for FakeResolver {
    fn default() -> Self {
        Self {
            channels: HashMap::from([
                ("#verify".to_string(), "300".to_string()),
                ("#archive".to_string(), "301".to_string()),
            ]),
            roles: HashMap::from([("Member".to_string(), "400".to_string())]),
        }
    }
}

#[async_trait]
impl RefResolver for FakeResolver {
    async fn resolve_channel(&self, _guild_id: i64, text: &str) -> Result<String, ResolveError> {
        self.channels
            .get(text)
            .cloned()
            .ok_or_else(|| ResolveError::NotFound(text.to_string()))
    }

    async fn resolve_role(&self, _guild_id: i64, text: &str) -> Result<String, ResolveError> {
        self.roles
            .get(text)
            .cloned()
            .ok_or_else(|| ResolveError::NotFound(text.to_string()))
    }
}

/// The scripted remote party.
pub struct User {
    events: ChatEvents,
    next_id: AtomicU64,
}

impl User {
    pub fn says(&self, content: &str) {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.events.publish(ChatEvent::Message(IncomingMessage {
            author_id: USER.into(),
            channel_id: CHANNEL.into(),
            message_id: format!("u{n}"),
            guild_id: Some(GUILD),
            content: content.to_string(),
        }));
    }

    pub fn reacts(&self, handle: &MessageHandle, symbol: &str) {
        self.events.publish(ChatEvent::ReactionAdded(ReactionEvent {
            user_id: USER.into(),
            channel_id: handle.channel_id.clone(),
            message_id: handle.message_id.clone(),
            symbol: symbol.to_string(),
        }));
    }
}

pub struct Harness {
    pub chat: Arc<FakeChat>,
    pub store: Arc<SqliteTemplateStore>,
    pub editor: Arc<TemplateEditor>,
    pub user: User,
}

impl Harness {
    pub async fn new() -> Self {
        // These sessions run under `#[tokio::test(start_paused = true)]`, and the
        // test driver polls the store in a `sleep`-driven loop while the spawned
        // session task writes to it concurrently. A single-connection
        // `sqlite::memory:` pool cannot serve both at once: the loser parks on the
        // pool's acquire-timeout timer, which the paused clock auto-advances into a
        // spurious `PoolTimedOut`. A shared-cache in-memory database instead
        // serialises readers against the writer, and the resulting busy-waits let
        // the paused clock race past the session's own timeout. Use a temp-file
        // database in WAL mode so many connections share one schema with genuine
        // concurrent read-during-write, removing both failure modes.
        let seq = DB_SEQ.fetch_add(1, Ordering::Relaxed);
        let url = format!("sqlite:file:proforma_test_{seq}?mode=memory&cache=shared");
        const POOL_SIZE: u32 = 4;
        // Opening a connection runs on a blocking worker thread; under the paused
        // clock the acquire-timeout timer would auto-advance and fire before that
        // thread reports back. Let the real clock run while every connection is
        // opened (pre-warmed below), then re-pause for the session body.
        tokio::time::resume();
        let pool = SqlitePoolOptions::new()
            .max_connections(POOL_SIZE)
            .min_connections(POOL_SIZE)
            // `foreign_keys` and `busy_timeout` are per-connection pragmas; the
            // store's template delete relies on `ON DELETE CASCADE`, so enable
            // them on every connection.
            .after_connect(|conn, _| {
                Box::pin(async move {
                    sqlx::query(
                        "PRAGMA foreign_keys = ON; \
                         PRAGMA busy_timeout = 5000;",
                    )
                    .execute(conn)
                    .await?;
                    Ok(())
                })
            })
            .connect(&url)
            .await
            .expect("sqlite pool");
        // Force all connections open now, under the real clock, so none is
        // established lazily once the clock is paused again.
        let mut warm = Vec::new();
        for _ in 0..POOL_SIZE {
            warm.push(pool.acquire().await.expect("prewarm connection"));
        }
        drop(warm);
        let store = Arc::new(SqliteTemplateStore::new(pool).await.expect("schema"));
        tokio::time::pause();
        let chat = FakeChat::new();
        let events = ChatEvents::new(256);
        let editor = Arc::new(TemplateEditor::new(
            chat.clone(),
            events.clone(),
            store.clone(),
            Arc::new(FakeResolver::default()),
        ));
        let user = User {
            events,
            next_id: AtomicU64::new(0),
        };
        Self {
            chat,
            store,
            editor,
            user,
        }
    }

    pub fn caller(&self, privileged: bool) -> Caller {
        Caller {
            user_id: USER.into(),
            channel_id: CHANNEL.into(),
            guild_id: GUILD,
            privileged,
        }
    }
}
