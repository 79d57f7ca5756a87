use super::traits::ChatTransport;
use super::{ChatEvent, ChatEvents, Embed, IncomingMessage, MessageHandle, ReactionEvent};
use crate::editor::resolver::RefResolver;
use crate::error::{ChatError, ResolveError};
use anyhow::Context;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;

const API_BASE: &str = "https://discord.com/api/v10";

// GUILDS | GUILD_MESSAGES | GUILD_MESSAGE_REACTIONS | MESSAGE_CONTENT
const GATEWAY_INTENTS: u64 = 1 | 512 | 1024 | 32768;

/// Discord transport — REST for outbound traffic, Gateway WebSocket for
/// real-time message and reaction events.
pub struct DiscordChat {
    bot_token: String,
    client: reqwest::Client,
}

impl DiscordChat {
    pub fn new(bot_token: String) -> Self {
        Self {
            bot_token,
            client: reqwest::Client::new(),
        }
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.bot_token)
    }

    async fn post_message(
        &self,
        channel_id: &str,
        body: serde_json::Value,
    ) -> Result<MessageHandle, ChatError> {
        let url = format!("{API_BASE}/channels/{channel_id}/messages");
        let resp = self
            .client
            .post(&url)
            .header("Authorization", self.auth())
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Connection(e.to_string()))?;
        let resp = ensure_success(resp, "send message").await?;
        let payload: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ChatError::Connection(e.to_string()))?;
        let message_id = payload
            .get("id")
            .and_then(|i| i.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(MessageHandle {
            channel_id: channel_id.to_string(),
            message_id,
        })
    }

    fn embed_json(embed: &Embed) -> serde_json::Value {
        let mut value = json!({ "description": embed.description, "color": embed.colour });
        if let Some(title) = &embed.title {
            value["title"] = json!(title);
        }
        if !embed.fields.is_empty() {
            let fields: Vec<serde_json::Value> = embed
                .fields
                .iter()
                .map(|f| json!({ "name": f.name, "value": f.value, "inline": f.inline }))
                .collect();
            value["fields"] = json!(fields);
        }
        value
    }

    async fn guild_directory(
        &self,
        guild_id: i64,
        kind: &str,
    ) -> Result<Vec<serde_json::Value>, ChatError> {
        let url = format!("{API_BASE}/guilds/{guild_id}/{kind}");
        let resp = self
            .client
            .get(&url)
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(|e| ChatError::Connection(e.to_string()))?;
        let resp = ensure_success(resp, kind).await?;
        resp.json()
            .await
            .map_err(|e| ChatError::Connection(e.to_string()))
    }

    /// Connect to the Gateway and publish message/reaction events onto the
    /// bus until the connection drops. The caller is expected to reconnect.
    #[allow(clippy::too_many_lines)]
    pub async fn listen(&self, events: ChatEvents) -> anyhow::Result<()> {
        let gw_resp: serde_json::Value = self
            .client
            .get(format!("{API_BASE}/gateway/bot"))
            .header("Authorization", self.auth())
            .send()
            .await
            .context("fetch Discord gateway URL")?
            .json()
            .await
            .context("parse Discord gateway response")?;
        let gw_url = gw_resp
            .get("url")
            .and_then(|u| u.as_str())
            .unwrap_or("wss://gateway.discord.gg");

        let ws_url = format!("{gw_url}/?v=10&encoding=json");
        tracing::info!("Discord: connecting to gateway...");

        let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
            .await
            .context("connect to Discord gateway WebSocket")?;
        let (mut write, mut read) = ws_stream.split();

        // Read Hello (opcode 10)
        let hello = read
            .next()
            .await
            .ok_or(anyhow::anyhow!("No hello"))
            .context("read Discord gateway hello message")??;
        let hello_data: serde_json::Value = serde_json::from_str(&hello.to_string())
            .context("parse Discord gateway hello event")?;
        let heartbeat_interval = hello_data
            .get("d")
            .and_then(|d| d.get("heartbeat_interval"))
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(41250);

        // Send Identify (opcode 2)
        let identify = json!({
            "op": 2,
            "d": {
                "token": self.bot_token,
                "intents": GATEWAY_INTENTS,
                "properties": {
                    "os": "linux",
                    "browser": "proforma",
                    "device": "proforma"
                }
            }
        });
        write
            .send(Message::Text(identify.to_string().into()))
            .await
            .context("send Discord gateway identify")?;

        tracing::info!("Discord: connected and identified");

        // Last sequence number, for heartbeats. Only touched in the select!
        // loop below, so a plain i64 suffices.
        let mut sequence: i64 = -1;
        // Filled in from the READY event; used to drop our own events.
        let mut bot_user_id = String::new();

        let (hb_tx, mut hb_rx) = tokio::sync::mpsc::channel::<()>(1);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_millis(heartbeat_interval));
            loop {
                interval.tick().await;
                if hb_tx.send(()).await.is_err() {
                    break;
                }
            }
        });

        loop {
            tokio::select! {
                _ = hb_rx.recv() => {
                    let d = if sequence >= 0 { json!(sequence) } else { json!(null) };
                    let hb = json!({"op": 1, "d": d});
                    if write.send(Message::Text(hb.to_string().into())).await.is_err() {
                        break;
                    }
                }
                msg = read.next() => {
                    let msg = match msg {
                        Some(Ok(Message::Text(t))) => t,
                        Some(Ok(Message::Close(_))) | None => break,
                        _ => continue,
                    };

                    let event: serde_json::Value = match serde_json::from_str(&msg) {
                        Ok(e) => e,
                        Err(_) => continue,
                    };

                    if let Some(s) = event.get("s").and_then(serde_json::Value::as_i64) {
                        sequence = s;
                    }

                    let op = event.get("op").and_then(serde_json::Value::as_u64).unwrap_or(0);
                    match op {
                        // Op 1: server requests an immediate heartbeat
                        1 => {
                            let d = if sequence >= 0 { json!(sequence) } else { json!(null) };
                            let hb = json!({"op": 1, "d": d});
                            if write.send(Message::Text(hb.to_string().into())).await.is_err() {
                                break;
                            }
                            continue;
                        }
                        // Op 7: Reconnect
                        7 => {
                            tracing::warn!("Discord: received Reconnect (op 7), closing for restart");
                            break;
                        }
                        // Op 9: Invalid Session
                        9 => {
                            tracing::warn!("Discord: received Invalid Session (op 9), closing for restart");
                            break;
                        }
                        _ => {}
                    }

                    let event_type = event.get("t").and_then(|t| t.as_str()).unwrap_or("");
                    let Some(d) = event.get("d") else { continue };

                    match event_type {
                        "READY" => {
                            bot_user_id = d
                                .get("user")
                                .and_then(|u| u.get("id"))
                                .and_then(|i| i.as_str())
                                .unwrap_or_default()
                                .to_string();
                        }
                        "MESSAGE_CREATE" => {
                            if let Some(incoming) = parse_message_create(d, &bot_user_id) {
                                events.publish(ChatEvent::Message(incoming));
                            }
                        }
                        "MESSAGE_REACTION_ADD" => {
                            if let Some(reaction) = parse_reaction_add(d, &bot_user_id) {
                                events.publish(ChatEvent::ReactionAdded(reaction));
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        Ok(())
    }
}

async fn ensure_success(
    resp: reqwest::Response,
    what: &str,
) -> Result<reqwest::Response, ChatError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp
        .text()
        .await
        .unwrap_or_else(|e| format!("<failed to read response body: {e}>"));
    Err(match status.as_u16() {
        403 => ChatError::PermissionDenied(format!("{what}: {message}")),
        404 => ChatError::NotFound(what.to_string()),
        code => ChatError::Http {
            status: code,
            message,
        },
    })
}

fn parse_message_create(d: &serde_json::Value, bot_user_id: &str) -> Option<IncomingMessage> {
    let author = d.get("author")?;
    let author_id = author.get("id")?.as_str()?;
    if author_id == bot_user_id {
        return None;
    }
    if author
        .get("bot")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
    {
        return None;
    }
    Some(IncomingMessage {
        author_id: author_id.to_string(),
        channel_id: d.get("channel_id")?.as_str()?.to_string(),
        message_id: d.get("id")?.as_str()?.to_string(),
        guild_id: d
            .get("guild_id")
            .and_then(|g| g.as_str())
            .and_then(|g| g.parse().ok()),
        content: d
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string(),
    })
}

fn parse_reaction_add(d: &serde_json::Value, bot_user_id: &str) -> Option<ReactionEvent> {
    let user_id = d.get("user_id")?.as_str()?;
    if user_id == bot_user_id {
        return None;
    }
    Some(ReactionEvent {
        user_id: user_id.to_string(),
        channel_id: d.get("channel_id")?.as_str()?.to_string(),
        message_id: d.get("message_id")?.as_str()?.to_string(),
        symbol: emoji_symbol(d.get("emoji")?),
    })
}

/// Reaction emoji as used in REST paths: the unicode symbol itself, or
/// `name:id` for custom guild emoji.
fn emoji_symbol(emoji: &serde_json::Value) -> String {
    let name = emoji
        .get("name")
        .and_then(|n| n.as_str())
        .unwrap_or_default();
    match emoji.get("id").and_then(|i| i.as_str()) {
        Some(id) => format!("{name}:{id}"),
        None => name.to_string(),
    }
}

#[async_trait]
impl ChatTransport for DiscordChat {
    fn name(&self) -> &str {
        "discord"
    }

    async fn send(&self, channel_id: &str, content: &str) -> Result<MessageHandle, ChatError> {
        self.post_message(channel_id, json!({ "content": content }))
            .await
    }

    async fn send_embed(
        &self,
        channel_id: &str,
        embed: &Embed,
    ) -> Result<MessageHandle, ChatError> {
        self.post_message(channel_id, json!({ "embeds": [Self::embed_json(embed)] }))
            .await
    }

    async fn edit_message(
        &self,
        handle: &MessageHandle,
        content: Option<&str>,
        embed: Option<&Embed>,
    ) -> Result<(), ChatError> {
        let url = format!(
            "{API_BASE}/channels/{}/messages/{}",
            handle.channel_id, handle.message_id
        );
        let body = json!({
            "content": content,
            "embeds": embed.map(|e| vec![Self::embed_json(e)]).unwrap_or_default(),
        });
        let resp = self
            .client
            .patch(&url)
            .header("Authorization", self.auth())
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Connection(e.to_string()))?;
        ensure_success(resp, "edit message").await?;
        Ok(())
    }

    async fn delete_message(&self, handle: &MessageHandle) -> Result<(), ChatError> {
        let url = format!(
            "{API_BASE}/channels/{}/messages/{}",
            handle.channel_id, handle.message_id
        );
        let resp = self
            .client
            .delete(&url)
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(|e| ChatError::Connection(e.to_string()))?;
        ensure_success(resp, "delete message").await?;
        Ok(())
    }

    async fn bulk_delete(
        &self,
        channel_id: &str,
        handles: &[MessageHandle],
    ) -> Result<(), ChatError> {
        match handles {
            [] => Ok(()),
            // The bulk endpoint requires 2..=100 messages.
            [only] => self.delete_message(only).await,
            _ => {
                let url = format!("{API_BASE}/channels/{channel_id}/messages/bulk-delete");
                let ids: Vec<&str> = handles
                    .iter()
                    .take(100)
                    .map(|h| h.message_id.as_str())
                    .collect();
                let resp = self
                    .client
                    .post(&url)
                    .header("Authorization", self.auth())
                    .json(&json!({ "messages": ids }))
                    .send()
                    .await
                    .map_err(|e| ChatError::Connection(e.to_string()))?;
                ensure_success(resp, "bulk delete").await?;
                Ok(())
            }
        }
    }

    async fn add_reaction(&self, handle: &MessageHandle, symbol: &str) -> Result<(), ChatError> {
        let url = format!(
            "{API_BASE}/channels/{}/messages/{}/reactions/{}/@me",
            handle.channel_id,
            handle.message_id,
            urlencoding::encode(symbol)
        );
        let resp = self
            .client
            .put(&url)
            .header("Authorization", self.auth())
            .header("Content-Length", "0")
            .send()
            .await
            .map_err(|e| ChatError::Connection(e.to_string()))?;
        ensure_success(resp, "add reaction").await?;
        Ok(())
    }

    async fn remove_reaction(
        &self,
        handle: &MessageHandle,
        symbol: &str,
        user_id: &str,
    ) -> Result<(), ChatError> {
        let url = format!(
            "{API_BASE}/channels/{}/messages/{}/reactions/{}/{user_id}",
            handle.channel_id,
            handle.message_id,
            urlencoding::encode(symbol)
        );
        let resp = self
            .client
            .delete(&url)
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(|e| ChatError::Connection(e.to_string()))?;
        ensure_success(resp, "remove reaction").await?;
        Ok(())
    }
}

/// Strip `<#…>` / `<@&…>` mention wrappers down to the inner id, if the text
/// is a mention at all.
fn mention_id<'a>(text: &'a str, prefixes: &[&str]) -> Option<&'a str> {
    let inner = text.strip_suffix('>')?;
    prefixes.iter().find_map(|p| inner.strip_prefix(p))
}

#[async_trait]
impl RefResolver for DiscordChat {
    async fn resolve_channel(&self, guild_id: i64, text: &str) -> Result<String, ResolveError> {
        let entries = self.guild_directory(guild_id, "channels").await?;
        resolve_in_directory(&entries, text, &["<#"])
            .ok_or_else(|| ResolveError::NotFound(text.to_string()))
    }

    async fn resolve_role(&self, guild_id: i64, text: &str) -> Result<String, ResolveError> {
        let entries = self.guild_directory(guild_id, "roles").await?;
        resolve_in_directory(&entries, text, &["<@&"])
            .ok_or_else(|| ResolveError::NotFound(text.to_string()))
    }
}

/// Match mention syntax, a raw id, or a (case-insensitive) name against a
/// guild directory listing.
fn resolve_in_directory(
    entries: &[serde_json::Value],
    text: &str,
    mention_prefixes: &[&str],
) -> Option<String> {
    let wanted_id = mention_id(text, mention_prefixes)
        .or_else(|| text.chars().all(|c| c.is_ascii_digit()).then_some(text));
    let wanted_name = text.trim_start_matches('#').to_lowercase();
    entries
        .iter()
        .find(|e| {
            let id = e.get("id").and_then(|i| i.as_str()).unwrap_or_default();
            let name = e.get("name").and_then(|n| n.as_str()).unwrap_or_default();
            wanted_id == Some(id) || name.to_lowercase() == wanted_name
        })
        .and_then(|e| e.get("id").and_then(|i| i.as_str()).map(String::from))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intents_cover_reactions_and_content() {
        assert_ne!(GATEWAY_INTENTS & 1, 0, "GUILDS");
        assert_ne!(GATEWAY_INTENTS & 512, 0, "GUILD_MESSAGES");
        assert_ne!(GATEWAY_INTENTS & 1024, 0, "GUILD_MESSAGE_REACTIONS");
        assert_ne!(GATEWAY_INTENTS & 32768, 0, "MESSAGE_CONTENT");
    }

    #[test]
    fn parse_message_create_skips_bots_and_self() {
        let own = serde_json::json!({
            "id": "10", "channel_id": "20", "guild_id": "30",
            "author": {"id": "99"}, "content": "hi"
        });
        assert!(parse_message_create(&own, "99").is_none());

        let bot = serde_json::json!({
            "id": "10", "channel_id": "20",
            "author": {"id": "50", "bot": true}, "content": "hi"
        });
        assert!(parse_message_create(&bot, "99").is_none());

        let human = serde_json::json!({
            "id": "10", "channel_id": "20", "guild_id": "30",
            "author": {"id": "50"}, "content": "hi"
        });
        let msg = parse_message_create(&human, "99").unwrap();
        assert_eq!(msg.guild_id, Some(30));
        assert_eq!(msg.content, "hi");
    }

    #[test]
    fn parse_reaction_add_extracts_unicode_symbol() {
        let d = serde_json::json!({
            "user_id": "50", "channel_id": "20", "message_id": "10",
            "emoji": {"id": null, "name": "\u{2705}"}
        });
        let r = parse_reaction_add(&d, "99").unwrap();
        assert_eq!(r.symbol, "\u{2705}");
    }

    #[test]
    fn custom_emoji_symbol_includes_id() {
        let emoji = serde_json::json!({"id": "123", "name": "tick_yes"});
        assert_eq!(emoji_symbol(&emoji), "tick_yes:123");
    }

    #[test]
    fn embed_json_includes_fields() {
        let embed = Embed {
            title: Some("Title".into()),
            description: "Body".into(),
            colour: 0x00FF_00,
            fields: vec![crate::chat::EmbedField {
                name: "(#0) Name".into(),
                value: "Who?".into(),
                inline: false,
            }],
        };
        let value = DiscordChat::embed_json(&embed);
        assert_eq!(value["title"], "Title");
        assert_eq!(value["fields"][0]["name"], "(#0) Name");
    }

    #[test]
    fn directory_resolution_matches_mention_id_and_name() {
        let entries = vec![
            serde_json::json!({"id": "111", "name": "general"}),
            serde_json::json!({"id": "222", "name": "Profiles"}),
        ];
        assert_eq!(
            resolve_in_directory(&entries, "<#222>", &["<#"]),
            Some("222".into())
        );
        assert_eq!(
            resolve_in_directory(&entries, "111", &["<#"]),
            Some("111".into())
        );
        assert_eq!(
            resolve_in_directory(&entries, "#profiles", &["<#"]),
            Some("222".into())
        );
        assert_eq!(resolve_in_directory(&entries, "nowhere", &["<#"]), None);
    }
}
