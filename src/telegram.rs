//! Telegram Bot API gateway.
//!
//! Long-polls `getUpdates` for group messages and turns them into
//! [`InboundEvent`]s; outbound utterances go through `sendMessage`.
//! A message counts as a mention when it contains `@<bot username>` or
//! replies to one of the bot's own messages.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use humanlike_engine::{ChannelId, EngineError, InboundEvent, MessageId, Transport, UserId};

// Telegram enforces a 4096-character limit per message.
const MAX_MESSAGE_CHARS: usize = 4096;
const POLL_TIMEOUT_SECS: u64 = 30;

// ─── Telegram API types ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    pub date: i64,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub reply_to_message: Option<Box<TelegramMessage>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Deserialize)]
struct SentMessage {
    message_id: i64,
}

// ─── Client ──────────────────────────────────────────────────────────────────

pub struct TelegramClient {
    api_base: String,
    client: reqwest::Client,
}

impl TelegramClient {
    pub fn new(token: &str, client: reqwest::Client) -> Self {
        Self {
            api_base: format!("https://api.telegram.org/bot{}", token.trim()),
            client,
        }
    }

    /// The bot's own account, used for self-filtering and mention detection.
    pub async fn get_me(&self) -> Result<TelegramUser> {
        let url = format!("{}/getMe", self.api_base);
        let body: TelegramResponse<TelegramUser> = self
            .client
            .get(&url)
            .send()
            .await
            .context("Telegram getMe request failed")?
            .json()
            .await
            .context("Telegram getMe returned an unreadable body")?;

        if !body.ok {
            return Err(anyhow!(
                "Telegram getMe rejected: {}",
                body.description.unwrap_or_default()
            ));
        }
        body.result
            .ok_or_else(|| anyhow!("Telegram getMe returned no result"))
    }

    /// One long-poll round. Errors are logged and back off before returning
    /// `None` so callers can simply loop.
    pub async fn poll_updates(&self, offset: i64) -> Option<Vec<Update>> {
        let url = format!("{}/getUpdates", self.api_base);
        let params = serde_json::json!({
            "offset": offset,
            "timeout": POLL_TIMEOUT_SECS,
            "allowed_updates": ["message"]
        });

        let resp = match self.client.post(&url).json(&params).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Telegram getUpdates error: {}", e);
                tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
                return None;
            }
        };

        let body: TelegramResponse<Vec<Update>> = match resp.json().await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!("Telegram getUpdates parse error: {}", e);
                tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
                return None;
            }
        };

        if !body.ok {
            tracing::warn!(
                "Telegram API returned ok=false: {}",
                body.description.unwrap_or_default()
            );
            tokio::time::sleep(tokio::time::Duration::from_secs(10)).await;
            return None;
        }

        Some(body.result.unwrap_or_default())
    }
}

#[async_trait]
impl Transport for TelegramClient {
    async fn send(&self, channel_id: ChannelId, text: &str) -> humanlike_engine::Result<MessageId> {
        let text = truncate_chars(text, MAX_MESSAGE_CHARS);
        let url = format!("{}/sendMessage", self.api_base);
        let payload = serde_json::json!({ "chat_id": channel_id.0, "text": text });

        let send_error = |reason: String| {
            tracing::warn!("Telegram sendMessage to {} failed: {}", channel_id, reason);
            EngineError::Send {
                channel: channel_id,
                reason,
            }
        };

        let resp = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| send_error(e.to_string()))?;

        let status = resp.status();
        let body: TelegramResponse<SentMessage> = resp
            .json()
            .await
            .map_err(|e| send_error(format!("HTTP {}: {}", status, e)))?;

        match body.result {
            Some(sent) if body.ok => {
                tracing::debug!("Telegram: sent message {} to chat {}", sent.message_id, channel_id);
                Ok(MessageId(sent.message_id))
            }
            _ => Err(send_error(format!(
                "HTTP {}: {}",
                status,
                body.description.unwrap_or_else(|| "no result".to_string())
            ))),
        }
    }
}

// ─── Mapping ─────────────────────────────────────────────────────────────────

/// Convert an update into an engine event. Updates without a text message
/// or an author are dropped.
pub fn to_inbound_event(update: Update, bot: &TelegramUser) -> Option<InboundEvent> {
    let msg = update.message?;
    let author = msg.from.as_ref()?;
    let text = msg.text.as_deref()?.trim();
    if text.is_empty() {
        return None;
    }

    let mentioned_by_name = bot
        .username
        .as_deref()
        .map(|name| {
            text.to_lowercase()
                .contains(&format!("@{}", name.to_lowercase()))
        })
        .unwrap_or(false);
    let replied_to_bot = msg
        .reply_to_message
        .as_ref()
        .and_then(|parent| parent.from.as_ref())
        .map(|parent_author| parent_author.id == bot.id)
        .unwrap_or(false);

    Some(InboundEvent {
        channel_id: ChannelId(msg.chat.id),
        author_id: UserId(author.id),
        text: text.to_string(),
        is_mention: mentioned_by_name || replied_to_bot,
        message_id: Some(MessageId(msg.message_id)),
        timestamp: DateTime::<Utc>::from_timestamp(msg.date, 0).unwrap_or_else(Utc::now),
    })
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
