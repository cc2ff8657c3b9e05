//! Boundary to the chat gateway.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::history::{ChannelId, ChatMessage, MessageId, UserId};

/// A message delivered by the gateway.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub text: String,
    /// The bot was explicitly addressed (@-mention or reply to one of its messages).
    pub is_mention: bool,
    pub message_id: Option<MessageId>,
    pub timestamp: DateTime<Utc>,
}

impl InboundEvent {
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage {
            channel_id: self.channel_id,
            author_id: self.author_id,
            content: self.text.clone(),
            timestamp: self.timestamp,
            is_from_bot: false,
            reference_id: self.message_id,
        }
    }
}

/// Outbound side of the gateway.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, channel_id: ChannelId, text: &str) -> Result<MessageId>;
}
