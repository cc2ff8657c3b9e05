//! Volatile per-channel message log.
//!
//! Every channel keeps at most `capacity` messages (oldest evicted first) and
//! the timestamp of the last recorded message. Nothing here survives a
//! restart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard};

pub const DEFAULT_HISTORY_CAPACITY: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_from_bot: bool,
    /// Message this one answers or was assigned by the transport, if known.
    pub reference_id: Option<MessageId>,
}

#[derive(Debug, Default)]
struct ChannelState {
    messages: VecDeque<ChatMessage>,
    last_active_at: Option<DateTime<Utc>>,
}

pub struct HistoryStore {
    capacity: usize,
    channels: Mutex<HashMap<ChannelId, ChannelState>>,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Helper to lock the channel map. A poisoned lock still holds a
    /// consistent map because every critical section is a single push/pop.
    fn lock_channels(&self) -> MutexGuard<'_, HashMap<ChannelId, ChannelState>> {
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a message, evicting the oldest entry when the channel is full.
    /// Messages with blank content are dropped.
    pub fn record(&self, message: ChatMessage) {
        if message.content.trim().is_empty() {
            tracing::debug!(
                "Dropping empty message for channel {}",
                message.channel_id
            );
            return;
        }

        let mut channels = self.lock_channels();
        let state = channels.entry(message.channel_id).or_default();
        while state.messages.len() >= self.capacity {
            state.messages.pop_front();
        }
        state.last_active_at = Some(message.timestamp);
        state.messages.push_back(message);
    }

    /// The most recent `max_n` messages in chronological order.
    pub fn snapshot(&self, channel_id: ChannelId, max_n: usize) -> Vec<ChatMessage> {
        let channels = self.lock_channels();
        match channels.get(&channel_id) {
            Some(state) => {
                let skip = state.messages.len().saturating_sub(max_n);
                state.messages.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// Timestamp of the last recorded message, `None` if the channel is unknown.
    pub fn last_active(&self, channel_id: ChannelId) -> Option<DateTime<Utc>> {
        self.lock_channels()
            .get(&channel_id)
            .and_then(|state| state.last_active_at)
    }

    /// Refresh the idle clock of a known channel without adding a message.
    pub fn touch(&self, channel_id: ChannelId, at: DateTime<Utc>) {
        if let Some(state) = self.lock_channels().get_mut(&channel_id) {
            state.last_active_at = Some(at);
        }
    }

    /// Every channel that has had at least one message recorded.
    pub fn channels(&self) -> Vec<ChannelId> {
        let mut ids: Vec<ChannelId> = self.lock_channels().keys().copied().collect();
        ids.sort();
        ids
    }
}
