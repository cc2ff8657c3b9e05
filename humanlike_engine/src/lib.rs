//! Conversational simulation engine for group chats.
//!
//! The engine keeps a short volatile history per channel, decides whether a
//! human-looking participant would answer an incoming message, turns a
//! streamed model response into a burst of separately paced messages, and
//! occasionally speaks up on its own when a channel has gone quiet.

pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod history;
pub mod http_client;
pub mod llm_client;
pub mod proactive;
pub mod rng;
pub mod runtime;
pub mod segmenter;
#[cfg(test)]
mod testing;
pub mod transport;
pub mod typing;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use history::{ChannelId, ChatMessage, HistoryStore, MessageId, UserId};
pub use transport::{InboundEvent, Transport};
