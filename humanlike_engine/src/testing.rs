//! In-memory stand-ins for the model backend and the chat gateway.

use async_trait::async_trait;
use futures_util::stream;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::{EngineError, Result};
use crate::history::{ChannelId, MessageId};
use crate::llm_client::{ChatModel, DeltaStream, Message, StreamEvent};
use crate::transport::Transport;

/// Replays scripted delta lists, one per `stream_chat` call.
#[derive(Default)]
pub struct ScriptedModel {
    streams: Mutex<VecDeque<Vec<String>>>,
    answers: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<Vec<Message>>>,
    fail_with_status: Option<u16>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(status: u16) -> Self {
        Self {
            fail_with_status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_stream(self, deltas: &[&str]) -> Self {
        self.streams
            .lock()
            .unwrap()
            .push_back(deltas.iter().map(|d| d.to_string()).collect());
        self
    }

    pub fn with_answer(self, answer: &str) -> Self {
        self.answers.lock().unwrap().push_back(answer.to_string());
        self
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn stream_chat(&self, messages: Vec<Message>) -> Result<DeltaStream> {
        self.requests.lock().unwrap().push(messages);
        if let Some(status) = self.fail_with_status {
            return Err(EngineError::Status {
                status,
                body: "scripted failure".to_string(),
            });
        }
        let deltas = self.streams.lock().unwrap().pop_front().unwrap_or_default();
        let events: Vec<Result<StreamEvent>> = deltas
            .into_iter()
            .map(|d| Ok(StreamEvent::Delta(d)))
            .chain(std::iter::once(Ok(StreamEvent::Done)))
            .collect();
        Ok(Box::pin(stream::iter(events)))
    }

    async fn complete(&self, messages: Vec<Message>) -> Result<String> {
        self.requests.lock().unwrap().push(messages);
        if let Some(status) = self.fail_with_status {
            return Err(EngineError::Status {
                status,
                body: "scripted failure".to_string(),
            });
        }
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(EngineError::EmptyResponse)
    }
}

/// Collects outbound messages; can be told to fail after N sends.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(ChannelId, String)>>,
    fail_after: Option<usize>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(sends: usize) -> Self {
        Self {
            fail_after: Some(sends),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(ChannelId, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|(_, text)| text).collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, channel_id: ChannelId, text: &str) -> Result<MessageId> {
        let mut sent = self.sent.lock().unwrap();
        if self.fail_after.map(|n| sent.len() >= n).unwrap_or(false) {
            return Err(EngineError::Send {
                channel: channel_id,
                reason: "gateway offline".to_string(),
            });
        }
        sent.push((channel_id, text.to_string()));
        Ok(MessageId(1000 + sent.len() as i64))
    }
}
