//! Reply pipeline: record, decide, generate, segment, pace, send.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::EngineConfig;
use crate::decision::{DecisionEngine, DecisionInput, ReplyDecision};
use crate::error::{EngineError, Result};
use crate::history::{ChannelId, ChatMessage, HistoryStore};
use crate::llm_client::{ChatModel, Message};
use crate::rng::RandomSource;
use crate::segmenter::UtteranceStream;
use crate::transport::{InboundEvent, Transport};
use crate::typing::TypingSimulator;

const PROACTIVE_CONTEXT_MESSAGES: usize = 5;
const INTER_MESSAGE_PAUSE_SECS: (u32, u32) = (1, 3);

/// What happened to an inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    /// Sent by the bot itself, from a filtered channel, or empty.
    Ignored,
    /// Recorded; the decision engine chose to stay quiet.
    Declined(ReplyDecision),
    /// Recorded, but another generation is already running in the channel.
    Busy(ReplyDecision),
    /// A reply turn was delivered as this many messages.
    Replied { decision: ReplyDecision, sent: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProactiveOutcome {
    NoHistory,
    Declined,
    Spoke { sent: usize },
}

/// Marks a channel as having a generation in flight until dropped.
pub struct ChannelGuard {
    active: Arc<Mutex<HashSet<ChannelId>>>,
    channel_id: ChannelId,
}

impl ChannelGuard {
    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.channel_id);
    }
}

pub struct Engine {
    config: EngineConfig,
    history: Arc<HistoryStore>,
    decision: DecisionEngine,
    model: Arc<dyn ChatModel>,
    transport: Arc<dyn Transport>,
    rng: Arc<dyn RandomSource>,
    typing: TypingSimulator,
    active: Arc<Mutex<HashSet<ChannelId>>>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        model: Arc<dyn ChatModel>,
        transport: Arc<dyn Transport>,
        rng: Arc<dyn RandomSource>,
    ) -> Self {
        let config = config.normalized();
        let history = Arc::new(HistoryStore::new(config.behavior.history_capacity));
        let decision = DecisionEngine::new(config.bot.nicknames.clone());
        let typing = TypingSimulator::new(
            config.behavior.min_typing_speed,
            config.behavior.max_typing_speed,
            rng.clone(),
        );

        Self {
            config,
            history,
            decision,
            model,
            transport,
            rng,
            typing,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    pub fn rng(&self) -> &Arc<dyn RandomSource> {
        &self.rng
    }

    /// Claim `channel_id` for one generation turn. `None` if a turn is
    /// already running there.
    pub fn try_claim(&self, channel_id: ChannelId) -> Option<ChannelGuard> {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !active.insert(channel_id) {
            return None;
        }
        Some(ChannelGuard {
            active: self.active.clone(),
            channel_id,
        })
    }

    /// Process one inbound message end to end.
    pub async fn handle_event(&self, event: InboundEvent) -> Result<EventOutcome> {
        if event.author_id == self.config.bot.user_id() {
            return Ok(EventOutcome::Ignored);
        }
        if !self.config.allows_channel(event.channel_id) {
            tracing::trace!("Channel {} not whitelisted", event.channel_id);
            return Ok(EventOutcome::Ignored);
        }
        if event.text.trim().is_empty() {
            return Ok(EventOutcome::Ignored);
        }

        let channel_id = event.channel_id;
        self.history.record(event.to_chat_message());
        let recent = self
            .history
            .snapshot(channel_id, self.config.behavior.decision_window);

        let decision = self.decision.decide(
            DecisionInput {
                author_id: event.author_id,
                text: &event.text,
                is_mention: event.is_mention,
                now: Utc::now(),
            },
            &recent,
            self.rng.as_ref(),
        );
        tracing::debug!(
            "Channel {} author {}: {:?} (p={:.2}) -> {}",
            channel_id,
            event.author_id,
            decision.reason,
            decision.probability,
            if decision.should_reply { "reply" } else { "stay quiet" }
        );

        if !decision.should_reply {
            return Ok(EventOutcome::Declined(decision));
        }

        let Some(_guard) = self.try_claim(channel_id) else {
            tracing::debug!("Channel {} already has a reply in flight; skipping", channel_id);
            return Ok(EventOutcome::Busy(decision));
        };

        let sent = self.reply(channel_id).await?;
        Ok(EventOutcome::Replied { decision, sent })
    }

    /// Generate and deliver a reply to the current channel history.
    pub async fn reply(&self, channel_id: ChannelId) -> Result<usize> {
        let messages = self.reply_context(channel_id)?;
        self.deliver_turn(channel_id, messages).await
    }

    /// System prompt plus the recent history as user/assistant turns.
    pub fn reply_context(&self, channel_id: ChannelId) -> Result<Vec<Message>> {
        let history = self
            .history
            .snapshot(channel_id, self.config.behavior.context_messages);
        if history.is_empty() {
            return Err(EngineError::NoHistory(channel_id));
        }

        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(Message::system(self.config.prompts.reply_system.clone()));
        for entry in history {
            messages.push(if entry.is_from_bot {
                Message::assistant(entry.content)
            } else {
                Message::user(entry.content)
            });
        }
        Ok(messages)
    }

    /// Stream a completion and deliver it utterance by utterance.
    ///
    /// Messages already sent stay sent when a later step fails; the error
    /// ends the turn.
    pub async fn deliver_turn(&self, channel_id: ChannelId, messages: Vec<Message>) -> Result<usize> {
        let deltas = self.model.stream_chat(messages).await?;
        let mut utterances = UtteranceStream::new(deltas, &self.config.segmenter);
        let mut sent = 0;

        while let Some(item) = utterances.next().await {
            let utterance = item?;
            self.typing.pause_for(&utterance.text).await;

            let message_id = self.transport.send(channel_id, &utterance.text).await?;
            self.history.record(ChatMessage {
                channel_id,
                author_id: self.config.bot.user_id(),
                content: utterance.text,
                timestamp: Utc::now(),
                is_from_bot: true,
                reference_id: Some(message_id),
            });
            sent += 1;

            if !utterance.is_final {
                let (low, high) = INTER_MESSAGE_PAUSE_SECS;
                let pause = self.rng.range_inclusive(low, high);
                tokio::time::sleep(Duration::from_secs(pause as u64)).await;
            }
        }

        tracing::info!("Delivered {} message(s) to channel {}", sent, channel_id);
        Ok(sent)
    }

    /// Ask the model whether joining the conversation now makes sense.
    pub async fn judge_proactive(&self, channel_id: ChannelId) -> Result<Option<bool>> {
        let history = self
            .history
            .snapshot(channel_id, self.config.behavior.context_messages);
        if history.is_empty() {
            return Ok(None);
        }

        let messages = vec![
            Message::system(self.config.prompts.proactive_judge_system.clone()),
            Message::user(format!(
                "{}\n\nBased on the conversation above, should you join in on your own? \
                 Answer only 'yes' or 'no':",
                render_transcript(&history)
            )),
        ];

        let answer = self.model.complete(messages).await?;
        let affirmative = answer.trim().to_lowercase().contains("yes");
        tracing::debug!(
            "Proactive judgment for channel {}: {:?} -> {}",
            channel_id,
            answer.trim(),
            affirmative
        );
        Ok(Some(affirmative))
    }

    /// Start or join a topic without being addressed.
    pub async fn speak_proactively(&self, channel_id: ChannelId) -> Result<usize> {
        let history = self
            .history
            .snapshot(channel_id, PROACTIVE_CONTEXT_MESSAGES);

        let prompt = if history.is_empty() {
            "Start a new chat topic: share a view, ask a question or bring up something \
             topical. Keep it casual and short:"
                .to_string()
        } else {
            format!(
                "{}\n\nUsing the context above, or a fresh topic if nothing fits, say something \
                 the way a normal person would:",
                render_transcript(&history)
            )
        };

        let messages = vec![
            Message::system(self.config.prompts.proactive_system.clone()),
            Message::user(prompt),
        ];
        self.deliver_turn(channel_id, messages).await
    }

    /// Judge, and on a yes speak. Once speaking was attempted the channel's
    /// idle clock is refreshed, even if the attempt failed.
    pub async fn run_proactive(&self, channel_id: ChannelId) -> Result<ProactiveOutcome> {
        let outcome = match self.judge_proactive(channel_id).await? {
            None => return Ok(ProactiveOutcome::NoHistory),
            Some(false) => Ok(ProactiveOutcome::Declined),
            Some(true) => self
                .speak_proactively(channel_id)
                .await
                .map(|sent| ProactiveOutcome::Spoke { sent }),
        };

        if matches!(outcome, Ok(ProactiveOutcome::Spoke { .. }) | Err(_)) {
            self.history.touch(channel_id, Utc::now());
        }
        outcome
    }
}

fn render_transcript(history: &[ChatMessage]) -> String {
    let mut transcript = String::from("Recent messages in the group chat:");
    for entry in history {
        let speaker = if entry.is_from_bot { "You" } else { "Others" };
        transcript.push_str(&format!("\n{}: {}", speaker, entry.content));
    }
    transcript
}
