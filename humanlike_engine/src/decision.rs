//! Should the bot answer this message?
//!
//! Rules are checked in order and the first match wins. Only the nickname,
//! recent-conversation and baseline rules draw from the random source; the
//! others always answer.

use chrono::{DateTime, Duration, Utc};

use crate::history::{ChatMessage, UserId};
use crate::rng::RandomSource;

const REPLY_CHAIN_CUTOFF_SECS: i64 = 2 * 60;
const ALTERNATING_CUTOFF_SECS: i64 = 3 * 60;
const NICKNAME_PROBABILITY: f64 = 0.8;
const RECENT_CONVERSATION_PROBABILITY: f64 = 0.4;
const BASELINE_PROBABILITY: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionReason {
    Mention,
    ReplyChain,
    Alternating,
    Nickname,
    RecentConversation,
    Baseline,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplyDecision {
    pub should_reply: bool,
    pub probability: f64,
    pub reason: DecisionReason,
}

/// What the decision engine needs to know about the incoming message.
#[derive(Debug, Clone, Copy)]
pub struct DecisionInput<'a> {
    pub author_id: UserId,
    pub text: &'a str,
    pub is_mention: bool,
    pub now: DateTime<Utc>,
}

pub struct DecisionEngine {
    nicknames: Vec<String>,
}

impl DecisionEngine {
    pub fn new(nicknames: Vec<String>) -> Self {
        let nicknames = nicknames
            .into_iter()
            .filter(|name| !name.is_empty())
            .collect();
        Self { nicknames }
    }

    /// Decide against `recent`, the channel window (oldest first, already
    /// cut to the decision window) that ends with the incoming message.
    ///
    /// The reply-chain rule looks at the entry just before the incoming
    /// message; every other rule sees the whole window.
    pub fn decide(
        &self,
        input: DecisionInput<'_>,
        recent: &[ChatMessage],
        rng: &dyn RandomSource,
    ) -> ReplyDecision {
        if input.is_mention {
            return certain(DecisionReason::Mention);
        }

        let previous = recent.split_last().and_then(|(_, before)| before.last());
        if let Some(previous) = previous {
            if previous.is_from_bot
                && age(previous, input.now) < Duration::seconds(REPLY_CHAIN_CUTOFF_SECS)
            {
                return certain(DecisionReason::ReplyChain);
            }
        }

        if has_alternating_turns(recent, input.author_id)
            && recent
                .last()
                .map(|last| age(last, input.now) < Duration::seconds(ALTERNATING_CUTOFF_SECS))
                .unwrap_or(false)
        {
            return certain(DecisionReason::Alternating);
        }

        if self
            .nicknames
            .iter()
            .any(|name| input.text.contains(name.as_str()))
        {
            return draw(DecisionReason::Nickname, NICKNAME_PROBABILITY, rng);
        }

        if has_recent_conversation(recent, input.author_id) {
            return draw(
                DecisionReason::RecentConversation,
                RECENT_CONVERSATION_PROBABILITY,
                rng,
            );
        }

        draw(DecisionReason::Baseline, BASELINE_PROBABILITY, rng)
    }
}

fn certain(reason: DecisionReason) -> ReplyDecision {
    ReplyDecision {
        should_reply: true,
        probability: 1.0,
        reason,
    }
}

fn draw(reason: DecisionReason, probability: f64, rng: &dyn RandomSource) -> ReplyDecision {
    ReplyDecision {
        should_reply: rng.next_f64() < probability,
        probability,
        reason,
    }
}

fn age(message: &ChatMessage, now: DateTime<Utc>) -> Duration {
    now.signed_duration_since(message.timestamp)
}

/// The author and the bot have traded turns at least once in `recent`.
/// Messages from third parties neither break nor create the pattern.
fn has_alternating_turns(recent: &[ChatMessage], author: UserId) -> bool {
    let mut author_count = 0;
    let mut bot_count = 0;
    let mut last_was_bot = false;
    let mut alternated = false;

    for message in recent {
        if message.is_from_bot {
            bot_count += 1;
            if !last_was_bot && author_count > 0 {
                alternated = true;
            }
            last_was_bot = true;
        } else if message.author_id == author {
            author_count += 1;
            if last_was_bot {
                alternated = true;
            }
            last_was_bot = false;
        }
    }

    author_count >= 1 && bot_count >= 1 && alternated
}

/// The author spoke at least twice and the bot answered one of those
/// messages directly.
fn has_recent_conversation(recent: &[ChatMessage], author: UserId) -> bool {
    let author_count = recent
        .iter()
        .filter(|m| !m.is_from_bot && m.author_id == author)
        .count();
    let bot_answered = recent
        .windows(2)
        .any(|pair| !pair[0].is_from_bot && pair[0].author_id == author && pair[1].is_from_bot);

    author_count >= 2 && bot_answered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::ChannelId;
    use crate::rng::SequenceRandom;

    const BOT: UserId = UserId(1);
    const ALICE: UserId = UserId(2);
    const BOB: UserId = UserId(3);

    fn msg(author: UserId, minutes_ago: i64, now: DateTime<Utc>) -> ChatMessage {
        ChatMessage {
            channel_id: ChannelId(10),
            author_id: author,
            content: format!("from {}", author),
            timestamp: now - Duration::minutes(minutes_ago),
            is_from_bot: author == BOT,
            reference_id: None,
        }
    }

    fn input(author: UserId, text: &str, now: DateTime<Utc>) -> DecisionInput<'_> {
        DecisionInput {
            author_id: author,
            text,
            is_mention: false,
            now,
        }
    }

    fn engine() -> DecisionEngine {
        DecisionEngine::new(vec!["Paku".to_string()])
    }

    #[test]
    fn mention_always_replies() {
        let now = Utc::now();
        let rng = SequenceRandom::constant(0.999);
        let histories = vec![
            vec![],
            vec![msg(BOB, 50, now)],
            vec![msg(BOT, 40, now), msg(BOB, 30, now)],
        ];
        for history in histories {
            let mut event = input(ALICE, "anyone?", now);
            event.is_mention = true;
            let decision = engine().decide(event, &history, &rng);
            assert!(decision.should_reply);
            assert_eq!(decision.reason, DecisionReason::Mention);
            assert_eq!(decision.probability, 1.0);
        }
        assert_eq!(rng.draws(), 0);
    }

    #[test]
    fn fresh_bot_message_continues_reply_chain() {
        let now = Utc::now();
        let rng = SequenceRandom::constant(0.999);
        let history = vec![msg(BOB, 3, now), msg(BOT, 1, now), msg(ALICE, 0, now)];
        let decision = engine().decide(input(ALICE, "lol", now), &history, &rng);
        assert_eq!(decision.reason, DecisionReason::ReplyChain);
        assert!(decision.should_reply);
    }

    #[test]
    fn stale_bot_message_is_not_a_reply_chain() {
        let now = Utc::now();
        let rng = SequenceRandom::constant(0.999);
        let history = vec![msg(BOB, 6, now), msg(BOT, 5, now), msg(BOB, 0, now)];
        let decision = engine().decide(input(BOB, "lol", now), &history, &rng);
        assert_ne!(decision.reason, DecisionReason::ReplyChain);
        assert_eq!(decision.reason, DecisionReason::Alternating);
    }

    #[test]
    fn returning_author_resumes_exchange_with_bot() {
        let now = Utc::now();
        let rng = SequenceRandom::constant(0.99);
        // the bot's last word is past the reply-chain cutoff, the new message is fresh
        let history = vec![msg(ALICE, 5, now), msg(BOT, 4, now), msg(ALICE, 0, now)];
        let decision = engine().decide(input(ALICE, "and then?", now), &history, &rng);
        assert_eq!(decision.reason, DecisionReason::Alternating);
        assert!(decision.should_reply);
        assert_eq!(rng.draws(), 0);
    }

    #[test]
    fn alternating_exchange_with_third_party_in_between() {
        let now = Utc::now();
        let rng = SequenceRandom::constant(0.999);
        let history = vec![
            msg(ALICE, 4, now),
            msg(BOT, 3, now),
            msg(BOB, 2, now),
            msg(ALICE, 0, now),
        ];
        let decision = engine().decide(input(ALICE, "and then?", now), &history, &rng);
        assert_eq!(decision.reason, DecisionReason::Alternating);
        assert!(decision.should_reply);
    }

    #[test]
    fn alternating_exchange_expires_after_three_minutes() {
        let now = Utc::now();
        let rng = SequenceRandom::constant(0.999);
        // the incoming message itself was delivered late
        let history = vec![msg(ALICE, 7, now), msg(BOT, 6, now), msg(ALICE, 4, now)];
        let decision = engine().decide(input(ALICE, "and then?", now), &history, &rng);
        assert_ne!(decision.reason, DecisionReason::Alternating);
    }

    #[test]
    fn nickname_uses_eighty_percent() {
        let now = Utc::now();
        let history = [msg(BOB, 0, now)];
        let yes = engine().decide(
            input(BOB, "hey Paku what's up", now),
            &history,
            &SequenceRandom::constant(0.79),
        );
        assert_eq!(yes.reason, DecisionReason::Nickname);
        assert_eq!(yes.probability, 0.8);
        assert!(yes.should_reply);

        let no = engine().decide(
            input(BOB, "hey Paku what's up", now),
            &history,
            &SequenceRandom::constant(0.8),
        );
        assert!(!no.should_reply);
    }

    #[test]
    fn nickname_match_is_case_sensitive() {
        let now = Utc::now();
        let decision = engine().decide(
            input(BOB, "hey paku", now),
            &[msg(BOB, 0, now)],
            &SequenceRandom::constant(0.5),
        );
        assert_eq!(decision.reason, DecisionReason::Baseline);
    }

    #[test]
    fn recent_conversation_counts_the_incoming_message() {
        let now = Utc::now();
        // alice -> bot -> bob -> alice (late); alice twice, bot answered her
        let history = vec![
            msg(ALICE, 20, now),
            msg(BOT, 19, now),
            msg(BOB, 18, now),
            msg(ALICE, 10, now),
        ];
        let decision = engine().decide(
            input(ALICE, "right?", now),
            &history,
            &SequenceRandom::constant(0.39),
        );
        assert_eq!(decision.reason, DecisionReason::RecentConversation);
        assert_eq!(decision.probability, 0.4);
        assert!(decision.should_reply);

        // without the incoming message alice only appears once
        assert!(!has_recent_conversation(&history[..3], ALICE));
    }

    #[test]
    fn baseline_is_ten_percent() {
        let now = Utc::now();
        let history = vec![msg(BOB, 1, now), msg(BOB, 1, now), msg(ALICE, 0, now)];
        let yes = engine().decide(input(ALICE, "hm", now), &history, &SequenceRandom::constant(0.05));
        assert_eq!(yes.reason, DecisionReason::Baseline);
        assert_eq!(yes.probability, 0.1);
        assert!(yes.should_reply);

        let no = engine().decide(input(ALICE, "hm", now), &history, &SequenceRandom::constant(0.1));
        assert!(!no.should_reply);
    }

    #[test]
    fn other_users_do_not_form_alternation() {
        let now = Utc::now();
        let history = vec![msg(BOB, 2, now), msg(BOT, 2, now), msg(BOB, 1, now)];
        assert!(!has_alternating_turns(&history, ALICE));
        assert!(has_alternating_turns(&history, BOB));
    }
}
