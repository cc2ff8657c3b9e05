use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::history::{ChannelId, UserId, DEFAULT_HISTORY_CAPACITY};

const DEFAULT_MIN_TYPING_SPEED: u32 = 3;
const DEFAULT_MAX_TYPING_SPEED: u32 = 8;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotIdentity {
    #[serde(default)]
    pub self_id: i64,
    /// Aliases that count as being addressed (case-sensitive substring match).
    #[serde(default)]
    pub nicknames: Vec<String>,
}

impl BotIdentity {
    pub fn user_id(&self) -> UserId {
        UserId(self.self_id)
    }
}

// LLM configuration (OpenAI-compatible: Ollama, LM Studio, vLLM, OpenAI, etc.)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_llm_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_llm_model() -> String {
    "llama3.2".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    512
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_url(),
            api_key: None,
            model: default_llm_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorConfig {
    #[serde(default = "default_min_typing_speed")]
    pub min_typing_speed: u32,
    #[serde(default = "default_max_typing_speed")]
    pub max_typing_speed: u32,
    #[serde(default)]
    pub whitelist_enabled: bool,
    #[serde(default)]
    pub whitelist: Vec<ChannelId>,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// History entries sent to the model when generating a reply.
    #[serde(default = "default_context_messages")]
    pub context_messages: usize,
    /// History entries the reply heuristics look at.
    #[serde(default = "default_decision_window")]
    pub decision_window: usize,
}

fn default_min_typing_speed() -> u32 {
    DEFAULT_MIN_TYPING_SPEED
}

fn default_max_typing_speed() -> u32 {
    DEFAULT_MAX_TYPING_SPEED
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

fn default_context_messages() -> usize {
    10
}

fn default_decision_window() -> usize {
    5
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            min_typing_speed: default_min_typing_speed(),
            max_typing_speed: default_max_typing_speed(),
            whitelist_enabled: false,
            whitelist: Vec::new(),
            history_capacity: default_history_capacity(),
            context_messages: default_context_messages(),
            decision_window: default_decision_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmenterConfig {
    #[serde(default = "default_marker")]
    pub marker: String,
    /// Buffered characters after which text is flushed without a delimiter.
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,
}

fn default_marker() -> String {
    "<msg_break>".to_string()
}

fn default_flush_threshold() -> usize {
    100
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            marker: default_marker(),
            flush_threshold: default_flush_threshold(),
        }
    }
}

/// Idle windows below `below_secs` trigger with `probability` per tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IdleBucket {
    pub below_secs: u64,
    pub probability: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_idle_buckets")]
    pub buckets: Vec<IdleBucket>,
}

fn default_true() -> bool {
    true
}

fn default_tick_secs() -> u64 {
    60
}

fn default_idle_buckets() -> Vec<IdleBucket> {
    vec![
        IdleBucket {
            below_secs: 3 * 60,
            probability: 0.20,
        },
        IdleBucket {
            below_secs: 10 * 60,
            probability: 0.10,
        },
        IdleBucket {
            below_secs: 30 * 60,
            probability: 0.05,
        },
    ]
}

impl Default for ProactiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_secs: default_tick_secs(),
            buckets: default_idle_buckets(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    #[serde(default = "default_reply_prompt")]
    pub reply_system: String,
    #[serde(default = "default_judge_prompt")]
    pub proactive_judge_system: String,
    #[serde(default = "default_proactive_prompt")]
    pub proactive_system: String,
}

fn default_reply_prompt() -> String {
    "You are an ordinary human member of a group chat. Chat naturally, like a person would:\n\
     1. Never sound like a bot or an AI assistant.\n\
     2. Don't be formal or overly polite.\n\
     3. A little emoji or internet slang is fine, just don't overdo it.\n\
     4. Keep replies short and natural. You may have opinions of your own.\n\
     5. Never reveal that you are an AI.\n\
     6. Don't over-explain.\n\
     7. To send several messages in a row the way people do, separate them with <msg_break>. \
     For example: 'that's an interesting one<msg_break>I'd do it like this'.\n\
     8. Split long replies at natural pauses.\n\
     9. Sometimes a single '?' or '.' is the most human reply to something absurd."
        .to_string()
}

fn default_judge_prompt() -> String {
    "You are an ordinary member of a group chat. Decide whether you should join the current \
     conversation on your own. Consider whether the topic needs you, whether someone is waiting \
     for an answer, whether the chat has stalled, and whether you have something worth sharing. \
     Don't talk too much. Answer only 'yes' or 'no'."
        .to_string()
}

fn default_proactive_prompt() -> String {
    "You are an ordinary member of a group chat and want to start a topic or join the current \
     discussion. Speak casually like a normal person: share a view, ask a question or bring up \
     something topical. Never reveal that you are an AI and don't over-explain. To send several \
     messages in a row, separate them with <msg_break>. For example: \
     'this game is everywhere lately<msg_break>anyone played it?'"
        .to_string()
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            reply_system: default_reply_prompt(),
            proactive_judge_system: default_judge_prompt(),
            proactive_system: default_proactive_prompt(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub bot: BotIdentity,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub behavior: BehaviorConfig,
    #[serde(default)]
    pub segmenter: SegmenterConfig,
    #[serde(default)]
    pub proactive: ProactiveConfig,
    #[serde(default)]
    pub prompts: PromptConfig,
}

impl EngineConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Get the path to the config file (relative to executable)
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("humanlike.toml")
    }

    /// Load config from humanlike.toml next to the executable, falling back to env vars
    pub fn load() -> Self {
        let path = Self::config_path();
        match Self::load_from(&path) {
            Ok(config) => {
                tracing::info!("Loaded config from {:?}", path);
                config
            }
            Err(e) => {
                if path.exists() {
                    tracing::error!("Failed to load {:?}: {:#}", path, e);
                }
                tracing::warn!("No usable config file found, using defaults + env vars");
                Self::from_env().normalized()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        let config: EngineConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config {:?}", path))?;
        Ok(config.normalized())
    }

    /// Load from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(enabled) = env_flag("HUMANLIKE_ENABLED") {
            config.enabled = enabled;
        }

        if let Ok(url) = env::var("LLM_API_URL") {
            config.llm.base_url = url;
        }

        if let Ok(model) = env::var("LLM_MODEL") {
            config.llm.model = model;
        }

        if let Ok(key) = env::var("LLM_API_KEY") {
            if !key.trim().is_empty() {
                config.llm.api_key = Some(key);
            }
        }

        if let Ok(id) = env::var("BOT_SELF_ID") {
            if let Ok(id) = id.trim().parse() {
                config.bot.self_id = id;
            }
        }

        if let Ok(names) = env::var("BOT_NICKNAMES") {
            config.bot.nicknames = split_list(&names).map(str::to_string).collect();
        }

        if let Ok(ids) = env::var("HUMANLIKE_WHITELIST") {
            config.behavior.whitelist = split_list(&ids)
                .filter_map(|id| id.parse().ok().map(ChannelId))
                .collect();
            config.behavior.whitelist_enabled = !config.behavior.whitelist.is_empty();
        }

        if let Some(enabled) = env_flag("HUMANLIKE_PROACTIVE") {
            config.proactive.enabled = enabled;
        }

        config
    }

    /// Repair values that would break pacing or storage.
    pub fn normalized(mut self) -> Self {
        let behavior = &mut self.behavior;
        if behavior.min_typing_speed == 0 {
            behavior.min_typing_speed = DEFAULT_MIN_TYPING_SPEED;
        }
        if behavior.max_typing_speed == 0 {
            behavior.max_typing_speed = DEFAULT_MAX_TYPING_SPEED;
        }
        if behavior.min_typing_speed > behavior.max_typing_speed {
            std::mem::swap(&mut behavior.min_typing_speed, &mut behavior.max_typing_speed);
        }
        behavior.history_capacity = behavior.history_capacity.max(1);
        // the window must reach back past the incoming message
        behavior.decision_window = behavior.decision_window.max(2);
        self.proactive.tick_secs = self.proactive.tick_secs.max(1);
        self.proactive
            .buckets
            .sort_by_key(|bucket| bucket.below_secs);
        self
    }

    /// Whether the engine should act in `channel_id`. An enabled but empty
    /// whitelist admits every channel.
    pub fn allows_channel(&self, channel_id: ChannelId) -> bool {
        let behavior = &self.behavior;
        if !behavior.whitelist_enabled || behavior.whitelist.is_empty() {
            return true;
        }
        behavior.whitelist.contains(&channel_id)
    }
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name).ok().map(|value| {
        value.eq_ignore_ascii_case("1")
            || value.eq_ignore_ascii_case("true")
            || value.eq_ignore_ascii_case("yes")
    })
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}
