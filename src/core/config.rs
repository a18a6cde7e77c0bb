//! # Configuration
//!
//! Typed settings loaded from a YAML file, with a built-in default for
//! every key so a partial file (or none at all) still yields a runnable
//! configuration. Validation happens once at startup; a bad value is fatal
//! there rather than somewhere mid-session.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 1.2.0: Optional line grammar overrides
//! - 1.1.0: Limits section (rate window, in-flight cap, shutdown grace)
//! - 1.0.0: Initial chat/bot/ollama sections

use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;

use crate::core::error::ConfigError;

/// Environment variable naming an alternative config file.
pub const CONFIG_PATH_ENV: &str = "PALAVER_CONFIG";

/// Config file looked up in the working directory by default.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chat: ChatConfig,
    pub bot: BotConfig,
    pub ollama: OllamaConfig,
    pub limits: LimitsConfig,
    /// Optional line marker overrides for servers speaking a different
    /// dialect. Absent means the built-in NakenChat grammar.
    pub grammar: Option<GrammarConfig>,
}

/// Chat server endpoint and transport tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub host: String,
    pub port: u16,
    pub reconnect_delay_secs: u64,
    pub max_reconnect_attempts: u32,
    pub write_timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        ChatConfig {
            host: "127.0.0.1".to_string(),
            port: 6666,
            reconnect_delay_secs: 5,
            max_reconnect_attempts: 5,
            write_timeout_secs: 10,
        }
    }
}

impl ChatConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

/// The bot's chat persona and reply shaping.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Name registered with the server; also used to spot our own echoes.
    pub username: String,
    /// Word that makes the bot consider a public message addressed to it.
    pub trigger: String,
    /// Pause before a reply goes out, so the bot does not answer instantly.
    pub response_delay_ms: u64,
    /// Longest reply put on the wire, in bytes.
    pub max_response_length: usize,
    /// Conversation entries remembered per identity.
    pub context_length: usize,
    /// Tell a throttled user about it, or stay silent.
    pub throttle_notice: bool,
}

impl Default for BotConfig {
    fn default() -> Self {
        BotConfig {
            username: "Mia".to_string(),
            trigger: "Mia".to_string(),
            response_delay_ms: 1500,
            max_response_length: 400,
            context_length: 10,
            throttle_notice: true,
        }
    }
}

impl BotConfig {
    pub fn response_delay(&self) -> Duration {
        Duration::from_millis(self.response_delay_ms)
    }
}

/// Generative backend endpoint and sampling bounds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub host: String,
    pub port: u16,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
    /// System prompt; `{bot_name}` is substituted with the bot's username.
    pub system_prompt: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        OllamaConfig {
            host: "127.0.0.1".to_string(),
            port: 11434,
            model: "llama3".to_string(),
            max_tokens: 256,
            temperature: 0.7,
            timeout_secs: 60,
            system_prompt: "You are {bot_name}, a friendly assistant in a busy \
                            chat room. Keep replies short and conversational."
                .to_string(),
        }
    }
}

impl OllamaConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Service base URL. A host already carrying a scheme is kept as-is.
    pub fn base_url(&self) -> String {
        if self.host.starts_with("http://") || self.host.starts_with("https://") {
            format!("{}:{}", self.host, self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

/// Rate limiting and concurrency bounds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Allowed requests per identity within one window.
    pub max_requests: usize,
    pub window_seconds: u64,
    /// Backend calls allowed in flight at once.
    pub max_inflight: usize,
    /// How long shutdown waits for in-flight replies.
    pub shutdown_grace_secs: u64,
    /// An identity silent this long has its context swept.
    pub idle_ttl_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            max_requests: 3,
            window_seconds: 60,
            max_inflight: 4,
            shutdown_grace_secs: 10,
            idle_ttl_secs: 3600,
        }
    }
}

impl LimitsConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }
}

/// Line marker overrides. An empty section keeps the built-in patterns,
/// so a deployment can replace just one class of marker.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GrammarConfig {
    pub system: Vec<String>,
    pub private: Vec<String>,
    pub public: Vec<String>,
}

impl Config {
    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> anyhow::Result<Config> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bot.username.trim().is_empty() {
            return Err(ConfigError("bot.username must not be empty".to_string()));
        }
        if self.bot.trigger.trim().is_empty() {
            return Err(ConfigError("bot.trigger must not be empty".to_string()));
        }
        if self.bot.context_length == 0 {
            return Err(ConfigError("bot.context_length must be at least 1".to_string()));
        }
        if self.bot.max_response_length == 0 {
            return Err(ConfigError(
                "bot.max_response_length must be at least 1".to_string(),
            ));
        }
        if self.ollama.model.trim().is_empty() {
            return Err(ConfigError("ollama.model must not be empty".to_string()));
        }
        if self.chat.max_reconnect_attempts == 0 {
            return Err(ConfigError(
                "chat.max_reconnect_attempts must be at least 1".to_string(),
            ));
        }
        if self.limits.max_requests == 0 {
            return Err(ConfigError("limits.max_requests must be at least 1".to_string()));
        }
        if self.limits.window_seconds == 0 {
            return Err(ConfigError(
                "limits.window_seconds must be at least 1".to_string(),
            ));
        }
        if self.limits.max_inflight == 0 {
            return Err(ConfigError("limits.max_inflight must be at least 1".to_string()));
        }
        if self.limits.idle_ttl_secs == 0 {
            return Err(ConfigError("limits.idle_ttl_secs must be at least 1".to_string()));
        }
        Ok(())
    }
}
