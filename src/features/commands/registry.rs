//! Built-in operator/user commands answered without the backend's help
//! (except model listing, which queries the service).

use std::sync::Arc;

use log::info;
use tokio::sync::RwLock;

use crate::core::config::Config;
use crate::core::response::truncate_reply;
use crate::features::backend::ResponseBackend;
use crate::features::context::{ContextStore, Role};
use crate::features::rate_limiting::RateLimiter;

/// Longest command reply we will put on the wire.
const COMMAND_REPLY_LIMIT: usize = 500;

/// Closed set of recognized commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Ping,
    Stats,
    Context,
    Clear,
    Reset,
    Models,
    /// `model` shows the active model; `model <name>` switches it.
    Model(Option<String>),
    Info,
}

/// Parse a prompt as a command. Bare keywords only: `help me with rust`
/// stays an AI prompt, `help` alone is the command.
pub fn parse(prompt: &str) -> Option<Command> {
    let trimmed = prompt.trim();
    let mut parts = trimmed.split_whitespace();
    let keyword = parts.next()?.to_lowercase();
    let rest = parts.collect::<Vec<_>>().join(" ");

    match (keyword.as_str(), rest.is_empty()) {
        ("help", true) => Some(Command::Help),
        ("ping", true) => Some(Command::Ping),
        ("stats", true) => Some(Command::Stats),
        ("context", true) => Some(Command::Context),
        ("clear", true) => Some(Command::Clear),
        ("reset", true) => Some(Command::Reset),
        ("models", true) => Some(Command::Models),
        ("model", true) => Some(Command::Model(None)),
        ("model", false) => Some(Command::Model(Some(rest))),
        ("info", true) => Some(Command::Info),
        _ => None,
    }
}

/// Answers commands against the live pipeline components.
pub struct CommandRegistry {
    config: Arc<Config>,
    limiter: Arc<RateLimiter>,
    context: Arc<ContextStore>,
    backend: Arc<dyn ResponseBackend>,
    current_model: Arc<RwLock<String>>,
}

impl CommandRegistry {
    pub fn new(
        config: Arc<Config>,
        limiter: Arc<RateLimiter>,
        context: Arc<ContextStore>,
        backend: Arc<dyn ResponseBackend>,
        current_model: Arc<RwLock<String>>,
    ) -> Self {
        CommandRegistry {
            config,
            limiter,
            context,
            backend,
            current_model,
        }
    }

    /// Execute one command for `identity` and return the reply text.
    pub async fn dispatch(&self, identity: &str, command: Command) -> String {
        info!("command from {identity}: {command:?}");
        match command {
            Command::Help => self.help(),
            Command::Ping => format!("Pong! Hello {identity}, I'm here."),
            Command::Stats => self.stats(identity).await,
            Command::Context => self.show_context(identity),
            Command::Clear => {
                self.context.clear(identity);
                "your conversation context has been cleared".to_string()
            }
            Command::Reset => {
                self.limiter.reset(identity);
                "your rate limit has been reset".to_string()
            }
            Command::Models => self.list_models().await,
            Command::Model(name) => self.switch_model(identity, name).await,
            Command::Info => self.info().await,
        }
    }

    fn help(&self) -> String {
        let trigger = &self.config.bot.trigger;
        format!(
            "commands: {trigger} help | ping | stats | context | clear | reset | \
             models | model <name> | info -- or just mention {trigger} with a question"
        )
    }

    async fn stats(&self, identity: &str) -> String {
        let rate = self.limiter.stats(identity);
        format!(
            "model {} | your requests {}/{} per {}s | {} identities with context",
            self.current_model.read().await,
            rate.used,
            rate.limit,
            rate.window.as_secs(),
            self.context.tracked_identities()
        )
    }

    fn show_context(&self, identity: &str) -> String {
        let history = self.context.get(identity);
        if history.is_empty() {
            return "no conversation context yet".to_string();
        }
        let rendered = history
            .iter()
            .map(|entry| match entry.role {
                Role::User => format!("{}: {}", entry.identity, entry.text),
                Role::Bot => format!("Assistant: {}", entry.text),
            })
            .collect::<Vec<_>>()
            .join(" | ");
        truncate_reply(&rendered, COMMAND_REPLY_LIMIT)
    }

    async fn list_models(&self) -> String {
        match self.backend.list_models().await {
            Ok(models) if models.is_empty() => "the backend offers no models".to_string(),
            Ok(models) => {
                let current = self.current_model.read().await.clone();
                let listed = models
                    .iter()
                    .map(|m| {
                        if *m == current {
                            format!("{m} (current)")
                        } else {
                            m.clone()
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                truncate_reply(&format!("available models: {listed}"), COMMAND_REPLY_LIMIT)
            }
            Err(e) => format!("could not list models: {e}"),
        }
    }

    async fn switch_model(&self, identity: &str, name: Option<String>) -> String {
        let Some(name) = name else {
            return format!("current model: {}", self.current_model.read().await);
        };
        match self.backend.list_models().await {
            Ok(models) if models.iter().any(|m| *m == name) => {
                *self.current_model.write().await = name.clone();
                info!("model switched to {name} by {identity}");
                format!("model changed to {name}")
            }
            Ok(_) => format!("model '{name}' not found, try `models`"),
            Err(e) => format!("could not verify model: {e}"),
        }
    }

    async fn info(&self) -> String {
        let bot = &self.config.bot;
        format!(
            "{} v{} | trigger {} | model {} | replies capped at {} chars | \
             context of {} exchanges | {} requests per {}s",
            bot.username,
            env!("CARGO_PKG_VERSION"),
            bot.trigger,
            self.current_model.read().await,
            bot.max_response_length,
            bot.context_length,
            self.config.limits.max_requests,
            self.config.limits.window_seconds
        )
    }
}
