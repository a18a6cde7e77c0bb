// Core layer - shared types, configuration and error taxonomy
pub mod core;

// Classification - raw server lines into typed chat events
pub mod classifier;

// Transport layer - reconnecting chat server session
pub mod connection;

// Features layer - rate limiting, context, backend, commands
pub mod features;

// Application layer - the orchestrating engine
pub mod engine;

// Re-export core config for convenience
pub use crate::core::Config;

pub use classifier::{
    extract_prompt, is_triggered, ChatEvent, LineGrammar, MessageClassifier, RawLine,
};
pub use connection::{ChatConnection, ChatHandle, ConnState};
pub use engine::{BotEngine, EngineMetrics, MetricsSnapshot};
pub use features::{
    // Backend
    build_prompt, GenerateRequest, OllamaBackend, ResponseBackend,
    // Commands
    Command, CommandRegistry,
    // Context
    ContextEntry, ContextStore, Role,
    // Rate limiting
    RateLimiter, RateStats,
};
