// Features layer - all feature modules
pub mod backend;
pub mod commands;
pub mod context;
pub mod rate_limiting;

pub use backend::{build_prompt, GenerateRequest, OllamaBackend, ResponseBackend};
pub use commands::{Command, CommandRegistry};
pub use context::{ContextEntry, ContextStore, Role};
pub use rate_limiting::{RateLimiter, RateStats};
