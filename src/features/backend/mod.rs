//! # Feature: Response Backend
//!
//! Request/response client to the generative service (Ollama HTTP API).
//! Stateless, time-bounded, no internal retry.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false

pub mod ollama;

pub use ollama::{build_prompt, GenerateRequest, OllamaBackend, ResponseBackend};
