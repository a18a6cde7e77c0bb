//! # Feature: Conversation Context
//!
//! Short rolling history of exchanges per chat identity, used to give the
//! backend conversational continuity. Bounded, in-memory only.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false

pub mod store;

pub use store::{ContextEntry, ContextStore, Role};
