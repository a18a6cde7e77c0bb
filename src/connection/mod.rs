//! # Chat Connection
//!
//! Reconnecting TCP session to the chat server: handshake, line framing,
//! single-writer send path and the connection state machine.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false

pub mod client;

pub use client::{ChatConnection, ChatHandle, ConnState};
