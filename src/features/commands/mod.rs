//! # Feature: Commands
//!
//! Closed set of built-in commands (`help`, `ping`, `stats`, `model`, ...)
//! dispatched before the AI path when a triggered message is a bare keyword.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.3.0
//! - **Toggleable**: false

pub mod registry;

pub use registry::{parse, Command, CommandRegistry};
