//! # Feature: Rate Limiting
//!
//! Prevents spam with configurable request limits per chat identity. Uses a
//! sliding window over a DashMap for thread-safe concurrent access.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false

pub mod limiter;

pub use limiter::{RateLimiter, RateStats};
