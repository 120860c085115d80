//! Tally - Embeddable Fixed-Window Rate Limiting
//!
//! This crate decides whether a call identified by a caller-supplied key is
//! allowed under a fixed quota per fixed time window. Window state is counted
//! either in process memory or in Redis, so several processes can share one
//! quota.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod server;
