//! Quotaguard - Rate Limiting for REST APIs
//!
//! This crate counts requests against per-endpoint and service-wide limits,
//! each scoped per API key, per remote address or globally, and tells the
//! caller whether a request may proceed or how long it must wait.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod replay;
