//! Gatekeeper - per-client rate-limited greeting service
//!
//! This crate implements a small HTTP service that greets clients and
//! throttles each client address with its own token bucket. A registry maps
//! client identities to limiters and an axum middleware admits or rejects
//! every request before it reaches the greeting handler.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
