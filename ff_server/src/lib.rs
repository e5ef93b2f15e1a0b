//! HTTP server for the FeedFinder auth core.
//!
//! The binary in `main.rs` wires a [`config::ServerConfig`] into the core
//! library's managers and serves [`api::create_router`]; the modules are
//! exposed here so integration tests can drive the same router in-process.

pub mod api;
pub mod cleanup;
pub mod config;
pub mod logging;
pub mod metrics;
