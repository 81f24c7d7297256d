//! Armada Core Library
//!
//! Shared functionality for Armada components:
//! - Configuration resolution and hierarchy
//! - `SQLite` pool helpers and timestamps
//! - Retry and polling primitives
//! - Common error types

pub mod config;
pub mod db;
pub mod error;
pub mod retry;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
