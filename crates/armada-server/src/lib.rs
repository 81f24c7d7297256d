//! Armada Control Plane Library
//!
//! Core functionality for the Armada device management control plane:
//! - `SQLite` storage for hosts, profiles, commands, scripts and activities
//! - Team-scoped authorization across multi-host targets
//! - Apple and Windows management command dispatch
//! - Declarative configuration profile reconciliation and delivery tracking
//! - Script execution with optional synchronous wait
//! - Audit activities with webhook delivery

pub mod activity;
pub mod authz;
pub mod commands;
pub mod datastore;
pub mod delivery;
pub mod error;
pub mod license;
pub mod profiles;
pub mod scripts;
pub mod service;
pub mod storage;

pub use error::{ServiceError, ServiceResult};
pub use service::Service;
