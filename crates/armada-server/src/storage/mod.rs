//! `SQLite` storage for the Armada control plane.
//!
//! Provides persistence for hosts, teams, labels, secrets, commands,
//! configuration profiles and their per-host delivery state, scripts and
//! their executions, and the activity log.

mod datastore_impl;
mod db;
mod models;
mod queries_activity;
mod queries_commands;
mod queries_hosts;
mod queries_profiles;
mod queries_scripts;


pub use db::{DatabaseError, ServerDatabase};
pub use models::*;
pub use queries_activity::NewActivity;
pub use queries_hosts::NewHost;
pub use queries_profiles::profile_checksum;
