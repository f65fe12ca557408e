//! Tracker Configuration Module
//!
//! Deployment-time configuration loaded from TOML. Operator-tunable values
//! that the cloud can change at runtime live in the settings store instead.
//!
//! ## Loading Order
//!
//! 1. `TRACKER_CONFIG` environment variable (path to TOML file)
//! 2. `tracker.toml` in the current working directory
//! 3. Built-in defaults (see [`defaults`])

mod tracker_config;
pub mod defaults;
pub mod validation;

pub use tracker_config::*;
