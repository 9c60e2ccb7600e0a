//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the note sync core:
//! - Logging and tracing infrastructure
//! - Configuration loading and validation
//! - Event bus for sync progress
//!
//! ## Overview
//!
//! Every other crate depends on this one for its logging conventions, the
//! validated [`CoreConfig`](config::CoreConfig) and the per-run
//! [`RunOptions`](config::RunOptions) handed to the sync coordinator.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
