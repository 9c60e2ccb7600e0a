//! # Notion Provider
//!
//! Implements the `PageDatabase` trait for the Notion REST API.
//!
//! ## Overview
//!
//! This module provides:
//! - Database schema reads and property declarations
//! - Text-equality queries with cursor pagination
//! - Page create, update (properties plus full body replacement) and archive
//! - Page reads back into typed values and blocks, failing on block types
//!   the sync cannot represent
//! - Rich-text annotations mapped to and from inline markers

pub mod connector;
pub mod error;
pub mod rich_text;
pub mod types;

pub use connector::{NotionConnector, MAX_BLOCKS_PER_REQUEST, NOTION_VERSION};
pub use error::{NotionError, Result};
