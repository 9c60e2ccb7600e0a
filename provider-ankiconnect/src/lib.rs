//! # AnkiConnect Provider
//!
//! Implements the `NoteSource` trait for a running Anki with the AnkiConnect
//! add-on.
//!
//! ## Overview
//!
//! This module provides:
//! - Note search (`findNotes`) with Anki's own query syntax
//! - Note reads with fields in template order and the first card's review
//!   state (`notesInfo`, `cardsInfo`)
//! - The scheduler's day counter, read once per source
//! - Single-attempt note deletion (`deleteNotes`)
//! - Note import for pulls from Notion: `addNote`, `updateNoteFields`,
//!   `updateNoteTags` and `changeDeck`, followed by the card schedule
//!   (`setDueDate`, `setEaseFactors`, `setSpecificValueOfCard`, `suspend`)

pub mod error;
pub mod source;
pub mod types;

pub use error::{AnkiConnectError, Result};
pub use source::AnkiConnectSource;
