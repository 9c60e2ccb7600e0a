//! # Host Bridge Traits
//!
//! Contracts between the sync core and the systems it talks to.
//!
//! ## Overview
//!
//! The core never talks to Anki or Notion directly. Each collaborator is a
//! trait implemented in its own crate and injected as `Arc<dyn Trait>`, which
//! keeps the core testable with in-memory fakes.
//!
//! ## Traits
//!
//! ### Stores
//! - [`NoteSource`](source::NoteSource) - Local note collection (query, read, write back, delete, flush)
//! - [`PageDatabase`](target::PageDatabase) - Remote page database (schema, query, page CRUD)
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Async HTTP with per-request retry policy
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! | Collaborator | Implementation Crate |
//! |--------------|----------------------|
//! | `HttpClient`   | `bridge-desktop`       |
//! | `NoteSource`   | `provider-ankiconnect` |
//! | `PageDatabase` | `provider-notion`      |
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! convert their own error types into it and keep the distinction between a
//! transport failure and a rejection by the remote side.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync`; a sync run may fan record writes
//! out over several tasks.

pub mod error;
pub mod http;
pub mod source;
pub mod target;
pub mod time;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use source::{
    NoteId, NoteSource, SourceCard, SourceField, SourceNote, SourceSchedule, SourceUpdate,
};
pub use target::{
    Block, PageDatabase, PageMatch, PropertyPayload, PropertyType, PropertyTypeMap,
    PropertyValue, QueryFilter, SchemaUpdateRequest, TargetPage, TargetValue,
};
pub use time::{Clock, FixedClock, LogEntry, LogLevel, LoggerSink, SystemClock};
