//! # Event Bus System
//!
//! Broadcasts sync lifecycle and schema events using `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **Event Types**: [`CoreEvent`] wrapping [`SyncEvent`] and [`SchemaEvent`]
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//!
//! Events are informational. A sync run's `SyncReport` is the authoritative
//! completion signal; emission never fails a run (`emit(..).ok()`).
//!
//! ```text
//! ┌────────────────┐  emit   ┌──────────┐  subscribe  ┌──────────────┐
//! │ SyncCoordinator├────────>│ EventBus ├────────────>│ Progress UI  │
//! └────────────────┘         └──────────┘             └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_runtime::events::{CoreEvent, EventBus, EventStream, SyncEvent};
//!
//! let bus = EventBus::default();
//! let mut progress = EventStream::new(bus.subscribe())
//!     .filter(|event| matches!(event, CoreEvent::Sync(SyncEvent::Progress { .. })));
//!
//! tokio::spawn(async move {
//!     while let Ok(event) = progress.recv().await {
//!         println!("{}", event.description());
//!     }
//! });
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   Non-fatal; the subscriber keeps receiving new events.
//! - **`RecvError::Closed`**: All senders have been dropped. Treat as shutdown.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published through the event bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Sync run lifecycle
    Sync(SyncEvent),
    /// Target database schema reconciliation
    Schema(SchemaEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Schema(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Schema(SchemaEvent::UpdateFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::Completed { failed, .. }) if *failed > 0 => {
                EventSeverity::Warning
            }
            CoreEvent::Sync(SyncEvent::Completed { .. })
            | CoreEvent::Sync(SyncEvent::Cancelled { .. })
            | CoreEvent::Schema(SchemaEvent::Updated { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Sync Events
// ============================================================================

/// Events emitted over the course of one sync run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// Run accepted and started.
    Started {
        run_id: String,
        /// Source query selecting the candidates
        query: String,
        /// `keep`, `overwrite` or `copy`
        duplicate_policy: String,
    },
    /// The run entered a new phase.
    PhaseChanged { run_id: String, phase: String },
    /// A record finished the write phase.
    Progress {
        run_id: String,
        processed: u64,
        total: u64,
        /// 0-100
        percent: u8,
    },
    /// The run reached its report.
    Completed {
        run_id: String,
        succeeded: u64,
        failed: u64,
        deleted: u64,
        duration_secs: u64,
    },
    /// The run aborted before writing any record.
    Failed { run_id: String, message: String },
    /// The run was cancelled between records.
    Cancelled {
        run_id: String,
        processed: u64,
        unprocessed: u64,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Sync started",
            SyncEvent::PhaseChanged { .. } => "Sync phase changed",
            SyncEvent::Progress { .. } => "Sync in progress",
            SyncEvent::Completed { .. } => "Sync completed",
            SyncEvent::Failed { .. } => "Sync failed",
            SyncEvent::Cancelled { .. } => "Sync cancelled",
        }
    }

    /// Run this event belongs to.
    pub fn run_id(&self) -> &str {
        match self {
            SyncEvent::Started { run_id, .. }
            | SyncEvent::PhaseChanged { run_id, .. }
            | SyncEvent::Progress { run_id, .. }
            | SyncEvent::Completed { run_id, .. }
            | SyncEvent::Failed { run_id, .. }
            | SyncEvent::Cancelled { run_id, .. } => run_id,
        }
    }
}

// ============================================================================
// Schema Events
// ============================================================================

/// Events emitted while reconciling the target database schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SchemaEvent {
    /// Properties were added or retyped.
    Updated {
        database_id: String,
        /// `name: type` pairs that were applied
        properties: Vec<String>,
    },
    /// The schema update was rejected; the run continues with the old schema.
    UpdateFailed {
        database_id: String,
        properties: Vec<String>,
        message: String,
    },
}

impl SchemaEvent {
    fn description(&self) -> &str {
        match self {
            SchemaEvent::Updated { .. } => "Database schema updated",
            SchemaEvent::UpdateFailed { .. } => "Database schema update failed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus. Cheap to clone; clones share the channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// A subscriber that falls behind by more than `capacity` events receives
    /// `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new event bus with the default buffer size.
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional filter.
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Only events belonging to one sync run.
    pub fn for_run(self, run_id: impl Into<String>) -> Self {
        let run_id = run_id.into();
        self.filter(move |event| match event {
            CoreEvent::Sync(sync) => sync.run_id() == run_id,
            CoreEvent::Schema(_) => false,
        })
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no matching event is currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(run_id: &str, processed: u64) -> CoreEvent {
        CoreEvent::Sync(SyncEvent::Progress {
            run_id: run_id.to_string(),
            processed,
            total: 10,
            percent: (processed * 10) as u8,
        })
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_fails() {
        let bus = EventBus::new(10);
        assert!(bus.emit(progress("run-1", 1)).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        assert_eq!(bus.emit(progress("run-1", 1)).unwrap(), 2);

        assert_eq!(first.recv().await.unwrap(), progress("run-1", 1));
        assert_eq!(second.recv().await.unwrap(), progress("run-1", 1));
    }

    #[tokio::test]
    async fn test_stream_for_run_skips_other_runs() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe()).for_run("run-2");

        bus.emit(progress("run-1", 1)).ok();
        bus.emit(CoreEvent::Schema(SchemaEvent::Updated {
            database_id: "db".to_string(),
            properties: vec!["Deck: rich_text".to_string()],
        }))
        .ok();
        bus.emit(progress("run-2", 3)).ok();

        assert_eq!(stream.recv().await.unwrap(), progress("run-2", 3));
    }

    #[tokio::test]
    async fn test_try_recv_empty_and_lagged() {
        let bus = EventBus::new(2);
        let mut stream = EventStream::new(bus.subscribe());
        assert!(stream.try_recv().is_none());

        for i in 0..5 {
            bus.emit(progress("run-1", i)).ok();
        }

        assert!(matches!(stream.try_recv(), Some(Err(RecvError::Lagged(_)))));
        assert!(matches!(stream.try_recv(), Some(Ok(_))));
    }

    #[test]
    fn test_event_severity() {
        let failed = CoreEvent::Sync(SyncEvent::Failed {
            run_id: "r".to_string(),
            message: "schema unavailable".to_string(),
        });
        let partial = CoreEvent::Sync(SyncEvent::Completed {
            run_id: "r".to_string(),
            succeeded: 3,
            failed: 1,
            deleted: 0,
            duration_secs: 2,
        });
        let schema_failed = CoreEvent::Schema(SchemaEvent::UpdateFailed {
            database_id: "db".to_string(),
            properties: vec![],
            message: "validation_error".to_string(),
        });

        assert_eq!(failed.severity(), EventSeverity::Error);
        assert_eq!(partial.severity(), EventSeverity::Warning);
        assert_eq!(schema_failed.severity(), EventSeverity::Warning);
        assert_eq!(progress("r", 1).severity(), EventSeverity::Debug);
    }

    #[test]
    fn test_event_serialization_shape() {
        let event = CoreEvent::Sync(SyncEvent::PhaseChanged {
            run_id: "r".to_string(),
            phase: "reconcile_schema".to_string(),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Sync");
        assert_eq!(json["payload"]["event"], "PhaseChanged");
        assert_eq!(json["payload"]["phase"], "reconcile_schema");

        let back: CoreEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
