//! Source Store Abstraction
//!
//! The local note collection a sync run reads from: a query language that
//! returns note identifiers, per-note reads, bulk deletion and a flush. A
//! pull run also writes notes back through `create_record` and
//! `update_record`.
//!
//! Values are carried exactly as the store reports them (raw scheduler
//! counters, ease in permille, card data blob). Interpretation belongs to the
//! record normalizer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Source-side note identifier.
///
/// Anki note ids are creation timestamps in milliseconds, so the id also
/// encodes when the note was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(i64);

impl NoteId {
    pub fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// Creation time decoded from the id.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.0)
    }
}

impl From<i64> for NoteId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for NoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One named field of a note, in template order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceField {
    pub name: String,
    pub value: String,
}

impl SourceField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Review state of the note's first card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCard {
    pub deck_name: String,
    /// 0 new, 1 learning, 2 review, 3 relearning
    pub card_type: i64,
    /// Negative when suspended or buried; 1 intraday learning, 2 review, 3 interday learning
    pub queue: i64,
    /// Meaning depends on `queue`: epoch seconds for intraday learning, a day
    /// number for review and interday learning, an ordinal for new cards
    pub due: i64,
    /// Interval in days
    pub interval: i64,
    /// Ease factor in permille (2500 = 250%)
    pub ease_factor: i64,
    pub repetitions: i64,
    pub lapses: i64,
    /// Opaque scheduler data (JSON), e.g. FSRS memory state
    pub custom_data: Option<String>,
}

/// A note as read from the source store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceNote {
    pub id: NoteId,
    /// Note type (model) name
    pub model_name: String,
    /// Fields in template order; the first one is the primary field
    pub fields: Vec<SourceField>,
    pub tags: Vec<String>,
    /// Last modification, Unix seconds
    pub modified_at: i64,
    pub card: Option<SourceCard>,
    /// The scheduler's current day number, needed to turn review due days into dates
    pub scheduler_today: Option<i64>,
}

impl SourceNote {
    pub fn primary_field(&self) -> Option<&SourceField> {
        self.fields.first()
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }
}

/// Review state to restore on a note's cards. `None` leaves a value alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceSchedule {
    pub suspended: Option<bool>,
    /// Days from today until a review card is due
    pub due_in_days: Option<i64>,
    /// Permille, like [`SourceCard::ease_factor`]
    pub ease_factor: Option<i64>,
    pub interval: Option<i64>,
    pub repetitions: Option<i64>,
    pub lapses: Option<i64>,
    /// Scheduler data blob, e.g. `{"d":5.1,"s":12.0}`
    pub custom_data: Option<String>,
}

impl SourceSchedule {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Source-shaped projection of a canonical record, ready to be written back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceUpdate {
    /// The note the record was synced from
    pub id: NoteId,
    pub model_name: String,
    pub fields: Vec<SourceField>,
    pub tags: Vec<String>,
    pub deck_name: Option<String>,
    #[serde(default)]
    pub schedule: SourceSchedule,
}

/// Source store trait
///
/// # Example
///
/// ```ignore
/// use bridge_traits::source::NoteSource;
///
/// async fn count_due(source: &dyn NoteSource) -> Result<usize> {
///     Ok(source.find_identifiers("deck:Default is:due").await?.len())
/// }
/// ```
#[async_trait]
pub trait NoteSource: Send + Sync {
    /// Run a store query and return matching note ids in store order.
    async fn find_identifiers(&self, query: &str) -> Result<Vec<NoteId>>;

    /// Read one note with its first card's review state.
    async fn get_record(&self, id: NoteId) -> Result<SourceNote>;

    /// Delete notes (and their cards).
    async fn delete_records(&self, ids: &[NoteId]) -> Result<()>;

    /// Flush pending changes to durable storage.
    async fn persist(&self) -> Result<()>;

    /// Add a new note from `update` (its `id` is ignored) and return the
    /// store's id for it. Duplicates are the caller's decision.
    async fn create_record(&self, update: &SourceUpdate) -> Result<NoteId>;

    /// Overwrite an existing note's fields, tags, deck and schedule.
    async fn update_record(&self, id: NoteId, update: &SourceUpdate) -> Result<()>;
}
