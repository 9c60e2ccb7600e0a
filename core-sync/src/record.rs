//! # Canonical Records
//!
//! The pivot representation every stage of a run works on, plus the
//! per-record outcome and the end-of-run report.
//!
//! ## Overview
//!
//! A [`CanonicalRecord`] is built fresh for every run from a source note and
//! never persisted. Field values stay as strings; the property type of every
//! name is decided later from the name alone (see [`crate::schema`]).
//!
//! Metadata values are stored in their canonical string form:
//! - dates as RFC 3339 in UTC
//! - tags joined with `", "`
//! - numbers in their decimal form
//! - flags as `true` / `false`
//!
//! A metadata entry may be present with no value (an unscheduled due date).

use bridge_traits::source::NoteId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Property names
// ============================================================================

/// Reserved property names written next to the note's own fields.
pub mod names {
    pub const ANKI_ID: &str = "Anki ID";
    pub const DECK: &str = "Deck";
    pub const TAGS: &str = "Tags";
    pub const NOTE_TYPE: &str = "Note Type";
    pub const FIRST_FIELD: &str = "First Field";
    pub const CARD_TYPE: &str = "Card Type";
    pub const CREATION_TIME: &str = "Creation Time";
    pub const MODIFICATION_TIME: &str = "Modification Time";
    pub const DUE_DATE: &str = "Due Date";
    pub const REVIEW_COUNT: &str = "Review Count";
    pub const EASE_FACTOR: &str = "Ease Factor";
    pub const INTERVAL: &str = "Interval";
    pub const LAPSES: &str = "Lapses";
    pub const SUSPENDED: &str = "Suspended";
    pub const DIFFICULTY: &str = "Difficulty";
    pub const STABILITY: &str = "Stability";
    pub const RETRIEVABILITY: &str = "Retrievability";

    /// Every bookkeeping property the target database must declare.
    pub const MANDATORY: [&str; 17] = [
        ANKI_ID,
        DECK,
        TAGS,
        NOTE_TYPE,
        FIRST_FIELD,
        CARD_TYPE,
        CREATION_TIME,
        MODIFICATION_TIME,
        DUE_DATE,
        REVIEW_COUNT,
        EASE_FACTOR,
        INTERVAL,
        LAPSES,
        SUSPENDED,
        DIFFICULTY,
        STABILITY,
        RETRIEVABILITY,
    ];

    /// Scheduler parameters that only exist when the source supplies them.
    pub const OPTIONAL: [&str; 3] = [DIFFICULTY, STABILITY, RETRIEVABILITY];

    pub fn is_reserved(name: &str) -> bool {
        MANDATORY.contains(&name)
    }

    pub fn is_optional(name: &str) -> bool {
        OPTIONAL.contains(&name)
    }
}

// ============================================================================
// Metadata
// ============================================================================

/// Derived attributes of a record, keyed by property name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata(BTreeMap<String, Option<String>>);

impl RecordMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), Some(value.into()));
    }

    /// Record a name that is known but has no value.
    pub fn insert_null(&mut self, name: impl Into<String>) {
        self.0.insert(name.into(), None);
    }

    /// Value of `name`; `None` when absent or null.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(|v| v.as_deref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ============================================================================
// Canonical record
// ============================================================================

/// Source-agnostic representation of one synchronized note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    identifier: NoteId,
    pub type_name: String,
    pub primary_field_name: String,
    pub primary_field_value: String,
    /// Note fields in template order, without the body field or reserved names
    pub fields: Vec<(String, String)>,
    pub metadata: RecordMetadata,
    /// Body markup, `None` when empty
    pub body: Option<String>,
}

impl CanonicalRecord {
    pub fn new(
        identifier: NoteId,
        type_name: impl Into<String>,
        primary_field_name: impl Into<String>,
        primary_field_value: impl Into<String>,
    ) -> Self {
        Self {
            identifier,
            type_name: type_name.into(),
            primary_field_name: primary_field_name.into(),
            primary_field_value: primary_field_value.into(),
            fields: Vec::new(),
            metadata: RecordMetadata::new(),
            body: None,
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_field(name, value);
        self
    }

    pub fn with_metadata(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        let body = body.into();
        self.body = if body.trim().is_empty() {
            None
        } else {
            Some(body)
        };
        self
    }

    /// Source-side identifier; fixed for the record's lifetime.
    pub fn identifier(&self) -> NoteId {
        self.identifier
    }

    /// Insert or replace a field, keeping its position when it already exists.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Whether the primary value can be used as a duplicate key.
    pub fn has_lookup_key(&self) -> bool {
        !self.primary_field_value.trim().is_empty()
    }

    /// Every property name this record writes: fields, then metadata.
    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .map(|(n, _)| n.as_str())
            .chain(self.metadata.names())
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// What happened to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Create,
    Update,
    Skip,
    Error,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Create => "create",
            SyncAction::Update => "update",
            SyncAction::Skip => "skip",
            SyncAction::Error => "error",
        }
    }

    /// Whether the run wrote the record to the store it syncs into.
    pub fn wrote_target(&self) -> bool {
        matches!(self, SyncAction::Create | SyncAction::Update)
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A value that could not be coerced to its property type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoercionWarning {
    pub property: String,
    pub value: String,
    /// Value written instead
    pub substituted: String,
}

impl CoercionWarning {
    pub fn new(
        property: impl Into<String>,
        value: impl Into<String>,
        substituted: impl Into<String>,
    ) -> Self {
        Self {
            property: property.into(),
            value: value.into(),
            substituted: substituted.into(),
        }
    }
}

impl fmt::Display for CoercionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: could not coerce {:?}, wrote {}",
            self.property, self.value, self.substituted
        )
    }
}

/// Result of processing one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub identifier: NoteId,
    pub action: SyncAction,
    pub target_id: Option<String>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<CoercionWarning>,
}

impl SyncOutcome {
    pub fn created(identifier: NoteId, target_id: impl Into<String>) -> Self {
        Self::success(identifier, SyncAction::Create, Some(target_id.into()))
    }

    pub fn updated(identifier: NoteId, target_id: impl Into<String>) -> Self {
        Self::success(identifier, SyncAction::Update, Some(target_id.into()))
    }

    pub fn skipped(identifier: NoteId, target_id: Option<String>) -> Self {
        Self::success(identifier, SyncAction::Skip, target_id)
    }

    pub fn failed(identifier: NoteId, error: impl fmt::Display) -> Self {
        Self {
            identifier,
            action: SyncAction::Error,
            target_id: None,
            error: Some(error.to_string()),
            warnings: Vec::new(),
        }
    }

    fn success(identifier: NoteId, action: SyncAction, target_id: Option<String>) -> Self {
        Self {
            identifier,
            action,
            target_id,
            error: None,
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<CoercionWarning>) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn is_success(&self) -> bool {
        self.action != SyncAction::Error
    }
}

// ============================================================================
// Report
// ============================================================================

/// End-of-run result; the only completion signal callers need.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub run_id: String,
    pub succeeded: Vec<SyncOutcome>,
    pub failed: Vec<SyncOutcome>,
    /// Source notes removed after a successful write
    pub deleted: Vec<NoteId>,
    /// Set when the schema update was rejected and the run went on
    pub schema_warning: Option<String>,
    /// Set when source deletion failed after the writes
    pub deletion_error: Option<String>,
    pub cancelled: bool,
    /// Candidates never processed because the run was cancelled
    pub unprocessed: usize,
    pub duration_secs: u64,
}

impl SyncReport {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            ..Self::default()
        }
    }

    /// Report for a run that stopped before writing: every candidate fails
    /// with the same reason.
    pub fn all_failed(run_id: impl Into<String>, ids: &[NoteId], reason: &str) -> Self {
        let mut report = Self::new(run_id);
        report.failed = ids
            .iter()
            .map(|id| SyncOutcome::failed(*id, reason))
            .collect();
        report
    }

    pub fn record(&mut self, outcome: SyncOutcome) {
        if outcome.is_success() {
            self.succeeded.push(outcome);
        } else {
            self.failed.push(outcome);
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn count(&self, action: SyncAction) -> usize {
        self.succeeded
            .iter()
            .chain(self.failed.iter())
            .filter(|o| o.action == action)
            .count()
    }

    /// Identifiers whose page was created or updated.
    pub fn written_ids(&self) -> Vec<NoteId> {
        self.succeeded
            .iter()
            .filter(|o| o.action.wrote_target())
            .map(|o| o.identifier)
            .collect()
    }

    pub fn warning_count(&self) -> usize {
        self.succeeded.iter().map(|o| o.warnings.len()).sum()
    }

    /// Single human-readable end-of-run message.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "Synced {} of {} notes ({} created, {} updated, {} skipped), {} failed",
            self.succeeded.len(),
            self.total(),
            self.count(SyncAction::Create),
            self.count(SyncAction::Update),
            self.count(SyncAction::Skip),
            self.failed.len()
        )];

        if !self.deleted.is_empty() {
            lines.push(format!("Deleted {} source notes", self.deleted.len()));
        }
        if self.cancelled {
            lines.push(format!("Cancelled with {} notes unprocessed", self.unprocessed));
        }
        if let Some(warning) = &self.schema_warning {
            lines.push(format!("Schema warning: {}", warning));
        }
        if let Some(error) = &self.deletion_error {
            lines.push(format!("Deletion failed: {}", error));
        }
        for outcome in &self.failed {
            lines.push(format!(
                "  {}: {}",
                outcome.identifier,
                outcome.error.as_deref().unwrap_or("unknown error")
            ));
        }

        lines.join("\n")
    }
}

// ============================================================================
// Pull report
// ============================================================================

/// Result of importing one page into the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullOutcome {
    pub page_id: String,
    pub action: SyncAction,
    /// Notes created, updated or left alone for this page
    pub note_ids: Vec<NoteId>,
    pub error: Option<String>,
}

impl PullOutcome {
    pub fn new(page_id: impl Into<String>, action: SyncAction, note_ids: Vec<NoteId>) -> Self {
        Self {
            page_id: page_id.into(),
            action,
            note_ids,
            error: None,
        }
    }

    pub fn failed(page_id: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            page_id: page_id.into(),
            action: SyncAction::Error,
            note_ids: Vec::new(),
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.action != SyncAction::Error
    }
}

/// End-of-run result of a pull from the target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullReport {
    pub run_id: String,
    pub succeeded: Vec<PullOutcome>,
    pub failed: Vec<PullOutcome>,
    /// Pages archived after their import
    pub archived: Vec<String>,
    /// Set when archiving failed after the import
    pub archive_error: Option<String>,
    pub cancelled: bool,
    /// Pages never processed because the run was cancelled
    pub unprocessed: usize,
    pub duration_secs: u64,
}

impl PullReport {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            ..Self::default()
        }
    }

    pub fn record(&mut self, outcome: PullOutcome) {
        if outcome.is_success() {
            self.succeeded.push(outcome);
        } else {
            self.failed.push(outcome);
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn count(&self, action: SyncAction) -> usize {
        self.succeeded
            .iter()
            .chain(self.failed.iter())
            .filter(|o| o.action == action)
            .count()
    }

    /// Pages whose data reached the source.
    pub fn imported_pages(&self) -> Vec<String> {
        self.succeeded
            .iter()
            .filter(|o| o.action.wrote_target())
            .map(|o| o.page_id.clone())
            .collect()
    }

    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "Pulled {} of {} pages ({} created, {} updated, {} skipped), {} failed",
            self.succeeded.len(),
            self.total(),
            self.count(SyncAction::Create),
            self.count(SyncAction::Update),
            self.count(SyncAction::Skip),
            self.failed.len()
        )];

        if !self.archived.is_empty() {
            lines.push(format!("Archived {} pages", self.archived.len()));
        }
        if self.cancelled {
            lines.push(format!("Cancelled with {} pages unprocessed", self.unprocessed));
        }
        if let Some(error) = &self.archive_error {
            lines.push(format!("Archiving failed: {}", error));
        }
        for outcome in &self.failed {
            lines.push(format!(
                "  {}: {}",
                outcome.page_id,
                outcome.error.as_deref().unwrap_or("unknown error")
            ));
        }

        lines.join("\n")
    }
}
