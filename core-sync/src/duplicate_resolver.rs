//! # Duplicate Resolution
//!
//! Decides per record whether the run creates a page, overwrites an existing
//! one or leaves it alone.
//!
//! ## Overview
//!
//! A record matches a page when both its note type and its primary field
//! value are equal. The primary field is the record's own (a Cloze note
//! matches on `Text`, a Basic note on `Front`), so the predicate is built per
//! record.
//!
//! | Policy | On match | On no match |
//! |--------|----------|-------------|
//! | `keep` | skip | create |
//! | `overwrite` | update first match | create |
//! | `copy` | (no lookup) | create |
//!
//! A blank primary value never matches anything and never reaches the
//! target as a query term.
//!
//! Pulls apply the same policy against the source: the lookup is an Anki
//! search on the note type and the primary field, and `overwrite` updates
//! every note it finds.

use crate::error::{Result, SyncError};
use crate::record::{names, CanonicalRecord};
use bridge_traits::source::{NoteId, NoteSource};
use bridge_traits::target::{PageDatabase, PageMatch, QueryFilter};
use tracing::debug;

pub use core_runtime::config::DuplicatePolicy;

/// Outcome of comparing a record against the query result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    NoMatch,
    Matched { target_id: String },
}

/// What the write phase does with a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Create,
    Update { target_id: String },
    Skip { target_id: String },
}

/// What a pull does with a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceResolution {
    Create,
    Update { note_ids: Vec<NoteId> },
    Skip { note_ids: Vec<NoteId> },
}

#[derive(Debug, Clone, Copy)]
pub struct DuplicateResolver {
    policy: DuplicatePolicy,
}

impl DuplicateResolver {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Lookup predicate for a record, or `None` when its primary value is
    /// blank.
    pub fn build_lookup(&self, record: &CanonicalRecord) -> Option<QueryFilter> {
        if !record.has_lookup_key() {
            return None;
        }

        Some(QueryFilter::And(vec![
            QueryFilter::text_equals(names::NOTE_TYPE, record.type_name.clone()),
            QueryFilter::text_equals(
                record.primary_field_name.clone(),
                record.primary_field_value.clone(),
            ),
        ]))
    }

    /// First match in target order wins.
    pub fn classify(&self, record: &CanonicalRecord, matches: &[PageMatch]) -> LookupOutcome {
        if !record.has_lookup_key() {
            return LookupOutcome::NoMatch;
        }

        match matches.first() {
            Some(first) => {
                if matches.len() > 1 {
                    debug!(
                        id = %record.identifier(),
                        matches = matches.len(),
                        "Several pages match, using the first"
                    );
                }
                LookupOutcome::Matched {
                    target_id: first.id.clone(),
                }
            }
            None => LookupOutcome::NoMatch,
        }
    }

    /// Look the record up (unless the policy is `copy`) and apply the policy.
    pub async fn resolve(
        &self,
        database: &dyn PageDatabase,
        database_id: &str,
        record: &CanonicalRecord,
    ) -> Result<Resolution> {
        if self.policy == DuplicatePolicy::Copy {
            return Ok(Resolution::Create);
        }

        let Some(filter) = self.build_lookup(record) else {
            debug!(id = %record.identifier(), "Blank primary field, skipping lookup");
            return Ok(Resolution::Create);
        };

        let matches = database
            .query_database(database_id, &filter)
            .await
            .map_err(|e| SyncError::DuplicateLookup(e.to_string()))?;

        Ok(match (self.classify(record, &matches), self.policy) {
            (LookupOutcome::NoMatch, _) => Resolution::Create,
            (LookupOutcome::Matched { target_id }, DuplicatePolicy::Overwrite) => {
                Resolution::Update { target_id }
            }
            (LookupOutcome::Matched { target_id }, _) => Resolution::Skip { target_id },
        })
    }

    /// Anki search for notes matching a record, or `None` when its primary
    /// value is blank. Wildcards in the value are escaped.
    pub fn build_source_query(&self, record: &CanonicalRecord) -> Option<String> {
        if !record.has_lookup_key() {
            return None;
        }
        Some(format!(
            "\"note:{}\" \"{}:{}\"",
            escape_search(&record.type_name),
            escape_search(&record.primary_field_name),
            escape_search(&record.primary_field_value),
        ))
    }

    /// Pull-side counterpart of [`resolve`](Self::resolve).
    pub async fn resolve_in_source(
        &self,
        source: &dyn NoteSource,
        record: &CanonicalRecord,
    ) -> Result<SourceResolution> {
        if self.policy == DuplicatePolicy::Copy {
            return Ok(SourceResolution::Create);
        }

        let Some(query) = self.build_source_query(record) else {
            debug!(id = %record.identifier(), "Blank primary field, skipping lookup");
            return Ok(SourceResolution::Create);
        };

        let note_ids = source
            .find_identifiers(&query)
            .await
            .map_err(|e| SyncError::DuplicateLookup(e.to_string()))?;

        Ok(match (note_ids.is_empty(), self.policy) {
            (true, _) => SourceResolution::Create,
            (false, DuplicatePolicy::Overwrite) => SourceResolution::Update { note_ids },
            (false, _) => SourceResolution::Skip { note_ids },
        })
    }
}

fn escape_search(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '"' | '*' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
