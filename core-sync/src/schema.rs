//! # Property Schema Reconciliation
//!
//! Works out which properties a batch of records needs on the target
//! database, compares that with what the database declares and produces the
//! smallest update that closes the gap.
//!
//! ## Overview
//!
//! Property types are decided by name only, through a fixed table:
//!
//! | Names | Type |
//! |-------|------|
//! | Creation Time, Modification Time, Due Date | date |
//! | Anki ID, Review Count, Ease Factor, Interval, Lapses, Difficulty, Stability, Retrievability | number |
//! | Tags | multi_select |
//! | Suspended | checkbox |
//! | anything else | rich_text |
//!
//! Values are never inspected, so two batches with the same names always
//! request the same schema.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::schema::PropertySchema;
//!
//! let schema = PropertySchema::new("notion正文");
//! let required = schema.compute_required_types(&records);
//! let diff = schema.diff(&current, &required);
//! if !diff.is_empty() {
//!     database.update_database_schema(&database_id, &schema.to_update_request(&diff)).await?;
//! }
//! ```

use crate::record::{names, CanonicalRecord};
use bridge_traits::target::{PropertyType, PropertyTypeMap, SchemaUpdateRequest};
use std::collections::BTreeMap;
use tracing::debug;

/// Property type for a name, from the fixed name table.
pub fn type_for_name(name: &str) -> PropertyType {
    match name {
        names::CREATION_TIME | names::MODIFICATION_TIME | names::DUE_DATE => PropertyType::Date,
        names::ANKI_ID
        | names::REVIEW_COUNT
        | names::EASE_FACTOR
        | names::INTERVAL
        | names::LAPSES
        | names::DIFFICULTY
        | names::STABILITY
        | names::RETRIEVABILITY => PropertyType::Number,
        names::TAGS => PropertyType::MultiSelect,
        names::SUSPENDED => PropertyType::Checkbox,
        _ => PropertyType::Text,
    }
}

// ============================================================================
// Schema diff
// ============================================================================

/// Properties that are missing from the target or declared with another type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaDiff {
    entries: BTreeMap<String, PropertyType>,
}

impl SchemaDiff {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, name: &str) -> Option<&PropertyType> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyType)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// `name: type` pairs, for logs and events.
    pub fn describe(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(name, ty)| format!("{}: {}", name, ty))
            .collect()
    }

    /// Apply the diff to a local copy of the target schema.
    pub fn apply_to(&self, schema: &mut PropertyTypeMap) {
        for (name, ty) in &self.entries {
            schema.insert(name.clone(), ty.clone());
        }
    }
}

// ============================================================================
// Property schema
// ============================================================================

/// Schema inference and diffing for one target database.
#[derive(Debug, Clone)]
pub struct PropertySchema {
    body_field: String,
}

impl PropertySchema {
    /// `body_field` is the note field that becomes the page body; it is
    /// never a property.
    pub fn new(body_field: impl Into<String>) -> Self {
        Self {
            body_field: body_field.into(),
        }
    }

    pub fn body_field(&self) -> &str {
        &self.body_field
    }

    /// Union of property names across the whole batch plus the mandatory
    /// bookkeeping names, typed by name.
    pub fn compute_required_types(&self, records: &[CanonicalRecord]) -> PropertyTypeMap {
        let mut required = PropertyTypeMap::new();

        let batch_names = records.iter().flat_map(|r| r.property_names());
        for name in names::MANDATORY.iter().copied().chain(batch_names) {
            if name == self.body_field || required.contains_key(name) {
                continue;
            }
            required.insert(name.to_string(), type_for_name(name));
        }

        debug!(
            records = records.len(),
            properties = required.len(),
            "Computed required property types"
        );
        required
    }

    /// Required entries the current schema does not already satisfy.
    pub fn diff(&self, current: &PropertyTypeMap, required: &PropertyTypeMap) -> SchemaDiff {
        let entries = required
            .iter()
            .filter(|(name, ty)| {
                current
                    .get(name.as_str())
                    .map_or(true, |declared| !declared.satisfies(ty))
            })
            .map(|(name, ty)| (name.clone(), ty.clone()))
            .collect();

        SchemaDiff { entries }
    }

    pub fn to_update_request(&self, diff: &SchemaDiff) -> SchemaUpdateRequest {
        SchemaUpdateRequest {
            properties: diff.entries.clone(),
        }
    }
}
