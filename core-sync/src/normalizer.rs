//! # Record Normalization
//!
//! Maps source notes to [`CanonicalRecord`]s and canonical records to the
//! target's property payload, plus the reverse projection used to pull pages
//! back into the source.
//!
//! ## Due dates
//!
//! The scheduler stores `due` in a unit that depends on the card's queue:
//!
//! | Queue | Meaning of `due` | Due date |
//! |-------|------------------|----------|
//! | negative (suspended, buried) | - | none |
//! | 0 (new) | position in the new queue | none |
//! | 1 (intraday learning) | epoch seconds, or seconds from now when small | `due` |
//! | 2, 3 (review, interday learning) | scheduler day number | now + (due - today) days |
//!
//! Review cards need the scheduler's current day number; without it the due
//! date is left empty.
//!
//! ## Coercion
//!
//! Payload values are coerced by property name (see [`crate::schema`]). A
//! value that cannot be coerced never fails the record: a number becomes `0`
//! and a date becomes empty, and a [`CoercionWarning`] is returned with the
//! payload.

use crate::error::{Result, SyncError};
use crate::record::{names, CanonicalRecord, CoercionWarning, RecordMetadata};
use crate::schema::type_for_name;
use bridge_traits::source::{
    NoteId, SourceCard, SourceField, SourceNote, SourceSchedule, SourceUpdate,
};
use bridge_traits::target::{
    Block, PropertyPayload, PropertyType, PropertyValue, TargetPage, TargetValue,
};
use bridge_traits::time::Clock;
use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use core_markup::MarkupConverter;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Learning-card due values above this are absolute epoch seconds.
const EPOCH_SECONDS_THRESHOLD: i64 = 1_000_000_000;

/// Checkbox values read as unchecked (compared case-insensitively).
const FALSY_VALUES: [&str; 5] = ["", "0", "false", "no", "off"];

/// Property payload plus the coercion warnings raised while building it.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertiesPayload {
    pub properties: PropertyPayload,
    pub warnings: Vec<CoercionWarning>,
}

pub struct RecordNormalizer {
    body_field: String,
    converter: MarkupConverter,
    clock: Arc<dyn Clock>,
}

impl RecordNormalizer {
    pub fn new(body_field: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            body_field: body_field.into(),
            converter: MarkupConverter::new(),
            clock,
        }
    }

    pub fn body_field(&self) -> &str {
        &self.body_field
    }

    // ========================================================================
    // Source -> canonical
    // ========================================================================

    /// Build the canonical form of a source note.
    pub fn from_source(&self, note: &SourceNote) -> Result<CanonicalRecord> {
        let primary = note
            .primary_field()
            .ok_or_else(|| SyncError::RecordNormalization {
                id: note.id.to_string(),
                reason: "note has no fields".to_string(),
            })?;

        let mut record = CanonicalRecord::new(
            note.id,
            note.model_name.clone(),
            primary.name.clone(),
            primary.value.clone(),
        );

        for field in &note.fields {
            if field.name == self.body_field {
                continue;
            }
            if names::is_reserved(&field.name) {
                debug!(
                    id = %note.id,
                    field = %field.name,
                    "Field shadows a reserved property, dropped"
                );
                continue;
            }
            record.set_field(field.name.clone(), field.value.clone());
        }

        if let Some(body) = note.field(&self.body_field) {
            record = record.with_body(body);
        }

        self.fill_metadata(note, &mut record);
        Ok(record)
    }

    fn fill_metadata(&self, note: &SourceNote, record: &mut CanonicalRecord) {
        let metadata = &mut record.metadata;

        metadata.insert(names::ANKI_ID, note.id.to_string());
        metadata.insert(names::NOTE_TYPE, note.model_name.clone());
        metadata.insert(names::FIRST_FIELD, record.primary_field_name.clone());
        metadata.insert(names::TAGS, note.tags.join(", "));
        insert_date(metadata, names::CREATION_TIME, note.id.created_at());
        insert_date(
            metadata,
            names::MODIFICATION_TIME,
            DateTime::from_timestamp(note.modified_at, 0),
        );

        let Some(card) = &note.card else {
            metadata.insert(names::DECK, "");
            metadata.insert(names::CARD_TYPE, "");
            metadata.insert_null(names::DUE_DATE);
            for name in [names::REVIEW_COUNT, names::EASE_FACTOR, names::INTERVAL, names::LAPSES] {
                metadata.insert(name, "0");
            }
            metadata.insert(names::SUSPENDED, "false");
            return;
        };

        metadata.insert(names::DECK, card.deck_name.clone());
        metadata.insert(names::CARD_TYPE, card_type_label(card.card_type));
        insert_date(
            metadata,
            names::DUE_DATE,
            self.due_date(card, note.scheduler_today),
        );
        metadata.insert(names::REVIEW_COUNT, card.repetitions.to_string());
        metadata.insert(
            names::EASE_FACTOR,
            format_number(card.ease_factor as f64 / 1000.0),
        );
        metadata.insert(names::INTERVAL, card.interval.to_string());
        metadata.insert(names::LAPSES, card.lapses.to_string());
        metadata.insert(names::SUSPENDED, (card.queue == -1).to_string());

        if let Some(blob) = &card.custom_data {
            for (name, value) in memory_state(note.id, blob) {
                metadata.insert(name, format_number(value));
            }
        }
    }

    /// Due date of a card, or `None` when no deterministic date exists.
    pub fn due_date(&self, card: &SourceCard, today: Option<i64>) -> Option<DateTime<Utc>> {
        let now = self.clock.now();

        match card.queue {
            q if q < 0 => None,
            0 => None,
            1 => {
                if card.due > EPOCH_SECONDS_THRESHOLD {
                    DateTime::from_timestamp(card.due, 0)
                } else {
                    now.checked_add_signed(Duration::try_seconds(card.due)?)
                }
            }
            2 | 3 => {
                let today = today?;
                now.checked_add_signed(Duration::try_days(card.due - today)?)
            }
            _ => None,
        }
    }

    // ========================================================================
    // Canonical -> target
    // ========================================================================

    /// Coerce every property of a record into its wire form.
    ///
    /// Used unchanged for creates and updates. Mandatory bookkeeping
    /// properties missing from the record are written with their empty value;
    /// optional scheduler parameters are left out.
    pub fn to_properties_payload(&self, record: &CanonicalRecord) -> PropertiesPayload {
        let mut raw: BTreeMap<&str, Option<&str>> = BTreeMap::new();
        for (name, value) in &record.fields {
            raw.insert(name.as_str(), Some(value.as_str()));
        }
        for (name, value) in record.metadata.iter() {
            raw.insert(name, value);
        }
        for name in names::MANDATORY {
            if !names::is_optional(name) {
                raw.entry(name).or_insert(None);
            }
        }

        let mut properties = PropertyPayload::new();
        let mut warnings = Vec::new();

        for (name, value) in raw {
            if name == self.body_field {
                continue;
            }
            if value.is_none() && names::is_optional(name) {
                continue;
            }

            let coerced = match type_for_name(name) {
                PropertyType::Number => coerce_number(name, value, &mut warnings),
                PropertyType::Date => coerce_date(name, value, &mut warnings),
                PropertyType::MultiSelect => {
                    PropertyValue::MultiSelect(split_tags(value.unwrap_or("")))
                }
                PropertyType::Checkbox => PropertyValue::Checkbox(is_truthy(value.unwrap_or(""))),
                _ => PropertyValue::Text(value.unwrap_or("").to_string()),
            };
            properties.insert(name.to_string(), coerced);
        }

        for warning in &warnings {
            warn!(id = %record.identifier(), "Coercion fallback: {}", warning);
        }

        PropertiesPayload {
            properties,
            warnings,
        }
    }

    /// Page body for a record.
    pub fn body_blocks(&self, record: &CanonicalRecord) -> Vec<Block> {
        record
            .body
            .as_deref()
            .map(|body| self.converter.to_blocks(body))
            .unwrap_or_default()
    }

    // ========================================================================
    // Target -> canonical
    // ========================================================================

    /// Rebuild a record from a page.
    ///
    /// Fails closed: a page with an unsupported property type, a non-text
    /// value in a note field, or missing bookkeeping properties is rejected
    /// rather than projected partially.
    pub fn from_target(&self, page: &TargetPage) -> Result<CanonicalRecord> {
        let reject = |reason: String| SyncError::RecordNormalization {
            id: page.id.clone(),
            reason,
        };

        let identifier = match page.properties.get(names::ANKI_ID) {
            Some(TargetValue::Number(Some(n))) if n.fract() == 0.0 => NoteId::new(*n as i64),
            _ => return Err(reject(format!("missing or invalid {}", names::ANKI_ID))),
        };
        let type_name = text_property(page, names::NOTE_TYPE)
            .ok_or_else(|| reject(format!("missing {}", names::NOTE_TYPE)))?;
        let primary_name = text_property(page, names::FIRST_FIELD)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| reject(format!("missing {}", names::FIRST_FIELD)))?;

        let mut fields = Vec::new();
        let mut metadata = Vec::new();
        for (name, value) in &page.properties {
            if let TargetValue::Unsupported(kind) = value {
                return Err(reject(format!("property {} has unsupported type {}", name, kind)));
            }
            if names::is_reserved(name) {
                metadata.push((name.as_str(), render_value(value)));
            } else {
                match value {
                    TargetValue::Title(text) | TargetValue::RichText(text) => {
                        fields.push((name.clone(), text.clone()))
                    }
                    _ => return Err(reject(format!("field {} does not hold text", name))),
                }
            }
        }

        let primary_value = fields
            .iter()
            .find(|(name, _)| *name == primary_name)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| reject(format!("primary field {} not on page", primary_name)))?;

        let mut record = CanonicalRecord::new(identifier, type_name, primary_name.clone(), primary_value);
        // Page properties carry no template order; the primary field leads.
        fields.sort_by_key(|(name, _)| *name != primary_name);
        record.fields = fields;
        for (name, value) in metadata {
            match value {
                Some(value) => record.metadata.insert(name, value),
                None => record.metadata.insert_null(name),
            }
        }

        if !page.blocks.is_empty() {
            record = record.with_body(self.converter.to_markup(&page.blocks));
        }

        Ok(record)
    }

    /// Source-shaped projection of a record.
    ///
    /// With `retain_body` the body markup goes back into the body field;
    /// without it the body field is left out of the update.
    pub fn to_source_update(&self, record: &CanonicalRecord, retain_body: bool) -> SourceUpdate {
        let mut fields: Vec<SourceField> = record
            .fields
            .iter()
            .map(|(name, value)| SourceField::new(name.clone(), value.clone()))
            .collect();

        if retain_body {
            if let Some(body) = &record.body {
                fields.push(SourceField::new(self.body_field.clone(), body.clone()));
            }
        }

        SourceUpdate {
            id: record.identifier(),
            model_name: record.type_name.clone(),
            fields,
            tags: split_tags(record.metadata.get(names::TAGS).unwrap_or("")),
            deck_name: record
                .metadata
                .get(names::DECK)
                .filter(|deck| !deck.is_empty())
                .map(str::to_string),
            schedule: self.schedule(record),
        }
    }

    /// Review state carried by a record's bookkeeping properties.
    ///
    /// Only review cards get a due date; a date already in the past becomes
    /// due tomorrow. Values that do not parse are left alone.
    pub fn schedule(&self, record: &CanonicalRecord) -> SourceSchedule {
        let metadata = &record.metadata;
        let integer = |name: &str| {
            metadata
                .get(name)
                .and_then(|value| value.trim().parse::<f64>().ok())
                .filter(|value| value.is_finite())
                .map(|value| value.round() as i64)
        };

        let is_review = matches!(metadata.get(names::CARD_TYPE), Some("review") | Some("2"));
        let due_in_days = metadata
            .get(names::DUE_DATE)
            .filter(|_| is_review)
            .and_then(parse_date)
            .map(|due| {
                let now = self.clock.now();
                if due < now {
                    1
                } else {
                    (due.date_naive() - now.date_naive()).num_days()
                }
            });

        let memory: serde_json::Map<String, serde_json::Value> = [
            ("d", names::DIFFICULTY),
            ("s", names::STABILITY),
            ("dr", names::RETRIEVABILITY),
        ]
        .into_iter()
        .filter_map(|(key, name)| {
            let value = metadata.get(name)?.trim().parse::<f64>().ok()?;
            serde_json::Number::from_f64(value).map(|n| (key.to_string(), n.into()))
        })
        .collect();

        SourceSchedule {
            suspended: metadata
                .get(names::SUSPENDED)
                .and_then(|value| match value.trim() {
                    "true" => Some(true),
                    "false" => Some(false),
                    _ => None,
                }),
            due_in_days,
            ease_factor: metadata
                .get(names::EASE_FACTOR)
                .and_then(|value| value.trim().parse::<f64>().ok())
                .filter(|value| value.is_finite() && *value > 0.0)
                .map(|value| (value * 1000.0).round() as i64),
            interval: integer(names::INTERVAL),
            repetitions: integer(names::REVIEW_COUNT),
            lapses: integer(names::LAPSES),
            custom_data: (!memory.is_empty())
                .then(|| serde_json::Value::Object(memory).to_string()),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn insert_date(
    metadata: &mut RecordMetadata,
    name: &str,
    value: Option<DateTime<Utc>>,
) {
    match value {
        Some(date) => metadata.insert(name, date.to_rfc3339_opts(SecondsFormat::Secs, true)),
        None => metadata.insert_null(name),
    }
}

fn card_type_label(card_type: i64) -> String {
    match card_type {
        0 => "new".to_string(),
        1 => "learning".to_string(),
        2 => "review".to_string(),
        3 => "relearning".to_string(),
        other => other.to_string(),
    }
}

/// FSRS memory state from the card's custom data. Each key is optional and a
/// malformed blob yields nothing.
fn memory_state(id: NoteId, blob: &str) -> Vec<(&'static str, f64)> {
    let value: serde_json::Value = match serde_json::from_str(blob) {
        Ok(value) => value,
        Err(e) => {
            debug!(id = %id, error = %e, "Unreadable card data, no memory state");
            return Vec::new();
        }
    };

    [
        ("d", names::DIFFICULTY),
        ("s", names::STABILITY),
        ("dr", names::RETRIEVABILITY),
    ]
    .into_iter()
    .filter_map(|(key, name)| value.get(key).and_then(|v| v.as_f64()).map(|v| (name, v)))
    .collect()
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

fn coerce_number(
    name: &str,
    value: Option<&str>,
    warnings: &mut Vec<CoercionWarning>,
) -> PropertyValue {
    let raw = value.map(str::trim).unwrap_or("");
    if raw.is_empty() {
        return PropertyValue::Number(0.0);
    }
    match raw.parse::<f64>() {
        Ok(number) if number.is_finite() => PropertyValue::Number(number),
        _ => {
            warnings.push(CoercionWarning::new(name, raw, "0"));
            PropertyValue::Number(0.0)
        }
    }
}

fn coerce_date(
    name: &str,
    value: Option<&str>,
    warnings: &mut Vec<CoercionWarning>,
) -> PropertyValue {
    let raw = value.map(str::trim).unwrap_or("");
    if raw.is_empty() {
        return PropertyValue::Date(None);
    }
    let valid = DateTime::parse_from_rfc3339(raw).is_ok()
        || NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok();
    if valid {
        PropertyValue::Date(Some(raw.to_string()))
    } else {
        warnings.push(CoercionWarning::new(name, raw, "empty date"));
        PropertyValue::Date(None)
    }
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|date| date.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()?
                .and_hms_opt(0, 0, 0)
                .map(|date| date.and_utc())
        })
}

fn split_tags(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_truthy(value: &str) -> bool {
    let value = value.trim();
    !FALSY_VALUES.iter().any(|falsy| value.eq_ignore_ascii_case(falsy))
}

fn text_property(page: &TargetPage, name: &str) -> Option<String> {
    match page.properties.get(name)? {
        TargetValue::Title(text) | TargetValue::RichText(text) => Some(text.clone()),
        _ => None,
    }
}

fn render_value(value: &TargetValue) -> Option<String> {
    match value {
        TargetValue::Title(text) | TargetValue::RichText(text) => Some(text.clone()),
        TargetValue::Number(number) => number.map(format_number),
        TargetValue::Date(date) => date.clone(),
        TargetValue::MultiSelect(tags) => Some(tags.join(", ")),
        TargetValue::Checkbox(checked) => Some(checked.to_string()),
        TargetValue::Unsupported(_) => None,
    }
}
