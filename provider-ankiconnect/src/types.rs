//! AnkiConnect request and response types
//!
//! Every action is a `POST` of `{action, version, params}` answered with
//! `{result, error}`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Protocol version spoken by this client
pub const API_VERSION: u32 = 6;

#[derive(Debug, Serialize)]
pub struct ActionRequest<'a, P: Serialize> {
    pub action: &'a str,
    pub version: u32,
    pub params: P,
}

/// Response envelope
#[derive(Debug, Deserialize)]
pub struct ActionResponse<T> {
    pub result: Option<T>,
    pub error: Option<String>,
}

/// `addNote` payload
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNote<'a> {
    pub deck_name: &'a str,
    pub model_name: &'a str,
    pub fields: BTreeMap<&'a str, &'a str>,
    pub tags: &'a [String],
    pub options: NoteOptions,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteOptions {
    pub allow_duplicate: bool,
}

/// `notesInfo` entry. A missing note comes back as `{}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteInfo {
    #[serde(default)]
    pub note_id: Option<i64>,
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub fields: HashMap<String, FieldInfo>,
    #[serde(default)]
    pub cards: Vec<i64>,
    /// Modification time, Unix seconds
    #[serde(default, rename = "mod")]
    pub modified: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldInfo {
    pub value: String,
    pub order: usize,
}

/// `cardsInfo` entry
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardInfo {
    pub card_id: i64,
    #[serde(default)]
    pub deck_name: String,
    /// 0 new, 1 learning, 2 review, 3 relearning
    #[serde(default, rename = "type")]
    pub card_type: i64,
    #[serde(default)]
    pub queue: i64,
    #[serde(default)]
    pub due: i64,
    #[serde(default)]
    pub interval: i64,
    /// Ease in permille
    #[serde(default)]
    pub factor: i64,
    #[serde(default)]
    pub reps: i64,
    #[serde(default)]
    pub lapses: i64,
    /// Scheduler data blob (FSRS memory state), when the add-on exposes it
    #[serde(default)]
    pub data: Option<String>,
}
