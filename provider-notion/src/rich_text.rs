//! Rich-text encoding
//!
//! Paragraph and list text carries inline markers (`**bold**`, `_italic_`,
//! `~~strike~~`, `` `code` ``) with literal marker characters escaped, as
//! defined by [`core_markup::inline`]. Notion carries the same styling as
//! annotations on text runs. This module converts between the two and splits
//! run content at the API's per-object length limit.

use core_markup::inline::{styled_runs, write_runs, Style, StyledRun};
use serde_json::{json, Value};

use crate::types::{Annotations, RichTextObject};

/// Maximum characters in one text object
pub const MAX_TEXT_LENGTH: usize = 2000;

/// A run of text with uniform styling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRun {
    pub content: String,
    pub annotations: Annotations,
}

impl TextRun {
    pub fn plain(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            annotations: Annotations::default(),
        }
    }
}

impl From<Style> for Annotations {
    fn from(style: Style) -> Self {
        Self {
            bold: style.bold,
            italic: style.italic,
            strikethrough: style.strikethrough,
            code: style.code,
        }
    }
}

impl From<Annotations> for Style {
    fn from(annotations: Annotations) -> Self {
        Self {
            bold: annotations.bold,
            italic: annotations.italic,
            strikethrough: annotations.strikethrough,
            code: annotations.code,
        }
    }
}

/// Split marker text into styled runs.
pub fn parse_markers(text: &str) -> Vec<TextRun> {
    styled_runs(text)
        .into_iter()
        .map(|run| TextRun {
            content: run.text,
            annotations: run.style.into(),
        })
        .collect()
}

/// Render runs back into marker text.
pub fn to_markers(objects: &[RichTextObject]) -> String {
    let runs: Vec<StyledRun> = objects
        .iter()
        .map(|object| StyledRun::new(object.plain_text.clone(), object.annotations.into()))
        .collect();
    write_runs(&runs)
}

/// Concatenated text with styling ignored.
pub fn plain_text(objects: &[RichTextObject]) -> String {
    objects.iter().map(|o| o.plain_text.as_str()).collect()
}

/// Split content into pieces of at most [`MAX_TEXT_LENGTH`] characters.
pub fn chunk(content: &str) -> Vec<String> {
    let chars: Vec<char> = content.chars().collect();
    chars
        .chunks(MAX_TEXT_LENGTH)
        .map(|piece| piece.iter().collect())
        .collect()
}

/// Wire form of styled runs.
pub fn encode_runs(runs: &[TextRun]) -> Vec<Value> {
    runs.iter()
        .flat_map(|run| {
            chunk(&run.content).into_iter().map(move |piece| {
                json!({
                    "type": "text",
                    "text": { "content": piece },
                    "annotations": {
                        "bold": run.annotations.bold,
                        "italic": run.annotations.italic,
                        "strikethrough": run.annotations.strikethrough,
                        "code": run.annotations.code,
                    }
                })
            })
        })
        .collect()
}

/// Wire form of unstyled text (property values and code bodies).
pub fn encode_plain(content: &str) -> Vec<Value> {
    chunk(content)
        .into_iter()
        .map(|piece| json!({ "type": "text", "text": { "content": piece } }))
        .collect()
}
