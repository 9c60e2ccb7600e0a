//! Notion API response types
//!
//! Data structures for deserializing Notion API (`2022-06-28`) responses.
//! Property and block objects carry one payload key named after their
//! `type`; every payload is optional here and picked by `kind` afterwards.

use serde::Deserialize;
use std::collections::BTreeMap;

/// Error object returned with any non-2xx status
///
/// See: https://developers.notion.com/reference/status-codes
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Database object (only the property declarations are read)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseObject {
    pub id: String,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyDeclaration>,
}

/// One declared database property
#[derive(Debug, Clone, Deserialize)]
pub struct PropertyDeclaration {
    #[serde(rename = "type")]
    pub kind: String,
}

/// Paginated list envelope used by database queries and block children
#[derive(Debug, Clone, Deserialize)]
pub struct ListResponse<T> {
    pub results: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Any object that only needs its id
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectRef {
    pub id: String,
}

/// Page object
#[derive(Debug, Clone, Deserialize)]
pub struct PageObject {
    pub id: String,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValueObject>,
}

/// Property value on a page
#[derive(Debug, Clone, Deserialize)]
pub struct PropertyValueObject {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: Option<Vec<RichTextObject>>,
    #[serde(default)]
    pub rich_text: Option<Vec<RichTextObject>>,
    #[serde(default)]
    pub number: Option<f64>,
    #[serde(default)]
    pub date: Option<DateObject>,
    #[serde(default)]
    pub multi_select: Option<Vec<SelectOption>>,
    #[serde(default)]
    pub checkbox: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DateObject {
    pub start: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectOption {
    pub name: String,
}

/// One rich-text run
#[derive(Debug, Clone, Deserialize)]
pub struct RichTextObject {
    #[serde(default)]
    pub plain_text: String,
    #[serde(default)]
    pub annotations: Annotations,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Annotations {
    #[serde(default)]
    pub bold: bool,
    #[serde(default)]
    pub italic: bool,
    #[serde(default)]
    pub strikethrough: bool,
    #[serde(default)]
    pub code: bool,
}

/// Block object (children of a page)
#[derive(Debug, Clone, Deserialize)]
pub struct BlockObject {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub paragraph: Option<TextContent>,
    #[serde(default)]
    pub code: Option<CodeContent>,
    #[serde(default)]
    pub bulleted_list_item: Option<TextContent>,
    #[serde(default)]
    pub numbered_list_item: Option<TextContent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextContent {
    #[serde(default)]
    pub rich_text: Vec<RichTextObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CodeContent {
    #[serde(default)]
    pub rich_text: Vec<RichTextObject>,
    #[serde(default)]
    pub language: String,
}
