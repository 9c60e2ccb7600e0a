//! Page Database Abstraction
//!
//! The remote, schema-on-write page database a sync run writes to: a database
//! schema that can be read and extended, a query endpoint, and pages made of
//! typed properties plus a body of content blocks.
//!
//! The value types here are wire-neutral. Connectors render them into the
//! target API's JSON shapes (e.g. a date becomes `{"date": {"start": ...}}`).

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::Result;

// ============================================================================
// Schema
// ============================================================================

/// Declared type of a database property.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyType {
    Text,
    Number,
    Date,
    MultiSelect,
    Checkbox,
    /// The database's single title property
    Title,
    /// Any type the sync never requests (select, url, relation, ...)
    Other(String),
}

impl PropertyType {
    /// Name used by the target API.
    pub fn wire_name(&self) -> &str {
        match self {
            PropertyType::Text => "rich_text",
            PropertyType::Number => "number",
            PropertyType::Date => "date",
            PropertyType::MultiSelect => "multi_select",
            PropertyType::Checkbox => "checkbox",
            PropertyType::Title => "title",
            PropertyType::Other(name) => name,
        }
    }

    pub fn from_wire(name: &str) -> Self {
        match name {
            "rich_text" => PropertyType::Text,
            "number" => PropertyType::Number,
            "date" => PropertyType::Date,
            "multi_select" => PropertyType::MultiSelect,
            "checkbox" => PropertyType::Checkbox,
            "title" => PropertyType::Title,
            other => PropertyType::Other(other.to_string()),
        }
    }

    /// Whether a property declared as `self` can hold values of `required`.
    ///
    /// A title property accepts text and cannot be retyped.
    pub fn satisfies(&self, required: &PropertyType) -> bool {
        self == required || (*self == PropertyType::Title && *required == PropertyType::Text)
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Property name to declared type.
pub type PropertyTypeMap = BTreeMap<String, PropertyType>;

/// Properties to add or retype on the target database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaUpdateRequest {
    pub properties: BTreeMap<String, PropertyType>,
}

// ============================================================================
// Page values
// ============================================================================

/// Value written into one page property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Text(String),
    Number(f64),
    /// ISO 8601 start; `None` clears the date
    Date(Option<String>),
    MultiSelect(Vec<String>),
    Checkbox(bool),
}

/// Property name to value, as sent on create and update.
pub type PropertyPayload = BTreeMap<String, PropertyValue>;

/// Value read back from a page property.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetValue {
    Title(String),
    RichText(String),
    Number(Option<f64>),
    Date(Option<String>),
    MultiSelect(Vec<String>),
    Checkbox(bool),
    /// A property type the sync does not understand; carries the wire type name
    Unsupported(String),
}

/// One unit of page body content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Paragraph { text: String },
    Code { text: String, language: String },
    ListItem { text: String, ordered: bool },
}

impl Block {
    pub fn paragraph(text: impl Into<String>) -> Self {
        Block::Paragraph { text: text.into() }
    }

    pub fn code(text: impl Into<String>, language: impl Into<String>) -> Self {
        Block::Code {
            text: text.into(),
            language: language.into(),
        }
    }

    pub fn list_item(text: impl Into<String>, ordered: bool) -> Self {
        Block::ListItem {
            text: text.into(),
            ordered,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Block::Paragraph { text } | Block::Code { text, .. } | Block::ListItem { text, .. } => {
                text
            }
        }
    }
}

/// A page read back from the target.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetPage {
    pub id: String,
    pub properties: BTreeMap<String, TargetValue>,
    pub blocks: Vec<Block>,
    pub archived: bool,
}

// ============================================================================
// Queries
// ============================================================================

/// Database query predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryFilter {
    And(Vec<QueryFilter>),
    TextEquals { property: String, value: String },
    /// A multi-select property holding `option`
    Contains { property: String, option: String },
}

impl QueryFilter {
    pub fn text_equals(property: impl Into<String>, value: impl Into<String>) -> Self {
        QueryFilter::TextEquals {
            property: property.into(),
            value: value.into(),
        }
    }

    pub fn contains(property: impl Into<String>, option: impl Into<String>) -> Self {
        QueryFilter::Contains {
            property: property.into(),
            option: option.into(),
        }
    }
}

/// A page matched by a database query, in target-reported order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageMatch {
    pub id: String,
}

// ============================================================================
// Trait
// ============================================================================

/// Page database trait
///
/// Every call can fail with a transport error (nothing reached the target) or
/// a validation error (the target rejected the request). Callers classify
/// both per record.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::target::{Block, PageDatabase, PropertyPayload, PropertyValue};
///
/// async fn publish(db: &dyn PageDatabase, database_id: &str) -> Result<String> {
///     let mut properties = PropertyPayload::new();
///     properties.insert("Front".into(), PropertyValue::Text("What is Rust?".into()));
///     db.create_page(database_id, &properties, &[Block::paragraph("A language")]).await
/// }
/// ```
#[async_trait]
pub trait PageDatabase: Send + Sync {
    /// Declared property types of a database.
    async fn get_database_schema(&self, database_id: &str) -> Result<PropertyTypeMap>;

    /// Add or retype properties.
    async fn update_database_schema(
        &self,
        database_id: &str,
        request: &SchemaUpdateRequest,
    ) -> Result<()>;

    /// Pages matching a predicate, in target order.
    async fn query_database(&self, database_id: &str, filter: &QueryFilter)
        -> Result<Vec<PageMatch>>;

    /// Create a page and return its id.
    async fn create_page(
        &self,
        database_id: &str,
        properties: &PropertyPayload,
        blocks: &[Block],
    ) -> Result<String>;

    /// Replace a page's properties and body.
    async fn update_page(
        &self,
        page_id: &str,
        properties: &PropertyPayload,
        blocks: &[Block],
    ) -> Result<()>;

    /// Delete (archive) a page.
    async fn delete_page(&self, page_id: &str) -> Result<()>;

    /// Read a page with its properties and body.
    async fn retrieve_page(&self, page_id: &str) -> Result<TargetPage>;
}
