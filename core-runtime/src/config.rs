//! # Core Configuration Module
//!
//! Provides configuration management for the note sync core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds the Notion credentials, the Anki query and the run
//! options. It enforces fail-fast validation so a sync never starts with a
//! missing token or an unparseable database link.
//!
//! Configuration can also be read from the add-on's JSON config file, which
//! uses the same key names as the builder methods.
//!
//! ## Required Settings
//!
//! - `notion_token` - Notion integration secret
//! - `notion_database_url` - Link to the target database (the id is extracted)
//!
//! ## Optional Settings (with defaults)
//!
//! - `anki_query_string` - Source query (default: empty, whole collection)
//! - `duplicate_handling_way` - `keep` | `overwrite` | `copy` (default: `keep`)
//! - `delete_source_note` - Delete synced notes from Anki (default: `false`)
//! - `retain_notion_children` - Keep page body when pulling back (default: `true`)
//! - `ankiconnect_url` - AnkiConnect endpoint (default: `http://127.0.0.1:8765`)
//! - `body_field` - Note field holding the page body (default: `notion正文`)
//! - `max_concurrent_writes` - Parallel record writes (default: `1`)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, DuplicatePolicy};
//!
//! let config = CoreConfig::builder()
//!     .notion_token("secret_...")
//!     .notion_database_url("https://www.notion.so/team/0123456789abcdef0123456789abcdef?v=1")
//!     .anki_query_string("deck:Rust")
//!     .duplicate_policy(DuplicatePolicy::Overwrite)
//!     .build()?;
//!
//! let options = config.run_options();
//! ```
//!
//! ## Error Handling
//!
//! The builder validates required settings and reports the offending key:
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//!
//! let err = CoreConfig::builder().build().unwrap_err();
//! assert!(err.to_string().contains("notion_token"));
//! ```

use crate::error::{Error, Result};
use bridge_traits::HttpClient;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Default AnkiConnect endpoint.
pub const DEFAULT_ANKICONNECT_URL: &str = "http://127.0.0.1:8765";

/// Default name of the note field that carries the page body.
pub const DEFAULT_BODY_FIELD: &str = "notion正文";

/// Upper bound for `max_concurrent_writes`.
pub const MAX_CONCURRENT_WRITES: usize = 16;

// ============================================================================
// Duplicate policy
// ============================================================================

/// What to do when a record already exists in the target database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Leave the existing page alone
    #[default]
    Keep,
    /// Replace the first matching page's properties and body
    Overwrite,
    /// Skip the lookup and always create a new page
    Copy,
}

impl DuplicatePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicatePolicy::Keep => "keep",
            DuplicatePolicy::Overwrite => "overwrite",
            DuplicatePolicy::Copy => "copy",
        }
    }
}

impl FromStr for DuplicatePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep" => Ok(DuplicatePolicy::Keep),
            "overwrite" => Ok(DuplicatePolicy::Overwrite),
            "copy" => Ok(DuplicatePolicy::Copy),
            other => Err(Error::Config(format!(
                "Invalid duplicate_handling_way '{}': expected keep, overwrite or copy",
                other
            ))),
        }
    }
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Run options
// ============================================================================

/// Per-run input to the sync coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Source query selecting candidate notes
    pub source_query: String,
    pub duplicate_policy: DuplicatePolicy,
    /// Delete source notes whose page was created or updated
    pub delete_source_on_success: bool,
    /// Keep the source body when projecting a page back to the source
    pub retain_body_on_reverse_sync: bool,
    /// Records written concurrently during the write phase
    pub max_concurrent_writes: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            source_query: String::new(),
            duplicate_policy: DuplicatePolicy::Keep,
            delete_source_on_success: false,
            retain_body_on_reverse_sync: true,
            max_concurrent_writes: 1,
        }
    }
}

impl RunOptions {
    pub fn new(source_query: impl Into<String>) -> Self {
        Self {
            source_query: source_query.into(),
            ..Self::default()
        }
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub fn with_delete_source(mut self, delete: bool) -> Self {
        self.delete_source_on_success = delete;
        self
    }

    pub fn with_retain_body(mut self, retain: bool) -> Self {
        self.retain_body_on_reverse_sync = retain;
        self
    }

    pub fn with_max_concurrent_writes(mut self, writes: usize) -> Self {
        self.max_concurrent_writes = writes;
        self
    }
}

// ============================================================================
// Database id
// ============================================================================

/// Extract the database id from a Notion link.
///
/// Hyphens and the query string are dropped, the first run of 32 hex digits
/// is taken and formatted `8-4-4-4-12`. A bare id is accepted too.
pub fn parse_database_id(url: &str) -> Result<String> {
    let without_query = url.split('?').next().unwrap_or(url);
    let cleaned: Vec<char> = without_query.chars().filter(|c| *c != '-').collect();

    let hex = cleaned
        .windows(32)
        .find(|window| window.iter().all(|c| c.is_ascii_hexdigit()))
        .map(|window| window.iter().collect::<String>())
        .ok_or_else(|| {
            Error::Config(format!(
                "notion_database_url does not contain a database id: '{}'",
                url
            ))
        })?;

    Ok(format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    ))
}

// ============================================================================
// CoreConfig
// ============================================================================

/// Core configuration for the note sync core.
///
/// Use [`CoreConfigBuilder`] or [`CoreConfig::from_json_str`] to construct
/// instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Notion integration secret
    pub notion_token: String,

    /// Link to the target database as copied from Notion
    pub notion_database_url: String,

    /// Anki search selecting the notes to sync
    pub anki_query_string: String,

    pub duplicate_policy: DuplicatePolicy,

    pub delete_source_note: bool,

    pub retain_notion_children: bool,

    pub ankiconnect_url: String,

    /// Note field rendered as the page body
    pub body_field: String,

    pub max_concurrent_writes: usize,

    /// HTTP client for API requests (optional with desktop default)
    pub http_client: Option<Arc<dyn HttpClient>>,
}

impl fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreConfig")
            .field("notion_token", &"[REDACTED]")
            .field("notion_database_url", &self.notion_database_url)
            .field("anki_query_string", &self.anki_query_string)
            .field("duplicate_policy", &self.duplicate_policy)
            .field("delete_source_note", &self.delete_source_note)
            .field("retain_notion_children", &self.retain_notion_children)
            .field("ankiconnect_url", &self.ankiconnect_url)
            .field("body_field", &self.body_field)
            .field("max_concurrent_writes", &self.max_concurrent_writes)
            .field(
                "http_client",
                &self.http_client.as_ref().map(|_| "HttpClient { ... }"),
            )
            .finish()
    }
}

/// On-disk form of the configuration. Keys match the add-on's `config.json`.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    notion_token: Option<String>,
    notion_database_url: Option<String>,
    anki_query_string: Option<String>,
    duplicate_handling_way: Option<String>,
    delete_source_note: Option<bool>,
    retain_notion_children: Option<bool>,
    ankiconnect_url: Option<String>,
    body_field: Option<String>,
    max_concurrent_writes: Option<usize>,
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Parse a JSON config document. Unknown keys are ignored.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let file: ConfigFile = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Invalid config file: {}", e)))?;

        let mut builder = CoreConfig::builder();
        if let Some(token) = file.notion_token {
            builder = builder.notion_token(token);
        }
        if let Some(url) = file.notion_database_url {
            builder = builder.notion_database_url(url);
        }
        if let Some(query) = file.anki_query_string {
            builder = builder.anki_query_string(query);
        }
        if let Some(way) = file.duplicate_handling_way {
            builder = builder.duplicate_policy(way.parse()?);
        }
        if let Some(delete) = file.delete_source_note {
            builder = builder.delete_source_note(delete);
        }
        if let Some(retain) = file.retain_notion_children {
            builder = builder.retain_notion_children(retain);
        }
        if let Some(url) = file.ankiconnect_url {
            builder = builder.ankiconnect_url(url);
        }
        if let Some(field) = file.body_field {
            builder = builder.body_field(field);
        }
        if let Some(writes) = file.max_concurrent_writes {
            builder = builder.max_concurrent_writes(writes);
        }

        builder.build()
    }

    /// Read and parse a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| Error::ConfigFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    /// `<config dir>/notesync/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("notesync").join("config.json"))
    }

    /// Target database id extracted from `notion_database_url`.
    pub fn database_id(&self) -> Result<String> {
        parse_database_id(&self.notion_database_url)
    }

    /// Options for one sync run.
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            source_query: self.anki_query_string.clone(),
            duplicate_policy: self.duplicate_policy,
            delete_source_on_success: self.delete_source_note,
            retain_body_on_reverse_sync: self.retain_notion_children,
            max_concurrent_writes: self.max_concurrent_writes,
        }
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - The Notion token is present
    /// - The database link contains a database id
    /// - The AnkiConnect URL is an http(s) URL
    /// - The body field name is not empty
    /// - `max_concurrent_writes` is between 1 and [`MAX_CONCURRENT_WRITES`]
    pub fn validate(&self) -> Result<()> {
        if self.notion_token.trim().is_empty() {
            return Err(Error::Config("notion_token cannot be empty".to_string()));
        }

        self.database_id()?;

        if !(self.ankiconnect_url.starts_with("http://")
            || self.ankiconnect_url.starts_with("https://"))
        {
            return Err(Error::Config(format!(
                "ankiconnect_url must be an http(s) URL, got '{}'",
                self.ankiconnect_url
            )));
        }

        if self.body_field.trim().is_empty() {
            return Err(Error::Config("body_field cannot be empty".to_string()));
        }

        if self.max_concurrent_writes == 0 || self.max_concurrent_writes > MAX_CONCURRENT_WRITES {
            return Err(Error::Config(format!(
                "max_concurrent_writes must be between 1 and {}",
                MAX_CONCURRENT_WRITES
            )));
        }

        Ok(())
    }
}

/// Builder for [`CoreConfig`].
#[derive(Default)]
pub struct CoreConfigBuilder {
    notion_token: Option<String>,
    notion_database_url: Option<String>,
    anki_query_string: Option<String>,
    duplicate_policy: Option<DuplicatePolicy>,
    delete_source_note: Option<bool>,
    retain_notion_children: Option<bool>,
    ankiconnect_url: Option<String>,
    body_field: Option<String>,
    max_concurrent_writes: Option<usize>,
    http_client: Option<Arc<dyn HttpClient>>,
}

impl CoreConfigBuilder {
    /// Sets the Notion integration secret.
    pub fn notion_token(mut self, token: impl Into<String>) -> Self {
        self.notion_token = Some(token.into());
        self
    }

    /// Sets the target database link (or bare id).
    pub fn notion_database_url(mut self, url: impl Into<String>) -> Self {
        self.notion_database_url = Some(url.into());
        self
    }

    /// Sets the Anki search selecting candidate notes.
    pub fn anki_query_string(mut self, query: impl Into<String>) -> Self {
        self.anki_query_string = Some(query.into());
        self
    }

    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = Some(policy);
        self
    }

    pub fn delete_source_note(mut self, delete: bool) -> Self {
        self.delete_source_note = Some(delete);
        self
    }

    pub fn retain_notion_children(mut self, retain: bool) -> Self {
        self.retain_notion_children = Some(retain);
        self
    }

    pub fn ankiconnect_url(mut self, url: impl Into<String>) -> Self {
        self.ankiconnect_url = Some(url.into());
        self
    }

    pub fn body_field(mut self, field: impl Into<String>) -> Self {
        self.body_field = Some(field.into());
        self
    }

    /// Sets how many records are written concurrently.
    ///
    /// Default: 1 (sequential)
    pub fn max_concurrent_writes(mut self, writes: usize) -> Self {
        self.max_concurrent_writes = Some(writes);
        self
    }

    /// Injects an HTTP client instead of the desktop default.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Returns
    ///
    /// Returns `Ok(CoreConfig)` on success, or an error if:
    /// - The Notion token or database link is missing
    /// - Configuration values are invalid
    pub fn build(self) -> Result<CoreConfig> {
        let notion_token = self.notion_token.ok_or_else(|| {
            Error::Config("notion_token is required. Use .notion_token() to set it.".to_string())
        })?;

        let notion_database_url = self.notion_database_url.ok_or_else(|| {
            Error::Config(
                "notion_database_url is required. Use .notion_database_url() to set it."
                    .to_string(),
            )
        })?;

        let config = CoreConfig {
            notion_token,
            notion_database_url,
            anki_query_string: self.anki_query_string.unwrap_or_default(),
            duplicate_policy: self.duplicate_policy.unwrap_or_default(),
            delete_source_note: self.delete_source_note.unwrap_or(false),
            retain_notion_children: self.retain_notion_children.unwrap_or(true),
            ankiconnect_url: self
                .ankiconnect_url
                .unwrap_or_else(|| DEFAULT_ANKICONNECT_URL.to_string()),
            body_field: self
                .body_field
                .unwrap_or_else(|| DEFAULT_BODY_FIELD.to_string()),
            max_concurrent_writes: self.max_concurrent_writes.unwrap_or(1),
            http_client: self.http_client,
        };

        config.validate()?;

        Ok(config)
    }
}
