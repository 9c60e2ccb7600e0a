//! Notion API connector implementation
//!
//! Implements the `PageDatabase` trait for the Notion REST API (`2022-06-28`).

use async_trait::async_trait;
use bridge_traits::error::Result;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
use bridge_traits::target::{
    Block, PageDatabase, PageMatch, PropertyPayload, PropertyType, PropertyTypeMap,
    PropertyValue, QueryFilter, SchemaUpdateRequest, TargetPage, TargetValue,
};
use core_runtime::logging::redact_if_sensitive;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use crate::error::NotionError;
use crate::rich_text::{encode_plain, encode_runs, parse_markers, plain_text, to_markers};
use crate::types::{
    ApiErrorBody, BlockObject, DatabaseObject, ListResponse, ObjectRef, PageObject,
    PropertyValueObject,
};

/// Notion API base URL
const NOTION_API_BASE: &str = "https://api.notion.com/v1";

/// API version sent with every request
pub const NOTION_VERSION: &str = "2022-06-28";

/// Maximum children per create or append request
pub const MAX_BLOCKS_PER_REQUEST: usize = 100;

/// Page size for paginated reads
const PAGE_SIZE: u32 = 100;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How a request may be replayed by the HTTP client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replay {
    /// The client's own default for the method
    ClientDefault,
    /// Safe to repeat even though the method is not idempotent
    Always,
    /// Must not be repeated: a second attempt could duplicate a write
    Never,
}

/// Notion API connector
///
/// Implements `PageDatabase` for a Notion integration.
///
/// # Features
///
/// - Schema read and extension (`GET`/`PATCH /databases/{id}`)
/// - Paginated database queries and block listing
/// - Page bodies sent in chunks of 100 blocks, text in 2000-character runs
/// - Single-attempt writes; reads use the client's retry policy
/// - The database's title property is learned from the schema and used for
///   text values and lookups on that name
///
/// # Example
///
/// ```ignore
/// use provider_notion::NotionConnector;
/// use bridge_traits::target::PageDatabase;
///
/// let connector = NotionConnector::new(http_client, token);
/// let schema = connector.get_database_schema(&database_id).await?;
/// ```
pub struct NotionConnector {
    /// HTTP client for API requests
    http_client: Arc<dyn HttpClient>,

    /// Integration secret
    token: String,

    base_url: String,

    /// Name of the database's title property, once known
    title_property: RwLock<Option<String>>,
}

impl fmt::Debug for NotionConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotionConnector")
            .field("token", &redact_if_sensitive("token", &self.token))
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl NotionConnector {
    /// Create a new Notion connector
    ///
    /// # Arguments
    ///
    /// * `http_client` - HTTP client implementation
    /// * `token` - Integration secret with access to the target database
    pub fn new(http_client: Arc<dyn HttpClient>, token: impl Into<String>) -> Self {
        Self {
            http_client,
            token: token.into(),
            base_url: NOTION_API_BASE.to_string(),
            title_property: RwLock::new(None),
        }
    }

    /// Point the connector at another API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Title property learned from the last schema read.
    pub async fn title_property(&self) -> Option<String> {
        self.title_property.read().await.clone()
    }

    fn request(&self, method: HttpMethod, path: &str) -> HttpRequest {
        HttpRequest::new(method, format!("{}{}", self.base_url, path))
            .bearer_token(self.token.clone())
            .header("Notion-Version", NOTION_VERSION)
            .timeout(REQUEST_TIMEOUT)
    }

    fn with_body(request: HttpRequest, body: &Value) -> std::result::Result<HttpRequest, NotionError> {
        Ok(request.json(body)?)
    }

    /// Send a request and turn error statuses into `NotionError::Api`.
    async fn send(
        &self,
        request: HttpRequest,
        replay: Replay,
    ) -> std::result::Result<HttpResponse, NotionError> {
        let method = request.method;
        let url = request.url.clone();

        let response = match replay {
            Replay::ClientDefault => self.http_client.execute(request).await?,
            Replay::Always => {
                self.http_client
                    .execute_with_retry(request, RetryPolicy::default())
                    .await?
            }
            Replay::Never => {
                self.http_client
                    .execute_with_retry(request, RetryPolicy::no_retry())
                    .await?
            }
        };

        if response.is_success() {
            debug!("{:?} {} -> {}", method, url, response.status);
            return Ok(response);
        }

        if response.status == 429 {
            let retry_after_seconds = response.retry_after().map_or(1, |d| d.as_secs());
            warn!("Rate limited on {:?} {}", method, url);
            return Err(NotionError::RateLimited {
                retry_after_seconds,
            });
        }

        let body: ApiErrorBody = serde_json::from_slice(&response.body).unwrap_or(ApiErrorBody {
            code: "unknown".to_string(),
            message: String::from_utf8_lossy(&response.body).to_string(),
        });
        warn!(
            "{:?} {} failed: status={}, code={}",
            method, url, response.status, body.code
        );
        Err(NotionError::Api {
            status: response.status,
            code: body.code,
            message: body.message,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: HttpRequest,
        replay: Replay,
    ) -> std::result::Result<T, NotionError> {
        let response = self.send(request, replay).await?;
        serde_json::from_slice(&response.body).map_err(|e| NotionError::ParseError(e.to_string()))
    }

    /// Title property name, reading the schema if it is not known yet.
    async fn resolve_title_property(
        &self,
        database_id: &str,
    ) -> std::result::Result<Option<String>, NotionError> {
        if let Some(title) = self.title_property.read().await.clone() {
            return Ok(Some(title));
        }
        self.fetch_schema(database_id).await?;
        Ok(self.title_property.read().await.clone())
    }

    async fn fetch_schema(
        &self,
        database_id: &str,
    ) -> std::result::Result<PropertyTypeMap, NotionError> {
        let request = self.request(HttpMethod::Get, &format!("/databases/{}", database_id));
        let database: DatabaseObject = self.call(request, Replay::ClientDefault).await?;

        let schema: PropertyTypeMap = database
            .properties
            .into_iter()
            .map(|(name, declaration)| (name, PropertyType::from_wire(&declaration.kind)))
            .collect();

        let title = schema
            .iter()
            .find(|(_, kind)| **kind == PropertyType::Title)
            .map(|(name, _)| name.clone());
        *self.title_property.write().await = title;

        Ok(schema)
    }

    /// All children of a block (or page), following `next_cursor`.
    async fn list_children(
        &self,
        block_id: &str,
    ) -> std::result::Result<Vec<BlockObject>, NotionError> {
        let mut children = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut path = format!("/blocks/{}/children?page_size={}", block_id, PAGE_SIZE);
            if let Some(cursor) = &cursor {
                path.push_str(&format!("&start_cursor={}", urlencoding::encode(cursor)));
            }

            let page: ListResponse<BlockObject> = self
                .call(self.request(HttpMethod::Get, &path), Replay::ClientDefault)
                .await?;
            children.extend(page.results);

            match page.next_cursor {
                Some(next) if page.has_more => cursor = Some(next),
                _ => break,
            }
        }

        Ok(children)
    }

    async fn append_children(
        &self,
        block_id: &str,
        blocks: &[Block],
    ) -> std::result::Result<(), NotionError> {
        for chunk in blocks.chunks(MAX_BLOCKS_PER_REQUEST) {
            let children: Vec<Value> = chunk.iter().map(encode_block).collect();
            let request = Self::with_body(
                self.request(HttpMethod::Patch, &format!("/blocks/{}/children", block_id)),
                &json!({ "children": children }),
            )?;
            self.send(request, Replay::Never).await?;
        }
        Ok(())
    }

    async fn replace_children(
        &self,
        page_id: &str,
        blocks: &[Block],
    ) -> std::result::Result<(), NotionError> {
        let existing = self.list_children(page_id).await?;
        debug!("Replacing {} blocks on page {}", existing.len(), page_id);

        for child in existing {
            let request = self.request(HttpMethod::Delete, &format!("/blocks/{}", child.id));
            self.send(request, Replay::ClientDefault).await?;
        }

        self.append_children(page_id, blocks).await
    }
}

// ============================================================================
// Wire encoding
// ============================================================================

fn encode_property(name: &str, value: &PropertyValue, title: Option<&str>) -> Value {
    match value {
        PropertyValue::Text(text) if title == Some(name) => json!({ "title": encode_plain(text) }),
        PropertyValue::Text(text) => json!({ "rich_text": encode_plain(text) }),
        PropertyValue::Number(number) => json!({ "number": number }),
        PropertyValue::Date(Some(start)) => json!({ "date": { "start": start } }),
        PropertyValue::Date(None) => json!({ "date": null }),
        PropertyValue::MultiSelect(tags) => {
            let options: Vec<Value> = tags.iter().map(|tag| json!({ "name": tag })).collect();
            json!({ "multi_select": options })
        }
        PropertyValue::Checkbox(checked) => json!({ "checkbox": checked }),
    }
}

fn encode_properties(properties: &PropertyPayload, title: Option<&str>) -> Value {
    let map: Map<String, Value> = properties
        .iter()
        .map(|(name, value)| (name.clone(), encode_property(name, value, title)))
        .collect();
    Value::Object(map)
}

fn encode_block(block: &Block) -> Value {
    match block {
        Block::Paragraph { text } => json!({
            "object": "block",
            "type": "paragraph",
            "paragraph": { "rich_text": encode_runs(&parse_markers(text)) }
        }),
        Block::Code { text, language } => json!({
            "object": "block",
            "type": "code",
            "code": { "rich_text": encode_plain(text), "language": language }
        }),
        Block::ListItem { text, ordered } => {
            let kind = if *ordered {
                "numbered_list_item"
            } else {
                "bulleted_list_item"
            };
            json!({
                "object": "block",
                "type": kind,
                kind: { "rich_text": encode_runs(&parse_markers(text)) }
            })
        }
    }
}

fn encode_filter(filter: &QueryFilter, title: Option<&str>) -> Value {
    match filter {
        QueryFilter::And(filters) => {
            let terms: Vec<Value> = filters.iter().map(|f| encode_filter(f, title)).collect();
            json!({ "and": terms })
        }
        QueryFilter::TextEquals { property, value } => {
            let kind = if title == Some(property.as_str()) {
                "title"
            } else {
                "rich_text"
            };
            json!({ "property": property, kind: { "equals": value } })
        }
        QueryFilter::Contains { property, option } => {
            json!({ "property": property, "multi_select": { "contains": option } })
        }
    }
}

fn decode_property(value: &PropertyValueObject) -> TargetValue {
    match value.kind.as_str() {
        "title" => TargetValue::Title(plain_text(value.title.as_deref().unwrap_or_default())),
        "rich_text" => {
            TargetValue::RichText(plain_text(value.rich_text.as_deref().unwrap_or_default()))
        }
        "number" => TargetValue::Number(value.number),
        "date" => TargetValue::Date(value.date.as_ref().and_then(|d| d.start.clone())),
        "multi_select" => TargetValue::MultiSelect(
            value
                .multi_select
                .iter()
                .flatten()
                .map(|option| option.name.clone())
                .collect(),
        ),
        "checkbox" => TargetValue::Checkbox(value.checkbox.unwrap_or(false)),
        other => TargetValue::Unsupported(other.to_string()),
    }
}

fn decode_block(block: &BlockObject) -> std::result::Result<Block, NotionError> {
    let unsupported = || NotionError::UnsupportedBlock(block.kind.clone());

    match block.kind.as_str() {
        "paragraph" => {
            let content = block.paragraph.as_ref().ok_or_else(unsupported)?;
            Ok(Block::paragraph(to_markers(&content.rich_text)))
        }
        "code" => {
            let content = block.code.as_ref().ok_or_else(unsupported)?;
            Ok(Block::code(plain_text(&content.rich_text), content.language.clone()))
        }
        "bulleted_list_item" => {
            let content = block.bulleted_list_item.as_ref().ok_or_else(unsupported)?;
            Ok(Block::list_item(to_markers(&content.rich_text), false))
        }
        "numbered_list_item" => {
            let content = block.numbered_list_item.as_ref().ok_or_else(unsupported)?;
            Ok(Block::list_item(to_markers(&content.rich_text), true))
        }
        _ => Err(unsupported()),
    }
}

// ============================================================================
// PageDatabase
// ============================================================================

#[async_trait]
impl PageDatabase for NotionConnector {
    #[instrument(skip(self))]
    async fn get_database_schema(&self, database_id: &str) -> Result<PropertyTypeMap> {
        info!("Reading database schema");
        let schema = self.fetch_schema(database_id).await?;
        debug!("Database declares {} properties", schema.len());
        Ok(schema)
    }

    #[instrument(skip(self, request), fields(properties = request.properties.len()))]
    async fn update_database_schema(
        &self,
        database_id: &str,
        request: &SchemaUpdateRequest,
    ) -> Result<()> {
        let mut properties = Map::new();
        for (name, kind) in &request.properties {
            match kind {
                PropertyType::Title | PropertyType::Other(_) => {
                    warn!("Not declaring {} as {}: type cannot be created", name, kind);
                }
                _ => {
                    properties.insert(name.clone(), json!({ kind.wire_name(): {} }));
                }
            }
        }

        if properties.is_empty() {
            return Ok(());
        }

        info!("Declaring {} properties", properties.len());
        let http_request = NotionConnector::with_body(
            self.request(HttpMethod::Patch, &format!("/databases/{}", database_id)),
            &json!({ "properties": properties }),
        )?;
        // Declaring the same property twice is harmless
        self.send(http_request, Replay::Always).await?;
        Ok(())
    }

    #[instrument(skip(self, filter))]
    async fn query_database(
        &self,
        database_id: &str,
        filter: &QueryFilter,
    ) -> Result<Vec<PageMatch>> {
        let title = self.resolve_title_property(database_id).await?;
        let filter = encode_filter(filter, title.as_deref());

        let mut matches = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut body = json!({ "filter": filter, "page_size": PAGE_SIZE });
            if let Some(cursor) = &cursor {
                body["start_cursor"] = json!(cursor);
            }

            let request = NotionConnector::with_body(
                self.request(HttpMethod::Post, &format!("/databases/{}/query", database_id)),
                &body,
            )?;
            // A query is a read even though it is sent as POST
            let page: ListResponse<ObjectRef> = self.call(request, Replay::Always).await?;
            matches.extend(page.results.into_iter().map(|r| PageMatch { id: r.id }));

            match page.next_cursor {
                Some(next) if page.has_more => cursor = Some(next),
                _ => break,
            }
        }

        debug!("Query matched {} pages", matches.len());
        Ok(matches)
    }

    #[instrument(skip(self, properties, blocks), fields(blocks = blocks.len()))]
    async fn create_page(
        &self,
        database_id: &str,
        properties: &PropertyPayload,
        blocks: &[Block],
    ) -> Result<String> {
        let title = self.resolve_title_property(database_id).await?;
        let (first, rest) = blocks.split_at(blocks.len().min(MAX_BLOCKS_PER_REQUEST));
        let children: Vec<Value> = first.iter().map(encode_block).collect();

        let request = NotionConnector::with_body(
            self.request(HttpMethod::Post, "/pages"),
            &json!({
                "parent": { "database_id": database_id },
                "properties": encode_properties(properties, title.as_deref()),
                "children": children,
            }),
        )?;
        let page: ObjectRef = self.call(request, Replay::Never).await?;

        if !rest.is_empty() {
            if let Err(e) = self.append_children(&page.id, rest).await {
                error!("Page {} created with a partial body: {}", page.id, e);
                return Err(e.into());
            }
        }

        info!("Created page {}", page.id);
        Ok(page.id)
    }

    #[instrument(skip(self, properties, blocks), fields(blocks = blocks.len()))]
    async fn update_page(
        &self,
        page_id: &str,
        properties: &PropertyPayload,
        blocks: &[Block],
    ) -> Result<()> {
        let title = self.title_property.read().await.clone();

        let request = NotionConnector::with_body(
            self.request(HttpMethod::Patch, &format!("/pages/{}", page_id)),
            &json!({ "properties": encode_properties(properties, title.as_deref()) }),
        )?;
        self.send(request, Replay::Never).await?;

        self.replace_children(page_id, blocks).await?;
        info!("Updated page {}", page_id);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_page(&self, page_id: &str) -> Result<()> {
        let request = NotionConnector::with_body(
            self.request(HttpMethod::Patch, &format!("/pages/{}", page_id)),
            &json!({ "archived": true }),
        )?;
        self.send(request, Replay::Always).await?;
        info!("Archived page {}", page_id);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn retrieve_page(&self, page_id: &str) -> Result<TargetPage> {
        let request = self.request(HttpMethod::Get, &format!("/pages/{}", page_id));
        let page: PageObject = self.call(request, Replay::ClientDefault).await?;

        let properties: BTreeMap<String, TargetValue> = page
            .properties
            .iter()
            .map(|(name, value)| (name.clone(), decode_property(value)))
            .collect();

        let blocks = self
            .list_children(&page.id)
            .await?
            .iter()
            .map(decode_block)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(TargetPage {
            id: page.id,
            properties,
            blocks,
            archived: page.archived,
        })
    }
}
