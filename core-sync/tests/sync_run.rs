//! Integration tests for sync runs
//!
//! These tests drive the coordinator end to end against in-memory stores:
//! - Creation, skip and overwrite under each duplicate policy
//! - Per-record error isolation
//! - Schema read and schema update failures
//! - Conditional deletion of source notes
//! - Cancellation and the single-run guard
//! - Event sequence and reverse projection
//! - Pulling ready pages back into the source

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result as BridgeResult},
    source::{NoteId, NoteSource, SourceField, SourceNote, SourceUpdate},
    target::{
        Block, PageDatabase, PageMatch, PropertyPayload, PropertyType, PropertyTypeMap,
        PropertyValue, QueryFilter, SchemaUpdateRequest, TargetPage, TargetValue,
    },
    time::FixedClock,
};
use core_runtime::config::{DuplicatePolicy, RunOptions, DEFAULT_BODY_FIELD};
use core_runtime::events::{CoreEvent, EventBus, SchemaEvent, SyncEvent};
use core_sync::{SyncAction, SyncCoordinator, SyncError, READY_TAG};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, Notify};

// ============================================================================
// Fake Implementations
// ============================================================================

/// In-memory note store
#[derive(Default)]
struct FakeSource {
    notes: AsyncMutex<BTreeMap<NoteId, SourceNote>>,
    unreadable: AsyncMutex<HashSet<NoteId>>,
    deleted: AsyncMutex<Vec<NoteId>>,
    created: AsyncMutex<Vec<SourceUpdate>>,
    updated: AsyncMutex<Vec<(NoteId, SourceUpdate)>>,
    persist_calls: AtomicUsize,
    fail_query: bool,
    fail_delete: bool,
}

impl FakeSource {
    async fn with_notes(notes: Vec<SourceNote>) -> Self {
        let source = Self::default();
        {
            let mut stored = source.notes.lock().await;
            for note in notes {
                stored.insert(note.id, note);
            }
        }
        source
    }

    async fn mark_unreadable(&self, id: i64) {
        self.unreadable.lock().await.insert(NoteId::new(id));
    }
}

/// Search the lookup form `"note:<type>" "<field>:<value>"` would match.
fn lookup_query(note: &SourceNote) -> Option<String> {
    let primary = note.primary_field()?;
    Some(format!(
        "\"note:{}\" \"{}:{}\"",
        note.model_name, primary.name, primary.value
    ))
}

#[async_trait]
impl NoteSource for FakeSource {
    async fn find_identifiers(&self, query: &str) -> BridgeResult<Vec<NoteId>> {
        if self.fail_query {
            return Err(BridgeError::Transport("connection refused".to_string()));
        }
        let notes = self.notes.lock().await;
        if query.starts_with("\"note:") {
            return Ok(notes
                .values()
                .filter(|note| lookup_query(note).as_deref() == Some(query))
                .map(|note| note.id)
                .collect());
        }
        Ok(notes.keys().copied().collect())
    }

    async fn get_record(&self, id: NoteId) -> BridgeResult<SourceNote> {
        if self.unreadable.lock().await.contains(&id) {
            return Err(BridgeError::OperationFailed("note is locked".to_string()));
        }
        self.notes
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(id.to_string()))
    }

    async fn delete_records(&self, ids: &[NoteId]) -> BridgeResult<()> {
        if self.fail_delete {
            return Err(BridgeError::OperationFailed("collection is read-only".to_string()));
        }
        self.deleted.lock().await.extend_from_slice(ids);
        Ok(())
    }

    async fn persist(&self) -> BridgeResult<()> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_record(&self, update: &SourceUpdate) -> BridgeResult<NoteId> {
        let mut created = self.created.lock().await;
        created.push(update.clone());
        let id = NoteId::new(1_800_000_000_000 + created.len() as i64);

        self.notes.lock().await.insert(
            id,
            SourceNote {
                id,
                model_name: update.model_name.clone(),
                fields: update.fields.clone(),
                tags: update.tags.clone(),
                modified_at: 1_700_000_000,
                card: None,
                scheduler_today: None,
            },
        );
        Ok(id)
    }

    async fn update_record(&self, id: NoteId, update: &SourceUpdate) -> BridgeResult<()> {
        let mut notes = self.notes.lock().await;
        let note = notes
            .get_mut(&id)
            .ok_or_else(|| BridgeError::NotFound(id.to_string()))?;
        for field in &update.fields {
            match note.fields.iter_mut().find(|f| f.name == field.name) {
                Some(existing) => existing.value = field.value.clone(),
                None => note.fields.push(field.clone()),
            }
        }
        note.tags = update.tags.clone();
        self.updated.lock().await.push((id, update.clone()));
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct StoredPage {
    id: String,
    properties: PropertyPayload,
    blocks: Vec<Block>,
}

/// Pause the Nth page creation until released
struct CreateGate {
    at: usize,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

/// In-memory page database that evaluates text-equality filters
#[derive(Default)]
struct FakeDatabase {
    schema: AsyncMutex<PropertyTypeMap>,
    pages: AsyncMutex<Vec<StoredPage>>,
    schema_updates: AsyncMutex<Vec<SchemaUpdateRequest>>,
    queries: AtomicUsize,
    creates: AtomicUsize,
    fail_schema_fetch: bool,
    fail_schema_update: bool,
    /// Primary field values whose page creation is rejected
    reject_create_for: Vec<String>,
    gate: Option<CreateGate>,
    /// Hold the first page creation back so later writes finish first
    slow_first_create: Option<Duration>,
}

impl FakeDatabase {
    async fn page_count(&self) -> usize {
        self.pages.lock().await.len()
    }

    async fn set_property(&self, page_id: &str, name: &str, value: PropertyValue) {
        let mut pages = self.pages.lock().await;
        if let Some(page) = pages.iter_mut().find(|page| page.id == page_id) {
            page.properties.insert(name.to_string(), value);
        }
    }

    async fn mark_ready(&self, page_id: &str) {
        let tags = vec!["rust".to_string(), READY_TAG.to_string()];
        self.set_property(page_id, "Tags", PropertyValue::MultiSelect(tags))
            .await;
    }
}

/// Read a stored page back the way the connector would.
fn to_target_page(page: &StoredPage) -> TargetPage {
    let properties = page
        .properties
        .iter()
        .map(|(name, value)| {
            let value = match value {
                PropertyValue::Text(text) => TargetValue::RichText(text.clone()),
                PropertyValue::Number(n) => TargetValue::Number(Some(*n)),
                PropertyValue::Date(date) => TargetValue::Date(date.clone()),
                PropertyValue::MultiSelect(tags) => TargetValue::MultiSelect(tags.clone()),
                PropertyValue::Checkbox(checked) => TargetValue::Checkbox(*checked),
            };
            (name.clone(), value)
        })
        .collect();

    TargetPage {
        id: page.id.clone(),
        properties,
        blocks: page.blocks.clone(),
        archived: false,
    }
}

fn matches_filter(properties: &PropertyPayload, filter: &QueryFilter) -> bool {
    match filter {
        QueryFilter::And(filters) => filters.iter().all(|f| matches_filter(properties, f)),
        QueryFilter::TextEquals { property, value } => {
            matches!(properties.get(property), Some(PropertyValue::Text(text)) if text == value)
        }
        QueryFilter::Contains { property, option } => matches!(
            properties.get(property),
            Some(PropertyValue::MultiSelect(options)) if options.contains(option)
        ),
    }
}

#[async_trait]
impl PageDatabase for FakeDatabase {
    async fn get_database_schema(&self, _database_id: &str) -> BridgeResult<PropertyTypeMap> {
        if self.fail_schema_fetch {
            return Err(BridgeError::Validation {
                status: 404,
                message: "database not shared with integration".to_string(),
            });
        }
        Ok(self.schema.lock().await.clone())
    }

    async fn update_database_schema(
        &self,
        _database_id: &str,
        request: &SchemaUpdateRequest,
    ) -> BridgeResult<()> {
        if self.fail_schema_update {
            return Err(BridgeError::Validation {
                status: 400,
                message: "property limit reached".to_string(),
            });
        }
        let mut schema = self.schema.lock().await;
        for (name, kind) in &request.properties {
            schema.insert(name.clone(), kind.clone());
        }
        self.schema_updates.lock().await.push(request.clone());
        Ok(())
    }

    async fn query_database(
        &self,
        _database_id: &str,
        filter: &QueryFilter,
    ) -> BridgeResult<Vec<PageMatch>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .pages
            .lock()
            .await
            .iter()
            .filter(|page| matches_filter(&page.properties, filter))
            .map(|page| PageMatch {
                id: page.id.clone(),
            })
            .collect())
    }

    async fn create_page(
        &self,
        _database_id: &str,
        properties: &PropertyPayload,
        blocks: &[Block],
    ) -> BridgeResult<String> {
        let count = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(gate) = &self.gate {
            if gate.at == count {
                gate.entered.notify_one();
                gate.release.notified().await;
            }
        }
        if let Some(delay) = self.slow_first_create.filter(|_| count == 1) {
            tokio::time::sleep(delay).await;
        }

        let rejected = self.reject_create_for.iter().any(|value| {
            properties
                .values()
                .any(|v| matches!(v, PropertyValue::Text(text) if text == value))
        });
        if rejected {
            return Err(BridgeError::Validation {
                status: 400,
                message: "body failed validation".to_string(),
            });
        }

        let mut pages = self.pages.lock().await;
        let id = format!("page-{}", pages.len() + 1);
        pages.push(StoredPage {
            id: id.clone(),
            properties: properties.clone(),
            blocks: blocks.to_vec(),
        });
        Ok(id)
    }

    async fn update_page(
        &self,
        page_id: &str,
        properties: &PropertyPayload,
        blocks: &[Block],
    ) -> BridgeResult<()> {
        let mut pages = self.pages.lock().await;
        let page = pages
            .iter_mut()
            .find(|page| page.id == page_id)
            .ok_or_else(|| BridgeError::NotFound(page_id.to_string()))?;
        page.properties = properties.clone();
        page.blocks = blocks.to_vec();
        Ok(())
    }

    async fn delete_page(&self, page_id: &str) -> BridgeResult<()> {
        self.pages.lock().await.retain(|page| page.id != page_id);
        Ok(())
    }

    async fn retrieve_page(&self, page_id: &str) -> BridgeResult<TargetPage> {
        if page_id != "page-remote" {
            return self
                .pages
                .lock()
                .await
                .iter()
                .find(|page| page.id == page_id)
                .map(to_target_page)
                .ok_or_else(|| BridgeError::NotFound(page_id.to_string()));
        }

        let mut properties = BTreeMap::new();
        properties.insert("Front".to_string(), TargetValue::Title("Ownership".to_string()));
        properties.insert(
            "Back".to_string(),
            TargetValue::RichText("Each value has one owner".to_string()),
        );
        properties.insert("Anki ID".to_string(), TargetValue::Number(Some(1_700_000_000_001.0)));
        properties.insert("Note Type".to_string(), TargetValue::RichText("Basic".to_string()));
        properties.insert("First Field".to_string(), TargetValue::RichText("Front".to_string()));
        properties.insert("Deck".to_string(), TargetValue::RichText("Rust".to_string()));
        properties.insert(
            "Tags".to_string(),
            TargetValue::MultiSelect(vec!["lang".to_string(), "memory".to_string()]),
        );

        Ok(TargetPage {
            id: page_id.to_string(),
            properties,
            blocks: vec![Block::paragraph("Moves transfer ownership")],
            archived: false,
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn basic_note(id: i64, front: &str, back: &str) -> SourceNote {
    SourceNote {
        id: NoteId::new(id),
        model_name: "Basic".to_string(),
        fields: vec![
            SourceField::new("Front", front),
            SourceField::new("Back", back),
            SourceField::new(DEFAULT_BODY_FIELD, format!("Notes on {}", front)),
        ],
        tags: vec!["rust".to_string()],
        modified_at: 1_700_000_000,
        card: None,
        scheduler_today: None,
    }
}

fn three_notes() -> Vec<SourceNote> {
    vec![
        basic_note(1_700_000_000_001, "Ownership", "One owner per value"),
        basic_note(1_700_000_000_002, "Borrowing", "References without ownership"),
        basic_note(1_700_000_000_003, "Lifetimes", "Scopes of references"),
    ]
}

fn coordinator(
    source: Arc<FakeSource>,
    database: Arc<FakeDatabase>,
    event_bus: Arc<EventBus>,
) -> SyncCoordinator {
    SyncCoordinator::new(source, database, "db-1", event_bus)
        .with_clock(Arc::new(FixedClock::at_unix(1_700_000_000)))
}

fn drain(receiver: &mut tokio::sync::broadcast::Receiver<CoreEvent>) -> Vec<CoreEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_first_run_creates_every_page() {
    let source = Arc::new(FakeSource::with_notes(three_notes()).await);
    let database = Arc::new(FakeDatabase::default());
    let coordinator = coordinator(source, database.clone(), Arc::new(EventBus::new(100)));

    let report = coordinator.run_sync(RunOptions::new("deck:Rust")).await.unwrap();

    assert_eq!(report.succeeded.len(), 3);
    assert!(report.failed.is_empty());
    assert_eq!(report.count(SyncAction::Create), 3);
    assert_eq!(database.page_count().await, 3);

    // Body field stays out of both the schema and the properties
    let schema = database.schema.lock().await;
    assert_eq!(schema.get("Front"), Some(&PropertyType::Text));
    assert_eq!(schema.get("Anki ID"), Some(&PropertyType::Number));
    assert!(!schema.contains_key(DEFAULT_BODY_FIELD));

    let pages = database.pages.lock().await;
    assert!(!pages[0].properties.contains_key(DEFAULT_BODY_FIELD));
    assert_eq!(pages[0].blocks, vec![Block::paragraph("Notes on Ownership")]);
}

#[tokio::test]
async fn test_keep_policy_rerun_skips_existing_pages() {
    let source = Arc::new(FakeSource::with_notes(three_notes()).await);
    let database = Arc::new(FakeDatabase::default());
    let coordinator = coordinator(source, database.clone(), Arc::new(EventBus::new(100)));

    coordinator.run_sync(RunOptions::new("deck:Rust")).await.unwrap();
    let report = coordinator.run_sync(RunOptions::new("deck:Rust")).await.unwrap();

    assert_eq!(report.count(SyncAction::Skip), 3);
    assert_eq!(database.page_count().await, 3);
    // The second schema pass has nothing to add
    assert_eq!(database.schema_updates.lock().await.len(), 1);
}

#[tokio::test]
async fn test_overwrite_policy_updates_in_place() {
    let source = Arc::new(FakeSource::with_notes(three_notes()).await);
    let database = Arc::new(FakeDatabase::default());
    let coordinator = coordinator(source.clone(), database.clone(), Arc::new(EventBus::new(100)));

    coordinator.run_sync(RunOptions::new("deck:Rust")).await.unwrap();

    source
        .notes
        .lock()
        .await
        .insert(
            NoteId::new(1_700_000_000_001),
            basic_note(1_700_000_000_001, "Ownership", "Exactly one owner"),
        );

    let report = coordinator
        .run_sync(RunOptions::new("deck:Rust").with_duplicate_policy(DuplicatePolicy::Overwrite))
        .await
        .unwrap();

    assert_eq!(report.count(SyncAction::Update), 3);
    assert_eq!(database.page_count().await, 3);

    let pages = database.pages.lock().await;
    assert_eq!(
        pages[0].properties.get("Back"),
        Some(&PropertyValue::Text("Exactly one owner".to_string()))
    );
}

#[tokio::test]
async fn test_copy_policy_never_queries() {
    let source = Arc::new(FakeSource::with_notes(three_notes()).await);
    let database = Arc::new(FakeDatabase::default());
    let coordinator = coordinator(source, database.clone(), Arc::new(EventBus::new(100)));

    let options = RunOptions::new("deck:Rust").with_duplicate_policy(DuplicatePolicy::Copy);
    coordinator.run_sync(options.clone()).await.unwrap();
    let report = coordinator.run_sync(options).await.unwrap();

    assert_eq!(report.count(SyncAction::Create), 3);
    assert_eq!(database.queries.load(Ordering::SeqCst), 0);
    assert_eq!(database.page_count().await, 6);
}

#[tokio::test]
async fn test_bad_records_do_not_stop_the_batch() {
    let mut notes = three_notes();
    notes.push(basic_note(1_700_000_000_004, "Traits", "Shared behavior"));
    let source = Arc::new(FakeSource::with_notes(notes).await);
    source.mark_unreadable(1_700_000_000_002).await;

    let database = Arc::new(FakeDatabase {
        reject_create_for: vec!["Lifetimes".to_string()],
        ..FakeDatabase::default()
    });
    let coordinator = coordinator(source, database.clone(), Arc::new(EventBus::new(100)));

    let report = coordinator
        .run_sync(RunOptions::new("deck:Rust").with_max_concurrent_writes(4))
        .await
        .unwrap();

    assert_eq!(report.succeeded.len(), 2);
    assert_eq!(report.failed.len(), 2);
    assert_eq!(database.page_count().await, 2);

    let failed: Vec<i64> = report.failed.iter().map(|o| o.identifier.as_i64()).collect();
    assert_eq!(failed, vec![1_700_000_000_002, 1_700_000_000_003]);
    assert!(report.summary().contains("1700000000002"));
}

#[tokio::test]
async fn test_schema_read_failure_writes_nothing() {
    let source = Arc::new(FakeSource::with_notes(three_notes()).await);
    let database = Arc::new(FakeDatabase {
        fail_schema_fetch: true,
        ..FakeDatabase::default()
    });
    let coordinator = coordinator(source, database.clone(), Arc::new(EventBus::new(100)));

    let report = coordinator.run_sync(RunOptions::new("deck:Rust")).await.unwrap();

    assert!(report.succeeded.is_empty());
    assert_eq!(report.failed.len(), 3);
    assert_eq!(database.creates.load(Ordering::SeqCst), 0);
    assert_eq!(database.queries.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_schema_update_failure_is_a_warning() {
    let source = Arc::new(FakeSource::with_notes(three_notes()).await);
    let database = Arc::new(FakeDatabase {
        fail_schema_update: true,
        ..FakeDatabase::default()
    });
    let event_bus = Arc::new(EventBus::new(100));
    let mut events = event_bus.subscribe();
    let coordinator = coordinator(source, database.clone(), event_bus);

    let report = coordinator.run_sync(RunOptions::new("deck:Rust")).await.unwrap();

    assert!(report.schema_warning.is_some());
    assert_eq!(report.succeeded.len(), 3);
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, CoreEvent::Schema(SchemaEvent::UpdateFailed { .. }))));
}

#[tokio::test]
async fn test_source_query_failure_is_an_error() {
    let source = Arc::new(FakeSource {
        fail_query: true,
        ..FakeSource::default()
    });
    let database = Arc::new(FakeDatabase::default());
    let coordinator = coordinator(source, database, Arc::new(EventBus::new(100)));

    let result = coordinator.run_sync(RunOptions::new("deck:Rust")).await;

    assert!(matches!(result, Err(SyncError::Source(_))));
    assert!(!coordinator.is_sync_active().await);
}

#[tokio::test]
async fn test_delete_only_written_notes() {
    let source = Arc::new(FakeSource::with_notes(three_notes()).await);
    let database = Arc::new(FakeDatabase::default());
    let coordinator = coordinator(source.clone(), database.clone(), Arc::new(EventBus::new(100)));

    // Ownership already has a page and is skipped under keep
    coordinator
        .run_sync(RunOptions::new("deck:Rust"))
        .await
        .unwrap();
    source
        .notes
        .lock()
        .await
        .insert(
            NoteId::new(1_700_000_000_009),
            basic_note(1_700_000_000_009, "Closures", "Capture their environment"),
        );

    let report = coordinator
        .run_sync(RunOptions::new("deck:Rust").with_delete_source(true))
        .await
        .unwrap();

    assert_eq!(report.count(SyncAction::Skip), 3);
    assert_eq!(report.deleted, vec![NoteId::new(1_700_000_000_009)]);
    assert_eq!(*source.deleted.lock().await, vec![NoteId::new(1_700_000_000_009)]);
    assert_eq!(source.persist_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_deletion_failure_keeps_writes() {
    let mut source = FakeSource::with_notes(three_notes()).await;
    source.fail_delete = true;
    let source = Arc::new(source);
    let database = Arc::new(FakeDatabase::default());
    let coordinator = coordinator(source.clone(), database.clone(), Arc::new(EventBus::new(100)));

    let report = coordinator
        .run_sync(RunOptions::new("deck:Rust").with_delete_source(true))
        .await
        .unwrap();

    assert_eq!(report.succeeded.len(), 3);
    assert!(report.deleted.is_empty());
    assert!(report.deletion_error.is_some());
    assert_eq!(database.page_count().await, 3);
    assert_eq!(source.persist_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancel_stops_before_next_record() {
    let mut notes = three_notes();
    notes.push(basic_note(1_700_000_000_004, "Traits", "Shared behavior"));
    let source = Arc::new(FakeSource::with_notes(notes).await);

    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let database = Arc::new(FakeDatabase {
        gate: Some(CreateGate {
            at: 2,
            entered: entered.clone(),
            release: release.clone(),
        }),
        ..FakeDatabase::default()
    });
    let coordinator = coordinator(source.clone(), database.clone(), Arc::new(EventBus::new(100)));

    let handle = coordinator
        .start_sync(RunOptions::new("deck:Rust").with_delete_source(true))
        .await
        .unwrap();

    entered.notified().await;
    handle.cancel();
    release.notify_one();

    let report = handle.wait().await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.succeeded.len(), 2);
    assert_eq!(report.unprocessed, 2);
    assert_eq!(database.page_count().await, 2);
    // Cancelled runs never delete
    assert!(source.deleted.lock().await.is_empty());
    assert!(!coordinator.is_sync_active().await);
}

#[tokio::test]
async fn test_second_run_is_rejected_while_active() {
    let source = Arc::new(FakeSource::with_notes(three_notes()).await);

    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let database = Arc::new(FakeDatabase {
        gate: Some(CreateGate {
            at: 1,
            entered: entered.clone(),
            release: release.clone(),
        }),
        ..FakeDatabase::default()
    });
    let coordinator = coordinator(source, database, Arc::new(EventBus::new(100)));

    let handle = coordinator.start_sync(RunOptions::new("deck:Rust")).await.unwrap();
    entered.notified().await;

    assert_eq!(coordinator.active_run_id().await, Some(handle.run_id()));
    let second = coordinator.run_sync(RunOptions::new("deck:Rust")).await;
    assert!(matches!(second, Err(SyncError::SyncInProgress { .. })));

    release.notify_one();
    let report = handle.wait().await.unwrap();
    assert_eq!(report.succeeded.len(), 3);

    // The guard is released with the run
    assert!(coordinator.run_sync(RunOptions::new("deck:Rust")).await.is_ok());
}

#[tokio::test]
async fn test_dropped_run_releases_the_coordinator() {
    let source = Arc::new(FakeSource::with_notes(three_notes()).await);
    let database = Arc::new(FakeDatabase {
        gate: Some(CreateGate {
            at: 1,
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }),
        ..FakeDatabase::default()
    });
    let coordinator = coordinator(source, database.clone(), Arc::new(EventBus::new(100)));

    // The first create never returns, so the caller gives up on the run
    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        coordinator.run_sync(RunOptions::new("deck:Rust")),
    )
    .await;
    assert!(abandoned.is_err());
    assert!(!coordinator.is_sync_active().await);

    let report = coordinator.run_sync(RunOptions::new("deck:Rust")).await.unwrap();
    assert_eq!(report.succeeded.len(), 3);
    assert_eq!(database.page_count().await, 3);
}

#[tokio::test]
async fn test_concurrent_writes_report_in_candidate_order() {
    let mut notes = three_notes();
    notes.push(basic_note(1_700_000_000_004, "Traits", "Shared behavior"));
    let source = Arc::new(FakeSource::with_notes(notes).await);
    let database = Arc::new(FakeDatabase {
        slow_first_create: Some(Duration::from_millis(50)),
        ..FakeDatabase::default()
    });
    let coordinator = coordinator(source, database.clone(), Arc::new(EventBus::new(100)));

    let report = coordinator
        .run_sync(RunOptions::new("deck:Rust").with_max_concurrent_writes(4))
        .await
        .unwrap();

    let ids: Vec<i64> = report.succeeded.iter().map(|o| o.identifier.as_i64()).collect();
    assert_eq!(
        ids,
        vec![
            1_700_000_000_001,
            1_700_000_000_002,
            1_700_000_000_003,
            1_700_000_000_004
        ]
    );
    // The first candidate's page was stored last
    assert_eq!(report.succeeded[0].target_id.as_deref(), Some("page-4"));
    assert_eq!(database.page_count().await, 4);
}

#[tokio::test]
async fn test_cancel_unknown_run_is_not_found() {
    let source = Arc::new(FakeSource::default());
    let database = Arc::new(FakeDatabase::default());
    let coordinator = coordinator(source, database, Arc::new(EventBus::new(100)));

    let result = coordinator.cancel_sync(core_sync::SyncRunId::new()).await;
    assert!(matches!(result, Err(SyncError::RunNotFound { .. })));
}

#[tokio::test]
async fn test_event_sequence() {
    let source = Arc::new(FakeSource::with_notes(three_notes()).await);
    let database = Arc::new(FakeDatabase::default());
    let event_bus = Arc::new(EventBus::new(100));
    let mut receiver = event_bus.subscribe();
    let coordinator = coordinator(source, database, event_bus);

    coordinator.run_sync(RunOptions::new("deck:Rust")).await.unwrap();
    let events = drain(&mut receiver);

    assert!(matches!(
        events.first(),
        Some(CoreEvent::Sync(SyncEvent::Started { .. }))
    ));
    assert!(matches!(
        events.last(),
        Some(CoreEvent::Sync(SyncEvent::Completed { succeeded: 3, failed: 0, .. }))
    ));

    let phases: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            CoreEvent::Sync(SyncEvent::PhaseChanged { phase, .. }) => Some(phase.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            "reconcile_schema",
            "normalize",
            "resolve_and_write",
            "conditional_delete"
        ]
    );

    let progress = events
        .iter()
        .filter(|e| matches!(e, CoreEvent::Sync(SyncEvent::Progress { .. })))
        .count();
    assert_eq!(progress, 3);
}

#[tokio::test]
async fn test_preview_pull_projects_page() {
    let source = Arc::new(FakeSource::default());
    let database = Arc::new(FakeDatabase::default());
    let coordinator = coordinator(source, database, Arc::new(EventBus::new(100)));

    let update = coordinator.preview_pull("page-remote", true).await.unwrap();

    assert_eq!(update.id, NoteId::new(1_700_000_000_001));
    assert_eq!(update.model_name, "Basic");
    assert_eq!(update.fields[0], SourceField::new("Front", "Ownership"));
    assert_eq!(update.deck_name.as_deref(), Some("Rust"));
    assert_eq!(update.tags, vec!["lang".to_string(), "memory".to_string()]);
    assert!(update
        .fields
        .iter()
        .any(|f| f.name == DEFAULT_BODY_FIELD && f.value.contains("Moves transfer ownership")));

    let without_body = coordinator.preview_pull("page-remote", false).await.unwrap();
    assert!(without_body.fields.iter().all(|f| f.name != DEFAULT_BODY_FIELD));

    assert!(matches!(
        coordinator.preview_pull("missing", true).await,
        Err(SyncError::Target(_))
    ));
}

// ============================================================================
// Pulls
// ============================================================================

/// Push three notes, then tag the given pages ready.
async fn pushed(ready: &[&str]) -> (Arc<FakeSource>, Arc<FakeDatabase>, SyncCoordinator) {
    let source = Arc::new(FakeSource::with_notes(three_notes()).await);
    let database = Arc::new(FakeDatabase::default());
    let coordinator = coordinator(source.clone(), database.clone(), Arc::new(EventBus::new(100)));

    coordinator.run_sync(RunOptions::new("deck:Rust")).await.unwrap();
    for page_id in ready {
        database.mark_ready(page_id).await;
    }
    (source, database, coordinator)
}

#[tokio::test]
async fn test_pull_creates_missing_notes_without_ready_tag() {
    let (source, database, coordinator) = pushed(&["page-1", "page-3"]).await;
    source.notes.lock().await.clear();

    let report = coordinator.run_pull(RunOptions::new("")).await.unwrap();

    assert_eq!(report.count(SyncAction::Create), 2);
    let pages: Vec<&str> = report.succeeded.iter().map(|o| o.page_id.as_str()).collect();
    assert_eq!(pages, vec!["page-1", "page-3"]);

    let created = source.created.lock().await;
    assert_eq!(created[0].model_name, "Basic");
    assert_eq!(created[0].fields[0], SourceField::new("Front", "Ownership"));
    assert_eq!(created[0].tags, vec!["rust".to_string()]);
    assert_eq!(created[1].fields[0], SourceField::new("Front", "Lifetimes"));

    assert!(report.archived.is_empty());
    assert_eq!(database.page_count().await, 3);
    assert_eq!(source.persist_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_pull_keep_skips_existing_notes() {
    let (source, _database, coordinator) = pushed(&["page-1"]).await;

    let report = coordinator.run_pull(RunOptions::new("")).await.unwrap();

    assert_eq!(report.count(SyncAction::Skip), 1);
    assert_eq!(report.succeeded[0].note_ids, vec![NoteId::new(1_700_000_000_001)]);
    assert!(source.created.lock().await.is_empty());
    assert!(source.updated.lock().await.is_empty());
    assert_eq!(source.persist_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_pull_overwrite_updates_matching_note() {
    let (source, database, coordinator) = pushed(&["page-1"]).await;
    database
        .set_property("page-1", "Back", PropertyValue::Text("Edited in Notion".to_string()))
        .await;

    let report = coordinator
        .run_pull(RunOptions::new("").with_duplicate_policy(DuplicatePolicy::Overwrite))
        .await
        .unwrap();

    assert_eq!(report.count(SyncAction::Update), 1);
    let notes = source.notes.lock().await;
    let note = &notes[&NoteId::new(1_700_000_000_001)];
    assert_eq!(note.field("Back"), Some("Edited in Notion"));
    assert_eq!(note.tags, vec!["rust".to_string()]);
}

#[tokio::test]
async fn test_pull_archives_only_imported_pages() {
    let (source, database, coordinator) = pushed(&["page-1", "page-2"]).await;
    // Borrowing still exists in the source and is skipped under keep
    source
        .notes
        .lock()
        .await
        .remove(&NoteId::new(1_700_000_000_001));

    let report = coordinator
        .run_pull(RunOptions::new("").with_delete_source(true))
        .await
        .unwrap();

    assert_eq!(report.count(SyncAction::Create), 1);
    assert_eq!(report.count(SyncAction::Skip), 1);
    assert_eq!(report.archived, vec!["page-1".to_string()]);
    assert_eq!(database.page_count().await, 2);
}

#[tokio::test]
async fn test_pull_page_without_note_id_fails_closed() {
    let (source, database, coordinator) = pushed(&["page-1", "page-2"]).await;
    source.notes.lock().await.clear();
    database
        .pages
        .lock()
        .await
        .iter_mut()
        .filter(|page| page.id == "page-1")
        .for_each(|page| {
            page.properties.remove("Anki ID");
        });

    let report = coordinator.run_pull(RunOptions::new("")).await.unwrap();

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].page_id, "page-1");
    assert_eq!(report.count(SyncAction::Create), 1);
    assert!(!coordinator.is_sync_active().await);
}
