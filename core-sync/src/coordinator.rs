//! # Sync Coordinator
//!
//! Drives one sync run from the source store to the target page database.
//!
//! ## Overview
//!
//! The `SyncCoordinator` ties the pipeline together:
//! - Collects candidate note identifiers from the [`NoteSource`]
//! - Reads and normalizes every candidate via [`RecordNormalizer`]
//! - Reconciles the target schema once per run via [`PropertySchema`]
//! - Resolves duplicates via [`DuplicateResolver`] and creates, updates or
//!   skips pages
//! - Deletes source notes whose page was written, when asked to
//! - Emits progress events via `EventBus` and returns a [`SyncReport`]
//!
//! ## Workflow
//!
//! 1. `CollectIds`: run the source query
//! 2. `ReconcileSchema`: read the target schema (fatal on failure), read every
//!    candidate, add or retype missing properties
//! 3. `Normalize`: build the property payload and body blocks per record
//! 4. `ResolveAndWrite`: look up duplicates and write, one record at a time
//!    or with bounded concurrency
//! 5. `ConditionalDelete`: delete written source notes and flush the source
//! 6. `Report`: emit completion and return the report
//!
//! Only a failed schema read (or a failed source query) ends a run early.
//! Every other error is recorded against its record and the batch goes on.
//! Writes are never retried here.
//!
//! ## Pulls
//!
//! [`SyncCoordinator::run_pull`] goes the other way. Pages tagged
//! [`READY_TAG`] are projected back into notes (without the tag) and written
//! to the source under the same duplicate policy, one page at a time. With
//! `delete_source_on_success` the imported pages are archived afterwards.
//! Pushes and pulls share the single run slot.
//!
//! Edits made on both sides between two runs are not reconciled: whichever
//! direction runs last wins.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::SyncCoordinator;
//! use core_runtime::config::RunOptions;
//!
//! let coordinator = SyncCoordinator::new(source, database, database_id, event_bus);
//!
//! // Inline
//! let report = coordinator.run_sync(RunOptions::new("deck:Rust")).await?;
//! println!("{}", report.summary());
//!
//! // In the background
//! let handle = coordinator.start_sync(RunOptions::new("deck:Rust")).await?;
//! handle.cancel();
//! let report = handle.wait().await?;
//!
//! // Back from the target
//! let pulled = coordinator.run_pull(RunOptions::new("")).await?;
//! ```

use crate::{
    duplicate_resolver::{DuplicateResolver, Resolution, SourceResolution},
    normalizer::{PropertiesPayload, RecordNormalizer},
    record::{names, CanonicalRecord, PullOutcome, PullReport, SyncAction, SyncOutcome, SyncReport},
    run::{RunPhase, SyncRun, SyncRunId},
    schema::PropertySchema,
    Result, SyncError,
};
use bridge_traits::{
    source::{NoteId, NoteSource, SourceUpdate},
    target::{Block, PageDatabase, PropertyTypeMap, QueryFilter},
    time::{Clock, SystemClock},
};
use core_runtime::config::{RunOptions, DEFAULT_BODY_FIELD, MAX_CONCURRENT_WRITES};
use core_runtime::events::{CoreEvent, EventBus, SchemaEvent, SyncEvent};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Tag marking a page as ready to move back into the source
pub const READY_TAG: &str = "readyMove";

/// The run currently holding the coordinator
#[derive(Clone)]
struct ActiveRun {
    run_id: SyncRunId,
    cancellation_token: CancellationToken,
}

type RunSlot = Arc<Mutex<Option<ActiveRun>>>;

fn lock_slot(slot: &RunSlot) -> MutexGuard<'_, Option<ActiveRun>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Frees the coordinator when dropped, including when the run future is
/// dropped mid-flight or its task panics.
struct RunGuard {
    slot: RunSlot,
    run_id: SyncRunId,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut active_run = lock_slot(&self.slot);
        if active_run.as_ref().is_some_and(|a| a.run_id == self.run_id) {
            *active_run = None;
        }
    }
}

/// A candidate after the schema pass
struct Candidate {
    id: NoteId,
    record: Result<CanonicalRecord>,
}

/// A candidate ready for the write phase
struct PreparedWrite {
    id: NoteId,
    prepared: Result<(CanonicalRecord, PropertiesPayload, Vec<Block>)>,
}

/// Handle to a run started with [`SyncCoordinator::start_sync`]
pub struct SyncRunHandle {
    run_id: SyncRunId,
    cancellation_token: CancellationToken,
    join: JoinHandle<Result<SyncReport>>,
}

impl SyncRunHandle {
    pub fn run_id(&self) -> SyncRunId {
        self.run_id
    }

    /// Ask the run to stop before its next record.
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the run's report.
    pub async fn wait(self) -> Result<SyncReport> {
        self.join
            .await
            .map_err(|e| SyncError::Task(e.to_string()))?
    }
}

/// Sync coordinator for orchestrating sync runs
pub struct SyncCoordinator {
    /// Local note store
    source: Arc<dyn NoteSource>,

    /// Remote page database
    database: Arc<dyn PageDatabase>,

    /// Target database id (`8-4-4-4-12`)
    database_id: String,

    schema: PropertySchema,

    normalizer: Arc<RecordNormalizer>,

    /// Event bus for emitting sync events
    event_bus: Arc<EventBus>,

    clock: Arc<dyn Clock>,

    /// At most one run at a time
    active_run: RunSlot,
}

impl SyncCoordinator {
    /// Create a coordinator with the default body field and the system clock.
    pub fn new(
        source: Arc<dyn NoteSource>,
        database: Arc<dyn PageDatabase>,
        database_id: impl Into<String>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            source,
            database,
            database_id: database_id.into(),
            schema: PropertySchema::new(DEFAULT_BODY_FIELD),
            normalizer: Arc::new(RecordNormalizer::new(DEFAULT_BODY_FIELD, clock.clone())),
            event_bus,
            clock,
            active_run: Arc::new(Mutex::new(None)),
        }
    }

    /// Use another note field as the page body.
    pub fn with_body_field(mut self, body_field: impl Into<String>) -> Self {
        let body_field = body_field.into();
        self.schema = PropertySchema::new(body_field.clone());
        self.normalizer = Arc::new(RecordNormalizer::new(body_field, self.clock.clone()));
        self
    }

    /// Use another time source (due dates and run durations).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.normalizer = Arc::new(RecordNormalizer::new(
            self.schema.body_field().to_string(),
            clock.clone(),
        ));
        self.clock = clock;
        self
    }

    pub fn database_id(&self) -> &str {
        &self.database_id
    }

    /// Run a sync to completion on the current task.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another run is in progress
    /// - The source query fails
    ///
    /// A failed schema read is not an error: the report lists every
    /// candidate as failed.
    #[instrument(skip(self, options), fields(query = %options.source_query))]
    pub async fn run_sync(&self, options: RunOptions) -> Result<SyncReport> {
        let (run, cancellation_token, _guard) = self.begin_run()?;
        self.execute(run, &options, cancellation_token).await
    }

    /// Start a sync on a background task.
    ///
    /// The in-progress check happens before this returns, so a second call
    /// fails immediately with `SyncInProgress`.
    #[instrument(skip(self, options), fields(query = %options.source_query))]
    pub async fn start_sync(&self, options: RunOptions) -> Result<SyncRunHandle> {
        let (run, cancellation_token, guard) = self.begin_run()?;
        let run_id = run.id;

        let coordinator = self.clone_for_task();
        let task_token = cancellation_token.clone();
        let join = tokio::spawn(async move {
            let _guard = guard;
            let result = coordinator.execute(run, &options, task_token).await;

            if let Err(e) = &result {
                error!("Sync run {} failed: {}", run_id, e);
            }
            result
        });

        info!("Started sync run {}", run_id);

        Ok(SyncRunHandle {
            run_id,
            cancellation_token,
            join,
        })
    }

    /// Cancel the active run.
    ///
    /// # Errors
    ///
    /// Returns `RunNotFound` if `run_id` is not the active run
    pub async fn cancel_sync(&self, run_id: SyncRunId) -> Result<()> {
        let active_run = lock_slot(&self.active_run);
        match active_run.as_ref() {
            Some(active) if active.run_id == run_id => {
                active.cancellation_token.cancel();
                info!("Cancellation requested for sync run {}", run_id);
                Ok(())
            }
            _ => Err(SyncError::RunNotFound {
                run_id: run_id.to_string(),
            }),
        }
    }

    pub async fn is_sync_active(&self) -> bool {
        lock_slot(&self.active_run).is_some()
    }

    pub async fn active_run_id(&self) -> Option<SyncRunId> {
        lock_slot(&self.active_run).as_ref().map(|a| a.run_id)
    }

    /// Project a page back into a source-shaped update without applying it.
    ///
    /// # Errors
    ///
    /// Returns an error if the page cannot be read or fails projection
    #[instrument(skip(self))]
    pub async fn preview_pull(&self, page_id: &str, retain_body: bool) -> Result<SourceUpdate> {
        let page = self
            .database
            .retrieve_page(page_id)
            .await
            .map_err(|e| SyncError::Target(e.to_string()))?;

        let record = self.normalizer.from_target(&page)?;
        Ok(self.normalizer.to_source_update(&record, retain_body))
    }

    /// Import every page tagged [`READY_TAG`] into the source.
    ///
    /// `source_query` is not used; the pages select themselves.
    ///
    /// # Errors
    ///
    /// Returns an error if another run is in progress or the page query
    /// fails. Per-page failures are recorded in the report.
    #[instrument(skip(self, options), fields(policy = %options.duplicate_policy))]
    pub async fn run_pull(&self, options: RunOptions) -> Result<PullReport> {
        let (mut run, cancellation_token, _guard) = self.begin_run()?;
        let run_id = run.id.to_string();
        let filter = QueryFilter::contains(names::TAGS, READY_TAG);

        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::Started {
                run_id: run_id.clone(),
                query: format!("{} contains {}", names::TAGS, READY_TAG),
                duplicate_policy: options.duplicate_policy.to_string(),
            }))
            .ok();

        info!("Collecting pages tagged {}", READY_TAG);
        let pages = match self.database.query_database(&self.database_id, &filter).await {
            Ok(pages) => pages,
            Err(e) => {
                let err = SyncError::Target(e.to_string());
                error!("Failed to query pages: {}", err);
                run.finish(self.clock.unix_timestamp())?;
                self.emit_failed(&run_id, &err);
                return Err(err);
            }
        };
        info!("Found {} pages to pull", pages.len());

        let resolver = DuplicateResolver::new(options.duplicate_policy);
        let total = pages.len() as u64;
        let mut report = PullReport::new(&run_id);

        for (index, page) in pages.iter().enumerate() {
            if cancellation_token.is_cancelled() {
                report.cancelled = true;
                report.unprocessed = pages.len() - index;
                break;
            }

            let outcome = self
                .import_page(&resolver, &page.id, options.retain_body_on_reverse_sync)
                .await;
            report.record(outcome);

            let processed = index as u64 + 1;
            run.update_progress(processed, total);
            self.event_bus
                .emit(CoreEvent::Sync(SyncEvent::Progress {
                    run_id: run_id.clone(),
                    processed,
                    total,
                    percent: run.progress.percent,
                }))
                .ok();
        }

        if report.cancelled {
            run.finish(self.clock.unix_timestamp())?;
            report.duration_secs = run.duration_secs().unwrap_or(0);
            warn!(
                "Pull run {} cancelled with {} pages unprocessed, nothing archived",
                run_id, report.unprocessed
            );
            self.event_bus
                .emit(CoreEvent::Sync(SyncEvent::Cancelled {
                    run_id: run_id.clone(),
                    processed: report.total() as u64,
                    unprocessed: report.unprocessed as u64,
                }))
                .ok();
            return Ok(report);
        }

        let imported = report.imported_pages();
        if !imported.is_empty() {
            if let Err(e) = self.source.persist().await {
                let err = SyncError::source(e);
                error!("Flush after pull failed, keeping pages: {}", err);
                report.archive_error = Some(format!("flush failed: {}", err));
            } else if options.delete_source_on_success {
                self.archive_pages(&imported, &mut report).await;
            }
        }

        run.finish(self.clock.unix_timestamp())?;
        report.duration_secs = run.duration_secs().unwrap_or(0);

        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::Completed {
                run_id: run_id.clone(),
                succeeded: report.succeeded.len() as u64,
                failed: report.failed.len() as u64,
                deleted: report.archived.len() as u64,
                duration_secs: report.duration_secs,
            }))
            .ok();

        info!(
            "Pull run {} completed: {} succeeded, {} failed, {} archived",
            run_id,
            report.succeeded.len(),
            report.failed.len(),
            report.archived.len()
        );
        Ok(report)
    }

    // ========================================================================
    // Run lifecycle
    // ========================================================================

    /// Claim the coordinator. The slot is released when the guard drops.
    fn begin_run(&self) -> Result<(SyncRun, CancellationToken, RunGuard)> {
        let mut active_run = lock_slot(&self.active_run);
        if let Some(active) = active_run.as_ref() {
            return Err(SyncError::SyncInProgress {
                run_id: active.run_id.to_string(),
            });
        }

        let run = SyncRun::new(self.clock.unix_timestamp());
        let cancellation_token = CancellationToken::new();
        *active_run = Some(ActiveRun {
            run_id: run.id,
            cancellation_token: cancellation_token.clone(),
        });

        let guard = RunGuard {
            slot: Arc::clone(&self.active_run),
            run_id: run.id,
        };
        Ok((run, cancellation_token, guard))
    }

    /// Clone for background task (avoids Arc<Arc<...>>)
    fn clone_for_task(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            database: Arc::clone(&self.database),
            database_id: self.database_id.clone(),
            schema: self.schema.clone(),
            normalizer: Arc::clone(&self.normalizer),
            event_bus: Arc::clone(&self.event_bus),
            clock: Arc::clone(&self.clock),
            active_run: Arc::clone(&self.active_run),
        }
    }

    fn enter_phase(&self, run: &mut SyncRun, phase: RunPhase) -> Result<()> {
        run.advance(phase)?;
        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::PhaseChanged {
                run_id: run.id.to_string(),
                phase: phase.to_string(),
            }))
            .ok();
        Ok(())
    }

    // ========================================================================
    // Pipeline
    // ========================================================================

    #[instrument(skip(self, run, options, cancellation_token), fields(run_id = %run.id))]
    async fn execute(
        &self,
        mut run: SyncRun,
        options: &RunOptions,
        cancellation_token: CancellationToken,
    ) -> Result<SyncReport> {
        let run_id = run.id.to_string();

        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::Started {
                run_id: run_id.clone(),
                query: options.source_query.clone(),
                duplicate_policy: options.duplicate_policy.to_string(),
            }))
            .ok();

        // Phase 1: Collect identifiers
        info!("Phase 1: Collecting candidates for {:?}", options.source_query);
        let ids = match self.source.find_identifiers(&options.source_query).await {
            Ok(ids) => ids,
            Err(e) => {
                let err = SyncError::source(e);
                error!("Failed to query source: {}", err);
                run.finish(self.clock.unix_timestamp())?;
                self.emit_failed(&run_id, &err);
                return Err(err);
            }
        };
        info!("Found {} candidates", ids.len());

        if cancellation_token.is_cancelled() {
            return self.finish_cancelled(run, SyncReport::new(&run_id), ids.len());
        }

        // Phase 2: Reconcile schema
        info!("Phase 2: Reconciling database schema");
        self.enter_phase(&mut run, RunPhase::ReconcileSchema)?;

        let current = match self.database.get_database_schema(&self.database_id).await {
            Ok(current) => current,
            Err(e) => {
                let err = SyncError::SchemaRetrieval(e.to_string());
                error!("Aborting run before any write: {}", err);
                let mut report = SyncReport::all_failed(&run_id, &ids, &err.to_string());
                run.finish(self.clock.unix_timestamp())?;
                report.duration_secs = run.duration_secs().unwrap_or(0);
                self.emit_failed(&run_id, &err);
                return Ok(report);
            }
        };

        let mut candidates = Vec::with_capacity(ids.len());
        for (index, id) in ids.iter().enumerate() {
            if cancellation_token.is_cancelled() {
                return self.finish_cancelled(run, SyncReport::new(&run_id), ids.len());
            }
            debug!("Reading candidate {} ({}/{})", id, index + 1, ids.len());
            candidates.push(Candidate {
                id: *id,
                record: self.read_candidate(*id).await,
            });
        }

        let records: Vec<CanonicalRecord> = candidates
            .iter()
            .filter_map(|c| c.record.as_ref().ok().cloned())
            .collect();

        let mut report = SyncReport::new(&run_id);
        report.schema_warning = self.reconcile_schema(&current, &records).await;

        // Phase 3: Normalize
        info!("Phase 3: Preparing {} records", candidates.len());
        self.enter_phase(&mut run, RunPhase::Normalize)?;

        let prepared: Vec<PreparedWrite> = candidates
            .into_iter()
            .map(|candidate| PreparedWrite {
                id: candidate.id,
                prepared: candidate.record.map(|record| {
                    let payload = self.normalizer.to_properties_payload(&record);
                    let blocks = self.normalizer.body_blocks(&record);
                    (record, payload, blocks)
                }),
            })
            .collect();

        // Phase 4: Resolve duplicates and write
        info!(
            "Phase 4: Writing {} records (policy {})",
            prepared.len(),
            options.duplicate_policy
        );
        self.enter_phase(&mut run, RunPhase::ResolveAndWrite)?;

        let total = prepared.len() as u64;
        let concurrency = options.max_concurrent_writes.clamp(1, MAX_CONCURRENT_WRITES);
        let resolver = DuplicateResolver::new(options.duplicate_policy);

        let mut slots: Vec<Option<SyncOutcome>> = vec![None; prepared.len()];
        let mut processed = 0u64;
        {
            let token = &cancellation_token;
            let resolver = &resolver;
            let mut writes = stream::iter(prepared.into_iter().enumerate())
                .map(|(index, item)| async move {
                    if token.is_cancelled() {
                        return (index, None);
                    }
                    (index, Some(self.write_record(resolver, item).await))
                })
                .buffer_unordered(concurrency);

            while let Some((index, outcome)) = writes.next().await {
                let Some(outcome) = outcome else {
                    continue;
                };
                processed += 1;
                run.update_progress(processed, total);
                self.event_bus
                    .emit(CoreEvent::Sync(SyncEvent::Progress {
                        run_id: run_id.clone(),
                        processed,
                        total,
                        percent: run.progress.percent,
                    }))
                    .ok();
                slots[index] = Some(outcome);
            }
        }

        // Merge by candidate position, not completion order
        let mut unprocessed = 0;
        for slot in slots {
            match slot {
                Some(outcome) => report.record(outcome),
                None => unprocessed += 1,
            }
        }

        if cancellation_token.is_cancelled() {
            warn!("Run cancelled, skipping source deletion");
            return self.finish_cancelled(run, report, unprocessed);
        }

        // Phase 5: Conditional delete
        self.enter_phase(&mut run, RunPhase::ConditionalDelete)?;
        if options.delete_source_on_success {
            info!("Phase 5: Deleting written source notes");
            self.delete_written(&mut report).await;
        } else {
            debug!("Phase 5: Source deletion disabled");
        }

        // Phase 6: Report
        info!("Phase 6: Reporting");
        run.finish(self.clock.unix_timestamp())?;
        report.duration_secs = run.duration_secs().unwrap_or(0);

        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::Completed {
                run_id: run_id.clone(),
                succeeded: report.succeeded.len() as u64,
                failed: report.failed.len() as u64,
                deleted: report.deleted.len() as u64,
                duration_secs: report.duration_secs,
            }))
            .ok();

        info!(
            "Sync run {} completed: {} succeeded, {} failed, {} deleted",
            run_id,
            report.succeeded.len(),
            report.failed.len(),
            report.deleted.len()
        );

        Ok(report)
    }

    async fn read_candidate(&self, id: NoteId) -> Result<CanonicalRecord> {
        let note = self
            .source
            .get_record(id)
            .await
            .map_err(|e| SyncError::RecordNormalization {
                id: id.to_string(),
                reason: format!("could not read note: {}", e),
            })?;

        self.normalizer.from_source(&note).inspect_err(|e| {
            warn!("Failed to normalize note {}: {}", id, e);
        })
    }

    /// Add or retype missing properties. Returns a warning when the update
    /// was rejected; the run continues with the old schema.
    async fn reconcile_schema(
        &self,
        current: &PropertyTypeMap,
        records: &[CanonicalRecord],
    ) -> Option<String> {
        let required = self.schema.compute_required_types(records);
        let diff = self.schema.diff(current, &required);

        if diff.is_empty() {
            debug!("Database schema already up to date");
            return None;
        }

        let properties = diff.describe();
        info!("Updating database schema: {:?}", properties);

        let request = self.schema.to_update_request(&diff);
        match self
            .database
            .update_database_schema(&self.database_id, &request)
            .await
        {
            Ok(()) => {
                self.event_bus
                    .emit(CoreEvent::Schema(SchemaEvent::Updated {
                        database_id: self.database_id.clone(),
                        properties,
                    }))
                    .ok();
                None
            }
            Err(e) => {
                let err = SyncError::SchemaUpdate(e.to_string());
                warn!("{}; writes may hit mismatched property types", err);
                self.event_bus
                    .emit(CoreEvent::Schema(SchemaEvent::UpdateFailed {
                        database_id: self.database_id.clone(),
                        properties,
                        message: e.to_string(),
                    }))
                    .ok();
                Some(err.to_string())
            }
        }
    }

    /// Resolve and write one record. Never fails: errors become the
    /// record's outcome.
    async fn write_record(&self, resolver: &DuplicateResolver, item: PreparedWrite) -> SyncOutcome {
        let (record, payload, blocks) = match item.prepared {
            Ok(prepared) => prepared,
            Err(e) => return SyncOutcome::failed(item.id, e),
        };

        match self.apply(resolver, &record, &payload, &blocks).await {
            Ok(outcome) => {
                debug!("Note {} -> {}", item.id, outcome.action);
                outcome.with_warnings(payload.warnings)
            }
            Err(e) => {
                error!("Failed to sync note {}: {}", item.id, e);
                SyncOutcome::failed(item.id, e)
            }
        }
    }

    async fn apply(
        &self,
        resolver: &DuplicateResolver,
        record: &CanonicalRecord,
        payload: &PropertiesPayload,
        blocks: &[Block],
    ) -> Result<SyncOutcome> {
        let id = record.identifier();

        match resolver
            .resolve(self.database.as_ref(), &self.database_id, record)
            .await?
        {
            Resolution::Create => {
                let page_id = self
                    .database
                    .create_page(&self.database_id, &payload.properties, blocks)
                    .await
                    .map_err(SyncError::write)?;
                Ok(SyncOutcome::created(id, page_id))
            }
            Resolution::Update { target_id } => {
                self.database
                    .update_page(&target_id, &payload.properties, blocks)
                    .await
                    .map_err(SyncError::write)?;
                Ok(SyncOutcome::updated(id, target_id))
            }
            Resolution::Skip { target_id } => Ok(SyncOutcome::skipped(id, Some(target_id))),
        }
    }

    /// Delete source notes whose page was created or updated, then flush.
    /// Failures are reported; completed writes stay.
    async fn delete_written(&self, report: &mut SyncReport) {
        let mut ids = report.written_ids();
        let mut seen = HashSet::new();
        ids.retain(|id| seen.insert(*id));

        if ids.is_empty() {
            debug!("No written records to delete");
            return;
        }

        if let Err(e) = self.source.delete_records(&ids).await {
            let err = SyncError::Deletion(e.to_string());
            error!("{}", err);
            report.deletion_error = Some(err.to_string());
            return;
        }
        info!("Deleted {} source notes", ids.len());
        report.deleted = ids;

        if let Err(e) = self.source.persist().await {
            let err = SyncError::Deletion(format!("flush failed: {}", e));
            error!("{}", err);
            report.deletion_error = Some(err.to_string());
        }
    }

    /// Project, resolve and write one page. Never fails: errors become the
    /// page's outcome.
    async fn import_page(
        &self,
        resolver: &DuplicateResolver,
        page_id: &str,
        retain_body: bool,
    ) -> PullOutcome {
        match self.pull_page(resolver, page_id, retain_body).await {
            Ok(outcome) => {
                debug!("Page {} -> {}", page_id, outcome.action);
                outcome
            }
            Err(e) => {
                error!("Failed to pull page {}: {}", page_id, e);
                PullOutcome::failed(page_id, e)
            }
        }
    }

    async fn pull_page(
        &self,
        resolver: &DuplicateResolver,
        page_id: &str,
        retain_body: bool,
    ) -> Result<PullOutcome> {
        let page = self
            .database
            .retrieve_page(page_id)
            .await
            .map_err(|e| SyncError::Target(e.to_string()))?;
        let record = self.normalizer.from_target(&page)?;

        let mut update = self.normalizer.to_source_update(&record, retain_body);
        update.tags.retain(|tag| !tag.eq_ignore_ascii_case(READY_TAG));

        match resolver.resolve_in_source(self.source.as_ref(), &record).await? {
            SourceResolution::Create => {
                let id = self
                    .source
                    .create_record(&update)
                    .await
                    .map_err(SyncError::source)?;
                Ok(PullOutcome::new(page_id, SyncAction::Create, vec![id]))
            }
            SourceResolution::Update { note_ids } => {
                for id in &note_ids {
                    self.source
                        .update_record(*id, &update)
                        .await
                        .map_err(SyncError::source)?;
                }
                Ok(PullOutcome::new(page_id, SyncAction::Update, note_ids))
            }
            SourceResolution::Skip { note_ids } => {
                Ok(PullOutcome::new(page_id, SyncAction::Skip, note_ids))
            }
        }
    }

    /// Archive imported pages. A failure is reported and the remaining pages
    /// are still archived.
    async fn archive_pages(&self, page_ids: &[String], report: &mut PullReport) {
        let mut failures = Vec::new();
        for page_id in page_ids {
            match self.database.delete_page(page_id).await {
                Ok(()) => report.archived.push(page_id.clone()),
                Err(e) => {
                    warn!("Failed to archive page {}: {}", page_id, e);
                    failures.push(format!("{}: {}", page_id, e));
                }
            }
        }
        if !failures.is_empty() {
            report.archive_error = Some(failures.join("; "));
        }
        info!("Archived {} pages", report.archived.len());
    }

    fn finish_cancelled(
        &self,
        mut run: SyncRun,
        mut report: SyncReport,
        unprocessed: usize,
    ) -> Result<SyncReport> {
        run.finish(self.clock.unix_timestamp())?;
        report.cancelled = true;
        report.unprocessed = unprocessed;
        report.duration_secs = run.duration_secs().unwrap_or(0);

        info!(
            "Sync run {} cancelled: {} processed, {} unprocessed",
            run.id,
            report.total(),
            unprocessed
        );
        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::Cancelled {
                run_id: run.id.to_string(),
                processed: report.total() as u64,
                unprocessed: unprocessed as u64,
            }))
            .ok();

        Ok(report)
    }

    fn emit_failed(&self, run_id: &str, err: &SyncError) {
        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::Failed {
                run_id: run_id.to_string(),
                message: err.to_string(),
            }))
            .ok();
    }
}
