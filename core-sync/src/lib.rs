//! # Sync Core
//!
//! Synchronizes notes from a local source store into a remote page database.
//!
//! ## Overview
//!
//! This crate holds the synchronization core:
//! - Normalizing source notes into a canonical record
//! - Inferring and reconciling the target database schema
//! - Detecting duplicates under a run-level policy
//! - Writing pages with per-record error isolation
//! - Deleting source notes only after a confirmed write
//! - Pulling pages marked ready back into the source
//!
//! ## Components
//!
//! - **Canonical Records** (`record`): Pivot representation, per-record outcomes and the run report
//! - **Property Schema** (`schema`): Name-based type inference and minimal schema diffs
//! - **Duplicate Resolver** (`duplicate_resolver`): Lookup predicates and keep/overwrite/copy policy
//! - **Record Normalizer** (`normalizer`): Source to canonical to payload, and the reverse projection
//! - **Run State Machine** (`run`): Run phases with validated transitions
//! - **Sync Coordinator** (`coordinator`): Orchestrates a run end to end

pub mod coordinator;
pub mod duplicate_resolver;
pub mod error;
pub mod normalizer;
pub mod record;
pub mod run;
pub mod schema;

pub use coordinator::{SyncCoordinator, SyncRunHandle, READY_TAG};
pub use duplicate_resolver::{
    DuplicatePolicy, DuplicateResolver, LookupOutcome, Resolution, SourceResolution,
};
pub use error::{Result, SyncError};
pub use normalizer::{PropertiesPayload, RecordNormalizer};
pub use record::{
    names, CanonicalRecord, CoercionWarning, PullOutcome, PullReport, RecordMetadata, SyncAction,
    SyncOutcome, SyncReport,
};
pub use run::{RunPhase, RunProgress, SyncRun, SyncRunId};
pub use schema::{type_for_name, PropertySchema, SchemaDiff};
