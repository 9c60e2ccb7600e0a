//! # Sync Run State Machine
//!
//! Tracks one sync run through its phases with validated transitions.
//!
//! ## State Machine
//!
//! ```text
//! CollectIds → ReconcileSchema → Normalize → ResolveAndWrite → ConditionalDelete → Report
//!     │              │               │              │                                 ↑
//!     └──────────────┴───────────────┴──────────────┴─────────────────────────────────┘
//!        fatal error        fatal error      cancellation
//! ```
//!
//! Phases only move forward. `Report` is terminal.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::run::{RunPhase, SyncRun};
//!
//! let mut run = SyncRun::new(started_at);
//! run.advance(RunPhase::ReconcileSchema)?;
//! run.update_progress(3, 10);
//! ```

use crate::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncRunId(Uuid);

impl SyncRunId {
    /// Create a new random run ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a run ID from a string
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| SyncError::InvalidRunId(e.to_string()))?,
        ))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SyncRunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SyncRunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SyncRunId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<SyncRunId> for Uuid {
    fn from(id: SyncRunId) -> Self {
        id.0
    }
}

// ============================================================================
// Phases
// ============================================================================

/// Phase of a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Query the source for candidate identifiers
    CollectIds,
    /// Read every candidate and bring the target schema up to date
    ReconcileSchema,
    /// Build canonical records
    Normalize,
    /// Look up duplicates and create, update or skip pages
    ResolveAndWrite,
    /// Delete source notes whose page was written
    ConditionalDelete,
    /// Terminal: the report is final
    Report,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::CollectIds => "collect_ids",
            RunPhase::ReconcileSchema => "reconcile_schema",
            RunPhase::Normalize => "normalize",
            RunPhase::ResolveAndWrite => "resolve_and_write",
            RunPhase::ConditionalDelete => "conditional_delete",
            RunPhase::Report => "report",
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self == RunPhase::Report
    }

    /// Whether the run may move from `self` to `to`.
    pub fn can_transition_to(&self, to: RunPhase) -> bool {
        use RunPhase::*;

        match (self, to) {
            // Linear path
            (CollectIds, ReconcileSchema)
            | (ReconcileSchema, Normalize)
            | (Normalize, ResolveAndWrite)
            | (ResolveAndWrite, ConditionalDelete)
            | (ConditionalDelete, Report) => true,

            // Early exits: fatal error or cancellation
            (CollectIds, Report)
            | (ReconcileSchema, Report)
            | (Normalize, Report)
            | (ResolveAndWrite, Report) => true,

            (Report, _) => false,
            _ => false,
        }
    }
}

impl FromStr for RunPhase {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "collect_ids" => Ok(RunPhase::CollectIds),
            "reconcile_schema" => Ok(RunPhase::ReconcileSchema),
            "normalize" => Ok(RunPhase::Normalize),
            "resolve_and_write" => Ok(RunPhase::ResolveAndWrite),
            "conditional_delete" => Ok(RunPhase::ConditionalDelete),
            "report" => Ok(RunPhase::Report),
            _ => Err(SyncError::InvalidPhase(s.to_string())),
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Progress
// ============================================================================

/// Write-phase progress of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProgress {
    pub processed: u64,
    pub total: u64,
    /// 0-100
    pub percent: u8,
}

impl RunProgress {
    pub fn update(&mut self, processed: u64, total: u64) {
        self.processed = processed;
        self.total = total;
        self.percent = if total > 0 {
            ((processed as f64 / total as f64) * 100.0).min(100.0) as u8
        } else {
            0
        };
    }
}

// ============================================================================
// Run
// ============================================================================

/// One sync run with phase tracking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: SyncRunId,
    pub phase: RunPhase,
    pub progress: RunProgress,
    /// Unix seconds
    pub started_at: i64,
    pub finished_at: Option<i64>,
}

impl SyncRun {
    /// Create a run in `CollectIds`.
    pub fn new(started_at: i64) -> Self {
        Self {
            id: SyncRunId::new(),
            phase: RunPhase::CollectIds,
            progress: RunProgress::default(),
            started_at,
            finished_at: None,
        }
    }

    /// Move to the next phase.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPhaseTransition` when the move is not allowed
    pub fn advance(&mut self, to: RunPhase) -> Result<()> {
        if !self.phase.can_transition_to(to) {
            return Err(SyncError::InvalidPhaseTransition {
                from: self.phase.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!("Cannot move from {} to {}", self.phase, to),
            });
        }
        self.phase = to;
        Ok(())
    }

    /// Jump to `Report` and stamp the finish time.
    pub fn finish(&mut self, finished_at: i64) -> Result<()> {
        self.advance(RunPhase::Report)?;
        self.finished_at = Some(finished_at);
        Ok(())
    }

    pub fn update_progress(&mut self, processed: u64, total: u64) {
        self.progress.update(processed, total);
    }

    /// Seconds between start and finish; `None` while running.
    pub fn duration_secs(&self) -> Option<u64> {
        self.finished_at
            .map(|end| (end - self.started_at).max(0) as u64)
    }
}
