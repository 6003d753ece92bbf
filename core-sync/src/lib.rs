//! # Playlist Synchronization Core
//!
//! Keeps the local canonical library synchronized with playlists held by
//! external music platforms.
//!
//! ## Overview
//!
//! For each playlist/platform binding the core:
//! - computes a three-way diff between current local membership, current
//!   remote membership and the snapshot taken at the last successful sync;
//! - converts the diff into an ordered plan of selectable changes;
//! - screens the plan through the safety gate (ownership, system
//!   playlists, test prefixes, emergency stop);
//! - applies the selected changes idempotently, tolerating per-item remote
//!   failures, inside one local transaction;
//! - records a fresh snapshot from a re-fetched remote membership.
//!
//! ## Components
//!
//! - **Change Detector** (`detector`): three-way membership diff with
//!   cross-platform identity resolution
//! - **Sync Planner** (`planner`): diff → ordered selectable plan
//! - **Sync Executor** (`executor`): idempotent, partial-failure tolerant
//!   apply with snapshot recording
//! - **Rate Limiter** (`rate_limit`): per-adapter token buckets and the
//!   retry policy
//! - **Job Queue** (`queue`): bounded-concurrency FIFO queue with priority
//!   override and cancellation
//! - **Safety Gate** (`safety`): ownership, system-playlist and
//!   test-prefix policy plus the emergency stop
//! - **Coordinator** (`coordinator`): wires the pipeline per job

pub mod change;
pub mod coordinator;
pub mod detector;
pub mod error;
pub mod executor;
pub mod job;
pub mod planner;
pub mod progress;
pub mod queue;
pub mod rate_limit;
pub mod repository;
pub mod safety;

pub use change::{ChangeDirection, ChangeKind, ConflictResolution, SyncChange};
pub use coordinator::{apply_selection, default_selection, SyncCoordinator};
pub use detector::{
    ChangeDetector, DetectorInput, ExportProposal, ImportResolution, LibraryAddition,
    LibraryRemoval, MembershipDiff, MetadataConflict, PlatformAddition, PlatformRemoval,
};
pub use error::{Result, SyncError};
pub use executor::{ExecutionContext, SyncExecutor};
pub use job::{SyncJob, SyncJobId, SyncStatus};
pub use planner::{SyncPlan, SyncPlanner};
pub use progress::{
    progress_channel, ChangeOutcome, JobSummary, ProgressEvent, ProgressSink, ProgressState,
};
pub use queue::{CancelOutcome, JobPriority, JobQueue, JobRunner, QueuedJob};
pub use rate_limit::{call_with_retry, RateLimiter, RetryPolicy};
pub use repository::{SqliteSyncJobRepository, SyncJobRepository};
pub use safety::{EmergencyStop, SafetyGate, SafetyPolicy};
