//! # Sync Job State Machine
//!
//! One job per user-initiated sync of one binding, with validated state
//! transitions. Jobs persist across restarts via the job repository.
//!
//! ```text
//! Pending → Running → Completed
//!     ↓         ↓    ↘ Failed
//!     ↓         ↓    ↘ Stopped
//!     └───────→ Cancelled
//! ```

use crate::error::{Result, SyncError};
use crate::progress::JobSummary;
use core_library::BindingId;
use platform_traits::Platform;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a sync job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncJobId(Uuid);

impl SyncJobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| SyncError::InvalidJobId(e.to_string()))
    }
}

impl Default for SyncJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SyncJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current status of a sync job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    /// Terminated by the emergency stop.
    Stopped,
}

impl SyncStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncStatus::Completed | SyncStatus::Failed | SyncStatus::Cancelled | SyncStatus::Stopped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Running => "running",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
            SyncStatus::Cancelled => "cancelled",
            SyncStatus::Stopped => "stopped",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "running" => Ok(SyncStatus::Running),
            "completed" => Ok(SyncStatus::Completed),
            "failed" => Ok(SyncStatus::Failed),
            "cancelled" => Ok(SyncStatus::Cancelled),
            "stopped" => Ok(SyncStatus::Stopped),
            other => Err(SyncError::InvalidStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A sync job for one binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: SyncJobId,
    pub binding_id: BindingId,
    pub platform: Platform,
    pub status: SyncStatus,
    pub applied_count: u64,
    pub skipped_count: u64,
    pub failed_count: u64,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl SyncJob {
    pub fn new(binding_id: BindingId, platform: Platform) -> Self {
        Self {
            id: SyncJobId::new(),
            binding_id,
            platform,
            status: SyncStatus::Pending,
            applied_count: 0,
            skipped_count: 0,
            failed_count: 0,
            error_message: None,
            created_at: chrono::Utc::now().timestamp(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn start(mut self) -> Result<Self> {
        self.validate_transition(SyncStatus::Running)?;
        self.status = SyncStatus::Running;
        self.started_at = Some(chrono::Utc::now().timestamp());
        Ok(self)
    }

    pub fn complete(mut self, summary: &JobSummary) -> Result<Self> {
        self.validate_transition(SyncStatus::Completed)?;
        self.status = SyncStatus::Completed;
        self.completed_at = Some(chrono::Utc::now().timestamp());
        self.applied_count = summary.applied_count;
        self.skipped_count = summary.skipped_count;
        self.failed_count = summary.failed_count;
        Ok(self)
    }

    pub fn fail(mut self, message: impl Into<String>) -> Result<Self> {
        self.validate_transition(SyncStatus::Failed)?;
        self.status = SyncStatus::Failed;
        self.completed_at = Some(chrono::Utc::now().timestamp());
        self.error_message = Some(message.into());
        Ok(self)
    }

    pub fn cancel(mut self) -> Result<Self> {
        self.validate_transition(SyncStatus::Cancelled)?;
        self.status = SyncStatus::Cancelled;
        self.completed_at = Some(chrono::Utc::now().timestamp());
        Ok(self)
    }

    /// Terminate under the emergency stop.
    pub fn stop(mut self) -> Result<Self> {
        self.validate_transition(SyncStatus::Stopped)?;
        self.status = SyncStatus::Stopped;
        self.completed_at = Some(chrono::Utc::now().timestamp());
        self.error_message = Some("emergency stop".to_string());
        Ok(self)
    }

    fn validate_transition(&self, to: SyncStatus) -> Result<()> {
        let valid = match (self.status, to) {
            (SyncStatus::Pending, SyncStatus::Running) => true,
            (SyncStatus::Pending, SyncStatus::Cancelled) => true,
            (SyncStatus::Pending, SyncStatus::Failed) => true,
            (SyncStatus::Pending, SyncStatus::Stopped) => true,
            (SyncStatus::Running, SyncStatus::Completed) => true,
            (SyncStatus::Running, SyncStatus::Failed) => true,
            (SyncStatus::Running, SyncStatus::Cancelled) => true,
            (SyncStatus::Running, SyncStatus::Stopped) => true,
            _ => false,
        };
        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }
}
