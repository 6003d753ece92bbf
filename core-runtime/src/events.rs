//! # Event Bus
//!
//! Decoupled communication between core modules over a
//! `tokio::sync::broadcast` channel. Front-ends subscribe for job lifecycle
//! notifications; per-change progress flows over each job's own progress
//! channel instead.
//!
//! Subscribers that fall behind receive `RecvError::Lagged` and keep
//! receiving newer events; `RecvError::Closed` signals shutdown.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// Top-level event enum published through the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Sync(SyncEvent),
    Safety(SafetyEvent),
}

/// Sync job lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncEvent {
    Started {
        job_id: String,
        binding_id: i64,
        platform: String,
    },
    Completed {
        job_id: String,
        applied: u64,
        skipped: u64,
        failed: u64,
    },
    Failed {
        job_id: String,
        reason: String,
    },
    Cancelled {
        job_id: String,
    },
    Stopped {
        job_id: String,
    },
}

/// Emergency stop transitions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SafetyEvent {
    EmergencyStopEngaged,
    EmergencyStopReleased,
}

/// Central broadcast channel for [`CoreEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self { sender }
    }

    /// Publish an event. Returns the number of active subscribers; an
    /// error only means nobody is listening, which callers may ignore.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}
