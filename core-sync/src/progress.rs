//! Progress reporting.
//!
//! Each sync job owns one mpsc channel of [`ProgressEvent`]s; it is the
//! core's only runtime feedback surface to a front-end. Events for one job
//! arrive in emission order. Delivery is best-effort: a slow or departed
//! consumer never blocks the executor.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Channel capacity for per-job progress streams.
pub const PROGRESS_BUFFER_SIZE: usize = 256;

/// Lifecycle state of one change (or, for terminal events, the job).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
    Stopped,
}

/// One progress update.
///
/// `change_id` is `None` for job-terminal events (completion, cancellation,
/// emergency stop, fatal failure).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub change_id: Option<String>,
    pub state: ProgressState,
    pub message: Option<String>,
}

impl ProgressEvent {
    pub fn change(change_id: impl Into<String>, state: ProgressState) -> Self {
        Self {
            change_id: Some(change_id.into()),
            state,
            message: None,
        }
    }

    pub fn terminal(state: ProgressState, message: impl Into<String>) -> Self {
        Self {
            change_id: None,
            state,
            message: Some(message.into()),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Best-effort sender side of a job's progress stream.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    sender: Option<mpsc::Sender<ProgressEvent>>,
}

impl ProgressSink {
    pub fn new(sender: mpsc::Sender<ProgressEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// A sink that drops everything (previews, tests).
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Emit an event. Never blocks; events are dropped if the consumer has
    /// gone away or fallen far behind.
    pub fn emit(&self, event: ProgressEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.try_send(event);
        }
    }
}

/// Create a progress channel pair.
pub fn progress_channel() -> (ProgressSink, mpsc::Receiver<ProgressEvent>) {
    let (sender, receiver) = mpsc::channel(PROGRESS_BUFFER_SIZE);
    (ProgressSink::new(sender), receiver)
}

/// Per-change outcome recorded in the job summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeOutcome {
    pub change_id: String,
    pub state: ProgressState,
    pub message: Option<String>,
}

/// End-of-job summary: every job terminates with one of these.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub applied_count: u64,
    pub skipped_count: u64,
    pub failed_count: u64,
    pub per_change: Vec<ChangeOutcome>,
}

impl JobSummary {
    pub(crate) fn record(&mut self, change_id: &str, state: ProgressState, message: Option<String>) {
        match state {
            ProgressState::Succeeded => self.applied_count += 1,
            ProgressState::Failed => self.failed_count += 1,
            ProgressState::Skipped => self.skipped_count += 1,
            _ => {}
        }
        self.per_change.push(ChangeOutcome {
            change_id: change_id.to_string(),
            state,
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_emission_order() {
        let (sink, mut receiver) = progress_channel();
        sink.emit(ProgressEvent::change("a", ProgressState::Running));
        sink.emit(ProgressEvent::change("a", ProgressState::Succeeded));
        sink.emit(ProgressEvent::terminal(ProgressState::Succeeded, "done"));

        assert_eq!(receiver.recv().await.unwrap().state, ProgressState::Running);
        assert_eq!(
            receiver.recv().await.unwrap().state,
            ProgressState::Succeeded
        );
        let terminal = receiver.recv().await.unwrap();
        assert_eq!(terminal.change_id, None);
    }

    #[test]
    fn test_disabled_sink_swallows_events() {
        let sink = ProgressSink::disabled();
        sink.emit(ProgressEvent::terminal(ProgressState::Failed, "ignored"));
    }

    #[test]
    fn test_summary_counts_by_state() {
        let mut summary = JobSummary::default();
        summary.record("a", ProgressState::Succeeded, None);
        summary.record("b", ProgressState::Skipped, Some("unconfirmed".into()));
        summary.record("c", ProgressState::Failed, Some("boom".into()));
        summary.record("d", ProgressState::Succeeded, None);

        assert_eq!(summary.applied_count, 2);
        assert_eq!(summary.skipped_count, 1);
        assert_eq!(summary.failed_count, 1);
        assert_eq!(summary.per_change.len(), 4);
    }
}
