//! # Job Queue
//!
//! FIFO queue of sync jobs with bounded concurrency: a global limit across
//! all platforms and a per-platform limit, both semaphore-backed. A
//! foreground (user-initiated) job jumps the queue. Jobs on the same
//! binding serialize on a per-binding lock; jobs on different bindings run
//! in parallel up to the limits.
//!
//! Every job carries a cancellation token. Cancelling a queued job removes
//! it before it ever runs; cancelling a running job fires its token, which
//! the executor observes at its next suspension point.

use crate::job::SyncJobId;
use async_trait::async_trait;
use core_library::BindingId;
use platform_traits::Platform;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Queue position override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobPriority {
    #[default]
    Normal,
    /// User-initiated; jumps ahead of queued normal jobs.
    Foreground,
}

/// One queued unit of sync work: a single binding.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job_id: SyncJobId,
    pub binding_id: BindingId,
    pub platform: Platform,
    /// Explicit change-id selection, when the user filtered the plan.
    pub selection: Option<HashSet<String>>,
    pub priority: JobPriority,
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was still queued and never ran.
    Dequeued,
    /// The job is running; its token has been fired.
    Signalled,
    /// No such job.
    Unknown,
}

/// Consumer of dispatched jobs (the coordinator).
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: QueuedJob, cancel: CancellationToken);
}

struct QueueState {
    queue: VecDeque<QueuedJob>,
    cancels: HashMap<SyncJobId, CancellationToken>,
}

/// The queue itself. Construct with [`JobQueue::new`], wire a runner with
/// [`JobQueue::start`], feed it with [`JobQueue::submit`].
pub struct JobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    global: Arc<Semaphore>,
    per_platform: Mutex<HashMap<Platform, Arc<Semaphore>>>,
    per_platform_limit: usize,
    binding_locks: Mutex<HashMap<BindingId, Arc<Mutex<()>>>>,
    shutdown: CancellationToken,
}

impl JobQueue {
    pub fn new(max_global: usize, max_per_platform: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                cancels: HashMap::new(),
            }),
            notify: Notify::new(),
            global: Arc::new(Semaphore::new(max_global.max(1))),
            per_platform: Mutex::new(HashMap::new()),
            per_platform_limit: max_per_platform.max(1),
            binding_locks: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Spawn the dispatcher. The runner is held weakly so dropping the
    /// coordinator stops dispatching without a reference cycle.
    pub fn start(self: Arc<Self>, runner: Weak<dyn JobRunner>) {
        let queue = self;
        tokio::spawn(async move {
            loop {
                if queue.shutdown.is_cancelled() {
                    break;
                }
                let dispatched = Self::try_dispatch(&queue, &runner).await;
                if !dispatched {
                    tokio::select! {
                        _ = queue.notify.notified() => {}
                        _ = queue.shutdown.cancelled() => break,
                    }
                }
            }
            debug!("job queue dispatcher stopped");
        });
    }

    /// Enqueue a job and return its cancellation token.
    pub async fn submit(&self, job: QueuedJob) -> CancellationToken {
        let token = CancellationToken::new();
        {
            let mut state = self.state.lock().await;
            state.cancels.insert(job.job_id, token.clone());
            match job.priority {
                JobPriority::Foreground => state.queue.push_front(job),
                JobPriority::Normal => state.queue.push_back(job),
            }
        }
        self.notify.notify_one();
        token
    }

    /// Cancel a job by id.
    pub async fn cancel(&self, job_id: SyncJobId) -> CancelOutcome {
        let mut state = self.state.lock().await;
        let Some(token) = state.cancels.get(&job_id).cloned() else {
            return CancelOutcome::Unknown;
        };
        token.cancel();

        if let Some(index) = state.queue.iter().position(|job| job.job_id == job_id) {
            state.queue.remove(index);
            state.cancels.remove(&job_id);
            CancelOutcome::Dequeued
        } else {
            CancelOutcome::Signalled
        }
    }

    /// Fire every token and empty the queue (emergency stop). Returns the
    /// jobs that were still queued and will never run.
    pub async fn drain(&self) -> Vec<QueuedJob> {
        let mut state = self.state.lock().await;
        for token in state.cancels.values() {
            token.cancel();
        }
        state.cancels.clear();
        let drained: Vec<QueuedJob> = state.queue.drain(..).collect();
        if !drained.is_empty() {
            info!(count = drained.len(), "drained pending sync jobs");
        }
        drained
    }

    /// Stop the dispatcher.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.notify.notify_one();
    }

    pub async fn queued_len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Dispatch at most one eligible job. Returns whether one was started.
    async fn try_dispatch(queue: &Arc<Self>, runner: &Weak<dyn JobRunner>) -> bool {
        let Ok(global_permit) = Arc::clone(&queue.global).try_acquire_owned() else {
            return false;
        };

        // First queued job whose platform has a free slot. FIFO otherwise.
        let (job, token, platform_permit) = {
            let mut state = queue.state.lock().await;
            let mut chosen = None;
            for (index, job) in state.queue.iter().enumerate() {
                let semaphore = {
                    let mut map = queue.per_platform.lock().await;
                    Arc::clone(
                        map.entry(job.platform)
                            .or_insert_with(|| Arc::new(Semaphore::new(queue.per_platform_limit))),
                    )
                };
                if let Ok(permit) = semaphore.try_acquire_owned() {
                    chosen = Some((index, permit));
                    break;
                }
            }
            let Some((index, permit)) = chosen else {
                return false;
            };
            let Some(job) = state.queue.remove(index) else {
                return false;
            };
            let token = state
                .cancels
                .get(&job.job_id)
                .cloned()
                .unwrap_or_default();
            (job, token, permit)
        };

        let binding_lock = {
            let mut locks = queue.binding_locks.lock().await;
            Arc::clone(locks.entry(job.binding_id).or_default())
        };

        let queue = Arc::clone(queue);
        let runner = runner.clone();
        tokio::spawn(async move {
            let _global = global_permit;
            let _platform = platform_permit;
            // A binding is a critical section: strictly serial ordering
            // between jobs on the same binding.
            let _binding = binding_lock.lock().await;

            if let Some(runner) = runner.upgrade() {
                runner.run(job.clone(), token).await;
            }

            {
                let mut state = queue.state.lock().await;
                state.cancels.remove(&job.job_id);
            }
            queue.notify.notify_one();
        });
        true
    }
}
