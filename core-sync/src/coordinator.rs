//! # Sync Coordinator
//!
//! Central orchestrator for playlist synchronization. It owns the adapter
//! registry, the rate limiter, the safety gate and the job queue, and
//! wires the detection → planning → gating → execution pipeline for each
//! job.
//!
//! ## Workflow
//!
//! 1. A front-end calls [`SyncCoordinator::preview`] to obtain the
//!    selectable plan for a binding.
//! 2. It then calls [`SyncCoordinator::start_sync`], optionally with a
//!    change-id selection, receiving a job id and the job's progress
//!    stream.
//! 3. The queue dispatches the job under the concurrency limits; the
//!    executor applies the plan and records a fresh snapshot on success.
//!
//! Jobs are cancellable at any point; the emergency stop drains the queue
//! and fails everything in flight.

use crate::change::SyncChange;
use crate::detector::{ChangeDetector, DetectorInput};
use crate::error::{Result, SyncError};
use crate::executor::{ExecutionContext, SyncExecutor};
use crate::job::{SyncJob, SyncJobId};
use crate::planner::{SyncPlan, SyncPlanner};
use crate::progress::{progress_channel, ProgressEvent, ProgressSink, ProgressState};
use crate::queue::{CancelOutcome, JobPriority, JobQueue, JobRunner, QueuedJob};
use crate::rate_limit::{call_with_retry, RateLimiter, RetryPolicy};
use crate::repository::{SqliteSyncJobRepository, SyncJobRepository};
use crate::safety::{SafetyGate, SafetyPolicy};
use async_trait::async_trait;
use core_library::repositories::{
    BindingRepository, LinkRepository, PlaylistRepository, SnapshotRepository,
    SqliteBindingRepository, SqliteLinkRepository, SqlitePlaylistRepository,
    SqliteSnapshotRepository, SqliteTrackRepository, TrackRepository,
};
use core_library::{BindingId, LibraryError, Playlist, PlaylistPlatformBinding};
use core_matching::MatchConfig;
use core_runtime::{CoreEvent, EventBus, SafetyEvent, SyncEvent, SyncSettings};
use platform_traits::{ExtTrack, Platform, PlatformAdapter};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

/// The coordinator. Construct with [`SyncCoordinator::new`], register one
/// adapter per platform, then preview and start syncs.
pub struct SyncCoordinator {
    pool: SqlitePool,
    settings: SyncSettings,
    adapters: RwLock<HashMap<Platform, Arc<dyn PlatformAdapter>>>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    gate: SafetyGate,
    event_bus: Arc<EventBus>,
    jobs: SqliteSyncJobRepository,
    queue: Arc<JobQueue>,
    progress: Mutex<HashMap<SyncJobId, ProgressSink>>,
    detector: ChangeDetector,
    planner: SyncPlanner,
    executor: SyncExecutor,
}

impl SyncCoordinator {
    /// Create the coordinator and start its dispatcher.
    pub fn new(
        pool: SqlitePool,
        settings: SyncSettings,
        event_bus: Arc<EventBus>,
    ) -> Result<Arc<Self>> {
        settings
            .validate()
            .map_err(|e| SyncError::InvalidInput {
                field: "settings".to_string(),
                message: e.to_string(),
            })?;

        let match_config = MatchConfig {
            auto_threshold: settings.match_auto_threshold,
            candidate_threshold: settings.match_candidate_threshold,
        };
        let queue = JobQueue::new(
            settings.max_global_sync_concurrency,
            settings.max_per_adapter_concurrency,
        );

        let coordinator = Arc::new(Self {
            jobs: SqliteSyncJobRepository::new(pool.clone()),
            retry: RetryPolicy::from_settings(&settings),
            gate: SafetyGate::new(SafetyPolicy::from_settings(&settings)),
            detector: ChangeDetector::new(match_config),
            planner: SyncPlanner,
            executor: SyncExecutor,
            limiter: Arc::new(RateLimiter::new()),
            adapters: RwLock::new(HashMap::new()),
            progress: Mutex::new(HashMap::new()),
            queue: Arc::clone(&queue),
            event_bus,
            settings,
            pool,
        });

        let coordinator_dyn: Arc<dyn JobRunner> = coordinator.clone();
        let runner: Weak<dyn JobRunner> = Arc::downgrade(&coordinator_dyn);
        queue.start(runner);
        Ok(coordinator)
    }

    /// Register the adapter for one platform and declare its rate budget.
    pub async fn register_adapter(&self, adapter: Arc<dyn PlatformAdapter>) {
        let platform = adapter.platform();
        let capabilities = adapter.capabilities();
        self.limiter
            .register(platform, capabilities.rate_budget_per_minute);
        self.adapters.write().await.insert(platform, adapter);
        info!(%platform, budget = capabilities.rate_budget_per_minute, "registered platform adapter");
    }

    /// The safety gate (for the emergency-stop handle and test policy).
    pub fn safety_gate(&self) -> &SafetyGate {
        &self.gate
    }

    /// The configuration this coordinator runs with.
    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Engage the emergency stop: every queued job is drained and marked
    /// stopped; running jobs terminate at their next checkpoint.
    pub async fn engage_emergency_stop(&self) {
        self.gate.emergency_stop().engage();
        self.event_bus
            .emit(CoreEvent::Safety(SafetyEvent::EmergencyStopEngaged))
            .ok();

        let drained = self.queue.drain().await;
        for queued in drained {
            if let Ok(Some(job)) = self.jobs.find_by_id(queued.job_id).await {
                if let Ok(stopped) = job.stop() {
                    let _ = self.jobs.update(&stopped).await;
                }
            }
            if let Some(sink) = self.progress.lock().await.remove(&queued.job_id) {
                sink.emit(ProgressEvent::terminal(
                    ProgressState::Stopped,
                    "emergency stop",
                ));
            }
            self.event_bus
                .emit(CoreEvent::Sync(SyncEvent::Stopped {
                    job_id: queued.job_id.to_string(),
                }))
                .ok();
        }
    }

    /// Release the emergency stop; new jobs may be submitted again.
    pub fn release_emergency_stop(&self) {
        self.gate.emergency_stop().release();
        self.event_bus
            .emit(CoreEvent::Safety(SafetyEvent::EmergencyStopReleased))
            .ok();
    }

    /// Compute the selectable plan for a binding without applying anything.
    #[instrument(skip(self))]
    pub async fn preview(&self, binding_id: BindingId) -> Result<SyncPlan> {
        let cancel = CancellationToken::new();
        let prepared = self.prepare(binding_id, &cancel).await?;
        Ok(prepared.plan)
    }

    /// Queue a sync of one binding.
    ///
    /// `selection` restricts the apply to exactly the listed change ids;
    /// `None` applies the plan's default selections. Returns the job id
    /// and the job's progress stream.
    #[instrument(skip(self, selection))]
    pub async fn start_sync(
        &self,
        binding_id: BindingId,
        selection: Option<HashSet<String>>,
        priority: JobPriority,
    ) -> Result<(SyncJobId, mpsc::Receiver<ProgressEvent>)> {
        if self.gate.is_stopped() {
            return Err(SyncError::Stopped);
        }

        let binding = self.load_binding(binding_id).await?;
        if self.jobs.has_active(binding_id).await? {
            return Err(SyncError::SyncInProgress {
                binding_id: binding_id.0,
            });
        }

        let job = SyncJob::new(binding_id, binding.platform);
        self.jobs.insert(&job).await?;

        let (sink, receiver) = progress_channel();
        self.progress.lock().await.insert(job.id, sink);

        self.queue
            .submit(QueuedJob {
                job_id: job.id,
                binding_id,
                platform: binding.platform,
                selection,
                priority,
            })
            .await;

        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::Started {
                job_id: job.id.to_string(),
                binding_id: binding_id.0,
                platform: binding.platform.to_string(),
            }))
            .ok();

        Ok((job.id, receiver))
    }

    /// Cancel a job. Queued jobs never run; running jobs terminate at
    /// their next suspension point.
    pub async fn cancel_sync(&self, job_id: SyncJobId) -> Result<()> {
        match self.queue.cancel(job_id).await {
            CancelOutcome::Dequeued => {
                if let Some(job) = self.jobs.find_by_id(job_id).await? {
                    let cancelled = job.cancel()?;
                    self.jobs.update(&cancelled).await?;
                }
                if let Some(sink) = self.progress.lock().await.remove(&job_id) {
                    sink.emit(ProgressEvent::terminal(
                        ProgressState::Cancelled,
                        "cancelled before start",
                    ));
                }
                self.event_bus
                    .emit(CoreEvent::Sync(SyncEvent::Cancelled {
                        job_id: job_id.to_string(),
                    }))
                    .ok();
                Ok(())
            }
            CancelOutcome::Signalled => Ok(()),
            CancelOutcome::Unknown => Err(SyncError::JobNotFound {
                job_id: job_id.to_string(),
            }),
        }
    }

    /// Current state of a job.
    pub async fn job_status(&self, job_id: SyncJobId) -> Result<SyncJob> {
        self.jobs
            .find_by_id(job_id)
            .await?
            .ok_or(SyncError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    /// Sync history for a binding, most recent first.
    pub async fn history(&self, binding_id: BindingId, limit: u32) -> Result<Vec<SyncJob>> {
        self.jobs.history(binding_id, limit).await
    }

    async fn adapter_for(&self, platform: Platform) -> Result<Arc<dyn PlatformAdapter>> {
        self.adapters
            .read()
            .await
            .get(&platform)
            .cloned()
            .ok_or_else(|| SyncError::AdapterMissing(platform.to_string()))
    }

    async fn load_binding(&self, binding_id: BindingId) -> Result<PlaylistPlatformBinding> {
        let bindings = SqliteBindingRepository::new(self.pool.clone());
        bindings
            .find_by_id(binding_id)
            .await?
            .ok_or(SyncError::Library(LibraryError::NotFound {
                entity: "binding",
                id: binding_id.to_string(),
            }))
    }

    /// Everything a job needs: fetch, detect, plan.
    async fn prepare(&self, binding_id: BindingId, cancel: &CancellationToken) -> Result<Prepared> {
        let binding = self.load_binding(binding_id).await?;
        let playlists = SqlitePlaylistRepository::new(self.pool.clone());
        let mut playlist = playlists
            .find_by_id(binding.playlist_id)
            .await?
            .ok_or(SyncError::Library(LibraryError::NotFound {
                entity: "playlist",
                id: binding.playlist_id.to_string(),
            }))?;

        let adapter = self.adapter_for(binding.platform).await?;
        if !adapter.authenticated() {
            return Err(SyncError::AuthFailed(format!(
                "{} adapter is not authenticated",
                binding.platform
            )));
        }

        let remote_tracks: Vec<ExtTrack> = match binding.external_playlist_id.as_deref() {
            Some(external_playlist_id) => {
                let fetch_adapter = Arc::clone(&adapter);
                let playlist_id = external_playlist_id.to_string();
                call_with_retry(&self.limiter, &self.retry, binding.platform, cancel, move || {
                    let adapter = Arc::clone(&fetch_adapter);
                    let playlist_id = playlist_id.clone();
                    async move { adapter.fetch_playlist_tracks(&playlist_id).await }
                })
                .await?
            }
            None => Vec::new(),
        };

        // A remote rename follows the linked playlist home. The binding
        // itself is keyed by ids and survives renames on either side.
        if let Some(external_playlist_id) = binding.external_playlist_id.as_deref() {
            if !playlist.is_system {
                let list_adapter = Arc::clone(&adapter);
                let listed = call_with_retry(
                    &self.limiter,
                    &self.retry,
                    binding.platform,
                    cancel,
                    move || {
                        let adapter = Arc::clone(&list_adapter);
                        async move { adapter.list_playlists().await }
                    },
                )
                .await?;
                if let Some(remote) = listed.iter().find(|p| p.id == external_playlist_id) {
                    if remote.name != playlist.name {
                        info!(
                            binding_id = %binding.id,
                            from = %playlist.name,
                            to = %remote.name,
                            "remote playlist rename carried over"
                        );
                        playlist.name = remote.name.clone();
                        playlists.update(&playlist).await?;
                    }
                }
            }
        }

        let local_tracks = playlists.member_tracks(binding.playlist_id).await?;
        let links = SqliteLinkRepository::new(self.pool.clone())
            .all_for_platform(binding.platform)
            .await?;
        let snapshot = SqliteSnapshotRepository::new(self.pool.clone())
            .get(binding_id)
            .await?;
        let library_pool = SqliteTrackRepository::new(self.pool.clone()).list_all().await?;

        let diff = self
            .detector
            .detect(
                DetectorInput {
                    binding: &binding,
                    local_tracks: &local_tracks,
                    remote_tracks: &remote_tracks,
                    links: &links,
                    snapshot: snapshot.as_ref(),
                    library_pool: &library_pool,
                },
                adapter.as_ref(),
                &self.limiter,
                cancel,
            )
            .await?;

        let plan = self
            .planner
            .plan(&binding, &playlist, &local_tracks, &diff);

        Ok(Prepared {
            plan,
            binding,
            playlist,
            adapter,
            remote_tracks,
        })
    }

    async fn take_sink(&self, job_id: SyncJobId) -> ProgressSink {
        self.progress
            .lock()
            .await
            .remove(&job_id)
            .unwrap_or_else(ProgressSink::disabled)
    }
}

/// Prepared inputs for one job.
struct Prepared {
    plan: SyncPlan,
    binding: PlaylistPlatformBinding,
    playlist: Playlist,
    adapter: Arc<dyn PlatformAdapter>,
    remote_tracks: Vec<ExtTrack>,
}

#[async_trait]
impl JobRunner for SyncCoordinator {
    async fn run(&self, queued: QueuedJob, cancel: CancellationToken) {
        let sink = self.take_sink(queued.job_id).await;

        let job = match self.jobs.find_by_id(queued.job_id).await {
            Ok(Some(job)) => job,
            _ => {
                error!(job_id = %queued.job_id, "queued job has no persisted record");
                return;
            }
        };
        let job = match job.start() {
            Ok(job) => job,
            Err(err) => {
                error!(job_id = %queued.job_id, %err, "job could not start");
                return;
            }
        };
        if self.jobs.update(&job).await.is_err() {
            return;
        }

        let outcome = async {
            let prepared = match self.prepare(queued.binding_id, &cancel).await {
                Ok(prepared) => prepared,
                Err(error) => {
                    // Detection-stage failure: the executor never ran, so
                    // the terminal progress event is emitted here.
                    let state = match &error {
                        SyncError::Cancelled => ProgressState::Cancelled,
                        SyncError::Stopped => ProgressState::Stopped,
                        _ => ProgressState::Failed,
                    };
                    sink.emit(ProgressEvent::terminal(state, error.to_string()));
                    return Err(error);
                }
            };

            let remote_member_ids: HashSet<String> = prepared
                .remote_tracks
                .iter()
                .map(|track| track.id.clone())
                .collect();
            let ctx = ExecutionContext {
                pool: self.pool.clone(),
                adapter: prepared.adapter,
                limiter: Arc::clone(&self.limiter),
                retry: self.retry.clone(),
                gate: self.gate.clone(),
                binding: prepared.binding,
                playlist: prepared.playlist,
                remote_member_ids,
                progress: sink.clone(),
                cancel: cancel.clone(),
            };
            self.executor
                .apply(&prepared.plan, queued.selection.as_ref(), &ctx)
                .await
        }
        .await;

        let job_id_text = job.id.to_string();
        let (updated, event) = match outcome {
            Ok(summary) => {
                info!(job_id = %job_id_text, applied = summary.applied_count, "sync job completed");
                let event = CoreEvent::Sync(SyncEvent::Completed {
                    job_id: job_id_text.clone(),
                    applied: summary.applied_count,
                    skipped: summary.skipped_count,
                    failed: summary.failed_count,
                });
                (job.complete(&summary), event)
            }
            Err(SyncError::Cancelled) => {
                let event = CoreEvent::Sync(SyncEvent::Cancelled {
                    job_id: job_id_text.clone(),
                });
                (job.cancel(), event)
            }
            Err(SyncError::Stopped) => {
                let event = CoreEvent::Sync(SyncEvent::Stopped {
                    job_id: job_id_text.clone(),
                });
                (job.stop(), event)
            }
            Err(error) => {
                error!(job_id = %job_id_text, %error, "sync job failed");
                let event = CoreEvent::Sync(SyncEvent::Failed {
                    job_id: job_id_text.clone(),
                    reason: error.to_string(),
                });
                (job.fail(error.to_string()), event)
            }
        };

        match updated {
            Ok(updated) => {
                let _ = self.jobs.update(&updated).await;
            }
            Err(err) => error!(job_id = %job_id_text, %err, "invalid job transition"),
        }
        self.event_bus.emit(event).ok();
    }
}

/// Convenience: toggle selections on a previewed plan by change id.
pub fn apply_selection(plan: &mut SyncPlan, selected_ids: &HashSet<String>) {
    for change in &mut plan.changes {
        change.user_selected = selected_ids.contains(&change.change_id);
    }
}

/// Convenience: the default-selected ids of a plan.
pub fn default_selection(plan: &SyncPlan) -> HashSet<String> {
    plan.selected()
        .map(|change: &SyncChange| change.change_id.clone())
        .collect()
}
