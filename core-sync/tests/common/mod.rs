//! Shared fixtures: an in-memory platform adapter with scripted failures
//! and a seeded library world.
#![allow(dead_code)]

use core_library::{
    BindingId, Playlist, PlaylistId, PlaylistPlatformBinding, PlatformLink, SyncMode, Track,
    TrackId,
};
use core_library::repositories::{
    BindingRepository, LinkRepository, PlaylistRepository, SnapshotRepository,
    SqliteBindingRepository, SqliteLinkRepository, SqlitePlaylistRepository,
    SqliteSnapshotRepository, SqliteTrackRepository, TrackRepository,
};
use core_runtime::{EventBus, SyncSettings};
use core_sync::{
    ChangeDetector, DetectorInput, RateLimiter, SyncCoordinator, SyncJob, SyncJobId, SyncPlan,
    SyncPlanner,
};
use platform_traits::{
    BatchReport, CapabilityFlags, ExtPlaylist, ExtTrack, Platform, PlatformAdapter, PlatformError,
};
use sqlx::SqlitePool;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Mock adapter
// ============================================================================

#[derive(Debug, Clone)]
pub struct RemotePlaylist {
    pub name: String,
    pub is_owned: bool,
    pub tracks: Vec<ExtTrack>,
}

#[derive(Debug, Default)]
pub struct RemoteState {
    pub playlists: HashMap<String, RemotePlaylist>,
    pub catalog: Vec<ExtTrack>,
    next_playlist_id: u32,
}

/// In-memory adapter with failure scripting and call blocking.
pub struct MockAdapter {
    platform: Platform,
    capabilities: Mutex<CapabilityFlags>,
    authenticated: AtomicBool,
    state: Mutex<RemoteState>,
    fail_add_batches: Mutex<VecDeque<PlatformError>>,
    add_calls: AtomicUsize,
    remove_calls: AtomicUsize,
    block_adds_after: AtomicUsize,
    /// Blocked add calls wait on this; tests release them with
    /// `add_permits` (or cancel the job instead).
    pub gate: Semaphore,
    blocked: AtomicUsize,
}

impl MockAdapter {
    pub fn new(platform: Platform) -> Arc<Self> {
        Arc::new(Self {
            platform,
            capabilities: Mutex::new(CapabilityFlags::default()),
            authenticated: AtomicBool::new(true),
            state: Mutex::new(RemoteState::default()),
            fail_add_batches: Mutex::new(VecDeque::new()),
            add_calls: AtomicUsize::new(0),
            remove_calls: AtomicUsize::new(0),
            block_adds_after: AtomicUsize::new(usize::MAX),
            gate: Semaphore::new(0),
            blocked: AtomicUsize::new(0),
        })
    }

    pub fn set_batch_size(&self, size: usize) {
        self.capabilities.lock().unwrap().max_batch_size = size;
    }

    pub fn set_rate_budget(&self, budget: u32) {
        self.capabilities.lock().unwrap().rate_budget_per_minute = budget;
    }

    pub fn seed_catalog(&self, tracks: Vec<ExtTrack>) {
        self.state.lock().unwrap().catalog.extend(tracks);
    }

    pub fn seed_playlist(&self, id: &str, name: &str, is_owned: bool, tracks: Vec<ExtTrack>) {
        self.state.lock().unwrap().playlists.insert(
            id.to_string(),
            RemotePlaylist {
                name: name.to_string(),
                is_owned,
                tracks,
            },
        );
    }

    /// Queue a whole-batch failure for the next `add_tracks` call(s).
    pub fn push_add_failure(&self, error: PlatformError) {
        self.fail_add_batches.lock().unwrap().push_back(error);
    }

    /// Calls after the first `n` block on the gate until released.
    pub fn block_adds_after(&self, n: usize) {
        self.block_adds_after.store(n, Ordering::SeqCst);
    }

    pub fn unblock_adds(&self) {
        self.block_adds_after.store(usize::MAX, Ordering::SeqCst);
    }

    pub fn add_call_count(&self) -> usize {
        self.add_calls.load(Ordering::SeqCst)
    }

    pub fn remove_call_count(&self) -> usize {
        self.remove_calls.load(Ordering::SeqCst)
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked.load(Ordering::SeqCst)
    }

    /// Current membership (external ids) of a remote playlist.
    pub fn member_ids(&self, playlist_id: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .playlists
            .get(playlist_id)
            .map(|playlist| playlist.tracks.iter().map(|t| t.id.clone()).collect())
            .unwrap_or_default()
    }

    fn catalog_track(&self, id: &str) -> ExtTrack {
        self.state
            .lock()
            .unwrap()
            .catalog
            .iter()
            .find(|track| track.id == id)
            .cloned()
            .unwrap_or_else(|| ExtTrack::new(id, id, "unknown"))
    }
}

#[async_trait::async_trait]
impl PlatformAdapter for MockAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn capabilities(&self) -> CapabilityFlags {
        *self.capabilities.lock().unwrap()
    }

    fn authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn authenticate(&self) -> platform_traits::Result<()> {
        self.authenticated.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn list_playlists(&self) -> platform_traits::Result<Vec<ExtPlaylist>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .playlists
            .iter()
            .map(|(id, playlist)| ExtPlaylist {
                id: id.clone(),
                name: playlist.name.clone(),
                description: None,
                track_count: Some(playlist.tracks.len() as u32),
                is_owned: playlist.is_owned,
            })
            .collect())
    }

    async fn fetch_playlist_tracks(
        &self,
        ext_playlist_id: &str,
    ) -> platform_traits::Result<Vec<ExtTrack>> {
        let state = self.state.lock().unwrap();
        state
            .playlists
            .get(ext_playlist_id)
            .map(|playlist| playlist.tracks.clone())
            .ok_or_else(|| PlatformError::NotFound(ext_playlist_id.to_string()))
    }

    async fn create_playlist(
        &self,
        name: &str,
        _description: &str,
        _private: bool,
    ) -> platform_traits::Result<String> {
        if !self.capabilities.lock().unwrap().can_create_playlists {
            return Err(PlatformError::NotPermitted("creation unsupported".into()));
        }
        let mut state = self.state.lock().unwrap();
        state.next_playlist_id += 1;
        let id = format!("mock-pl-{}", state.next_playlist_id);
        state.playlists.insert(
            id.clone(),
            RemotePlaylist {
                name: name.to_string(),
                is_owned: true,
                tracks: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn add_tracks(
        &self,
        ext_playlist_id: &str,
        ext_track_ids: &[String],
    ) -> platform_traits::Result<BatchReport> {
        if let Some(error) = self.fail_add_batches.lock().unwrap().pop_front() {
            return Err(error);
        }

        let call = self.add_calls.fetch_add(1, Ordering::SeqCst);
        if call >= self.block_adds_after.load(Ordering::SeqCst) {
            self.blocked.fetch_add(1, Ordering::SeqCst);
            match self.gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(PlatformError::Transient("gate closed".into())),
            }
        }

        let additions: Vec<ExtTrack> = ext_track_ids
            .iter()
            .map(|id| self.catalog_track(id))
            .collect();
        let mut state = self.state.lock().unwrap();
        let Some(playlist) = state.playlists.get_mut(ext_playlist_id) else {
            return Err(PlatformError::NotFound(ext_playlist_id.to_string()));
        };
        for track in additions {
            if !playlist.tracks.iter().any(|existing| existing.id == track.id) {
                playlist.tracks.push(track);
            }
        }
        Ok(BatchReport::all_ok(ext_track_ids.to_vec()))
    }

    async fn remove_tracks(
        &self,
        ext_playlist_id: &str,
        ext_track_ids: &[String],
    ) -> platform_traits::Result<BatchReport> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let Some(playlist) = state.playlists.get_mut(ext_playlist_id) else {
            return Err(PlatformError::NotFound(ext_playlist_id.to_string()));
        };
        if !playlist.is_owned {
            return Err(PlatformError::NotPermitted("playlist not owned".into()));
        }
        let mut report = BatchReport::default();
        for id in ext_track_ids {
            let before = playlist.tracks.len();
            playlist.tracks.retain(|track| &track.id != id);
            if playlist.tracks.len() < before {
                report.succeeded.push(id.clone());
            } else {
                report
                    .failed
                    .push((id.clone(), PlatformError::NotFound(id.clone())));
            }
        }
        Ok(report)
    }

    async fn search(&self, query: &str, limit: usize) -> platform_traits::Result<Vec<ExtTrack>> {
        let needle = query.to_lowercase();
        let state = self.state.lock().unwrap();
        Ok(state
            .catalog
            .iter()
            .filter(|track| {
                needle.contains(&track.title.to_lowercase())
                    || needle.contains(&track.artist.to_lowercase())
            })
            .take(limit)
            .cloned()
            .collect())
    }
}

// ============================================================================
// Seeded world
// ============================================================================

/// A library database plus repositories, ready for scenario setup.
pub struct TestWorld {
    pub pool: SqlitePool,
    pub tracks: SqliteTrackRepository,
    pub playlists: SqlitePlaylistRepository,
    pub links: SqliteLinkRepository,
    pub bindings: SqliteBindingRepository,
    pub snapshots: SqliteSnapshotRepository,
    pub events: Arc<EventBus>,
}

impl TestWorld {
    pub async fn new() -> Self {
        let pool = core_library::create_test_pool().await.unwrap();
        Self {
            tracks: SqliteTrackRepository::new(pool.clone()),
            playlists: SqlitePlaylistRepository::new(pool.clone()),
            links: SqliteLinkRepository::new(pool.clone()),
            bindings: SqliteBindingRepository::new(pool.clone()),
            snapshots: SqliteSnapshotRepository::new(pool.clone()),
            events: Arc::new(EventBus::new(64)),
            pool,
        }
    }

    /// Settings tuned for tests: tiny backoff, otherwise defaults.
    pub fn fast_settings() -> SyncSettings {
        let mut settings = SyncSettings::default();
        settings.retry_base_delay_ms = 5;
        settings.retry_jitter_ratio = 0.0;
        settings
    }

    pub async fn coordinator(&self, settings: SyncSettings) -> Arc<SyncCoordinator> {
        SyncCoordinator::new(self.pool.clone(), settings, Arc::clone(&self.events)).unwrap()
    }

    pub async fn add_track(&self, title: &str, artist: &str) -> TrackId {
        self.tracks.insert(&Track::new(title, artist)).await.unwrap()
    }

    pub async fn add_playlist(&self, name: &str) -> PlaylistId {
        self.playlists.insert(&Playlist::new(name)).await.unwrap()
    }

    pub async fn add_member(&self, playlist: PlaylistId, track: TrackId) {
        self.playlists.add_track(playlist, track).await.unwrap()
    }

    pub async fn link(&self, track: TrackId, platform: Platform, external_id: &str) {
        self.links
            .upsert(&PlatformLink::new(track, platform, external_id))
            .await
            .unwrap();
    }

    pub async fn bind(
        &self,
        playlist: PlaylistId,
        platform: Platform,
        external_id: Option<&str>,
        mode: SyncMode,
        personal: bool,
    ) -> BindingId {
        let mut binding = PlaylistPlatformBinding::new(playlist, platform).with_mode(mode);
        binding.external_playlist_id = external_id.map(str::to_string);
        binding.is_personal = personal;
        self.bindings.insert(&binding).await.unwrap()
    }

    pub async fn member_track_ids(&self, playlist: PlaylistId) -> Vec<TrackId> {
        self.playlists
            .members(playlist)
            .await
            .unwrap()
            .into_iter()
            .map(|member| member.track_id)
            .collect()
    }

    /// Detect and plan exactly as the coordinator would, for driving the
    /// executor directly.
    pub async fn prepare_plan(
        &self,
        binding_id: BindingId,
        adapter: &MockAdapter,
    ) -> (SyncPlan, PlaylistPlatformBinding, Playlist, Vec<ExtTrack>) {
        let binding = self.bindings.find_by_id(binding_id).await.unwrap().unwrap();
        let playlist = self
            .playlists
            .find_by_id(binding.playlist_id)
            .await
            .unwrap()
            .unwrap();
        let remote_tracks = match binding.external_playlist_id.as_deref() {
            Some(id) => adapter.fetch_playlist_tracks(id).await.unwrap_or_default(),
            None => Vec::new(),
        };
        let local_tracks = self.playlists.member_tracks(binding.playlist_id).await.unwrap();
        let links = self.links.all_for_platform(binding.platform).await.unwrap();
        let snapshot = self.snapshots.get(binding_id).await.unwrap();
        let library_pool = self.tracks.list_all().await.unwrap();

        let limiter = RateLimiter::new();
        let diff = ChangeDetector::default()
            .detect(
                DetectorInput {
                    binding: &binding,
                    local_tracks: &local_tracks,
                    remote_tracks: &remote_tracks,
                    links: &links,
                    snapshot: snapshot.as_ref(),
                    library_pool: &library_pool,
                },
                adapter,
                &limiter,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let plan = SyncPlanner.plan(&binding, &playlist, &local_tracks, &diff);
        (plan, binding, playlist, remote_tracks)
    }
}

/// Poll a job until it reaches a terminal status.
pub async fn wait_for_job(coordinator: &SyncCoordinator, job_id: SyncJobId) -> SyncJob {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(job) = coordinator.job_status(job_id).await {
            if job.status.is_terminal() {
                return job;
            }
        }
        if tokio::time::Instant::now() > deadline {
            panic!("job {job_id} did not finish in time");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// An external track whose metadata mirrors a local track, so matching
/// and conflict scoring behave as for a faithful platform copy.
pub fn ext_track(id: &str, title: &str, artist: &str) -> ExtTrack {
    ExtTrack::new(id, title, artist)
}

/// Like [`ext_track`], with a duration so matches can clear the auto
/// threshold.
pub fn ext_track_with_duration(id: &str, title: &str, artist: &str, ms: i64) -> ExtTrack {
    let mut track = ExtTrack::new(id, title, artist);
    track.duration_ms = Some(ms);
    track
}
