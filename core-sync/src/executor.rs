//! # Sync Executor
//!
//! Applies a (possibly user-filtered) plan for one binding.
//!
//! ## Ordering
//!
//! Changes apply in the deterministic phase order the planner emits:
//! links, inbound adds, outbound adds, outbound removes, inbound removes,
//! conflict resolutions.
//!
//! ## Transactional semantics
//!
//! Local repository mutations for the whole apply run inside a single
//! transaction. Remote mutations are not transactional: they are grouped
//! per adapter batch, report per-item outcomes, and a per-item failure
//! only fails that change. Whole-batch failures (revoked credentials,
//! exhausted retry budget) abort the job, roll back the transaction and
//! leave the previous snapshot intact. On full success the transaction
//! commits and a fresh snapshot is recorded from a re-fetched remote
//! membership.
//!
//! ## Idempotence
//!
//! Every change is safe to re-apply: adding a present member and removing
//! an absent one are no-ops, and re-running an unchanged plan produces
//! zero operations.

use crate::change::{ConflictResolution, SyncChange};
use crate::error::{Result, SyncError};
use crate::planner::{phase_rank, SyncPlan};
use crate::progress::{JobSummary, ProgressEvent, ProgressSink, ProgressState};
use crate::rate_limit::{RateLimiter, RetryPolicy};
use crate::safety::SafetyGate;
use core_library::{
    tx, PlatformLink, Playlist, PlaylistPlatformBinding, Snapshot, Track, TrackId,
};
use platform_traits::PlatformAdapter;
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Everything one apply needs. Owned so the job task can move it freely.
pub struct ExecutionContext {
    pub pool: SqlitePool,
    pub adapter: Arc<dyn PlatformAdapter>,
    pub limiter: Arc<RateLimiter>,
    pub retry: RetryPolicy,
    pub gate: SafetyGate,
    pub binding: PlaylistPlatformBinding,
    pub playlist: Playlist,
    /// Remote membership observed at detection time; used for idempotent
    /// skips of already-applied outbound changes.
    pub remote_member_ids: HashSet<String>,
    pub progress: ProgressSink,
    pub cancel: CancellationToken,
}

/// How a change fared in the pre-apply screening.
enum Disposition {
    Run,
    NotSelected,
    Blocked(String),
}

/// Stateless executor.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncExecutor;

impl SyncExecutor {
    /// Apply the selected subset of `plan`.
    ///
    /// `selection` overrides the plan's default selections when present:
    /// exactly the listed change ids run. On success the new snapshot
    /// reflects the now-current membership of both sides.
    #[instrument(skip_all, fields(binding_id = %ctx.binding.id, changes = plan.changes.len()))]
    pub async fn apply(
        &self,
        plan: &SyncPlan,
        selection: Option<&HashSet<String>>,
        ctx: &ExecutionContext,
    ) -> Result<JobSummary> {
        let mut summary = JobSummary::default();
        let mut tx = ctx.pool.begin().await.map_err(core_library::LibraryError::Database)?;

        let result = self
            .run_phases(plan, selection, ctx, &mut tx, &mut summary)
            .await;

        match result {
            Ok(ext_playlist_id) => {
                match self
                    .finish(&mut tx, ctx, ext_playlist_id.as_deref())
                    .await
                {
                    Ok(()) => {
                        tx.commit().await.map_err(core_library::LibraryError::Database)?;
                        info!(
                            applied = summary.applied_count,
                            skipped = summary.skipped_count,
                            failed = summary.failed_count,
                            "sync apply committed"
                        );
                        ctx.progress.emit(ProgressEvent::terminal(
                            ProgressState::Succeeded,
                            format!(
                                "applied {}, skipped {}, failed {}",
                                summary.applied_count, summary.skipped_count, summary.failed_count
                            ),
                        ));
                        Ok(summary)
                    }
                    Err(error) => {
                        let _ = tx.rollback().await;
                        self.emit_terminal(ctx, &error);
                        Err(error)
                    }
                }
            }
            Err(error) => {
                let _ = tx.rollback().await;
                self.emit_terminal(ctx, &error);
                Err(error)
            }
        }
    }

    fn emit_terminal(&self, ctx: &ExecutionContext, error: &SyncError) {
        let state = match error {
            SyncError::Cancelled => ProgressState::Cancelled,
            SyncError::Stopped => ProgressState::Stopped,
            _ => ProgressState::Failed,
        };
        ctx.progress
            .emit(ProgressEvent::terminal(state, error.to_string()));
    }

    /// Run every phase inside the open transaction. Returns the external
    /// playlist id in effect after the link phase.
    async fn run_phases(
        &self,
        plan: &SyncPlan,
        selection: Option<&HashSet<String>>,
        ctx: &ExecutionContext,
        tx: &mut Transaction<'_, Sqlite>,
        summary: &mut JobSummary,
    ) -> Result<Option<String>> {
        // Screening pass: selection, then the safety gate. Gate refusals
        // fail the change before any adapter call; the emergency stop
        // aborts the job wholesale.
        let mut dispositions: HashMap<&str, Disposition> = HashMap::new();
        for change in &plan.changes {
            let selected = match selection {
                Some(ids) => ids.contains(&change.change_id),
                None => change.user_selected,
            };
            let disposition = if !selected {
                Disposition::NotSelected
            } else {
                match ctx.gate.authorize(change, &ctx.binding, &ctx.playlist) {
                    Ok(()) => Disposition::Run,
                    Err(SyncError::Stopped) => return Err(SyncError::Stopped),
                    Err(error) => Disposition::Blocked(error.to_string()),
                }
            };
            dispositions.insert(change.change_id.as_str(), disposition);
        }

        // Settle screened-out changes and announce the runnable ones.
        let mut runnable: Vec<&SyncChange> = Vec::new();
        for change in &plan.changes {
            match &dispositions[change.change_id.as_str()] {
                Disposition::NotSelected => {
                    self.settle(summary, ctx, change, ProgressState::Skipped, Some("not selected".into()));
                }
                Disposition::Blocked(reason) => {
                    self.settle(summary, ctx, change, ProgressState::Failed, Some(reason.clone()));
                }
                Disposition::Run => {
                    ctx.progress.emit(ProgressEvent::change(
                        change.change_id.clone(),
                        ProgressState::Pending,
                    ));
                    runnable.push(change);
                }
            }
        }

        let mut ext_playlist_id = ctx.binding.external_playlist_id.clone();
        let mut remote_members = ctx.remote_member_ids.clone();

        for phase in 0..=5u8 {
            let phase_changes: Vec<&SyncChange> = runnable
                .iter()
                .copied()
                .filter(|change| phase_rank(change) == phase)
                .collect();
            if phase_changes.is_empty() {
                continue;
            }

            self.checkpoint(ctx)?;
            match phase {
                0 => {
                    self.apply_links(&phase_changes, ctx, tx, summary, &mut ext_playlist_id)
                        .await?
                }
                1 => {
                    self.apply_inbound_adds(&phase_changes, ctx, tx, summary)
                        .await?
                }
                2 => {
                    self.apply_outbound(
                        &phase_changes,
                        ctx,
                        summary,
                        ext_playlist_id.as_deref(),
                        &mut remote_members,
                        Outbound::Add,
                    )
                    .await?
                }
                3 => {
                    self.apply_outbound(
                        &phase_changes,
                        ctx,
                        summary,
                        ext_playlist_id.as_deref(),
                        &mut remote_members,
                        Outbound::Remove,
                    )
                    .await?
                }
                4 => {
                    self.apply_inbound_removes(&phase_changes, ctx, tx, summary)
                        .await?
                }
                5 => {
                    self.apply_conflicts(&phase_changes, ctx, tx, summary)
                        .await?
                }
                _ => unreachable!("phase ranks are 0..=5"),
            }
        }

        Ok(ext_playlist_id)
    }

    /// Cancellation and emergency-stop check between steps.
    fn checkpoint(&self, ctx: &ExecutionContext) -> Result<()> {
        if ctx.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        if ctx.gate.is_stopped() {
            return Err(SyncError::Stopped);
        }
        Ok(())
    }

    fn settle(
        &self,
        summary: &mut JobSummary,
        ctx: &ExecutionContext,
        change: &SyncChange,
        state: ProgressState,
        message: Option<String>,
    ) {
        let mut event = ProgressEvent::change(change.change_id.clone(), state);
        if let Some(message) = &message {
            event = event.with_message(message.clone());
        }
        ctx.progress.emit(event);
        summary.record(&change.change_id, state, message);
    }

    /// Phase 0: establish links. A link change with no identifiers creates
    /// the remote playlist; the rest persist track links.
    async fn apply_links(
        &self,
        changes: &[&SyncChange],
        ctx: &ExecutionContext,
        tx: &mut Transaction<'_, Sqlite>,
        summary: &mut JobSummary,
        ext_playlist_id: &mut Option<String>,
    ) -> Result<()> {
        for &change in changes {
            self.checkpoint(ctx)?;
            ctx.progress.emit(ProgressEvent::change(
                change.change_id.clone(),
                ProgressState::Running,
            ));

            if change.track_id.is_none() && change.external_id.is_none() {
                // Remote playlist creation.
                if ext_playlist_id.is_some() {
                    self.settle(summary, ctx, change, ProgressState::Succeeded, Some("already exists".into()));
                    continue;
                }
                if !ctx.adapter.capabilities().can_create_playlists {
                    self.settle(
                        summary,
                        ctx,
                        change,
                        ProgressState::Failed,
                        Some(format!("{} cannot create playlists", ctx.binding.platform)),
                    );
                    continue;
                }
                let name = ctx.playlist.name.clone();
                let description = ctx.playlist.description.clone().unwrap_or_default();
                let adapter = Arc::clone(&ctx.adapter);
                let created = self
                    .remote_call(ctx, move || {
                        let adapter = Arc::clone(&adapter);
                        let name = name.clone();
                        let description = description.clone();
                        async move { adapter.create_playlist(&name, &description, true).await }
                    })
                    .await;
                match created {
                    Ok(new_id) => {
                        tx::set_binding_external_id(tx, ctx.binding.id, &new_id).await?;
                        *ext_playlist_id = Some(new_id);
                        self.settle(summary, ctx, change, ProgressState::Succeeded, None);
                    }
                    Err(error) if error.is_job_fatal() => return Err(error),
                    Err(error) => {
                        self.settle(summary, ctx, change, ProgressState::Failed, Some(error.to_string()));
                    }
                }
                continue;
            }

            // Track link: pair a local track with a remote counterpart.
            let (Some(track_id), Some(external_id)) = (change.track_id, change.external_id.as_deref())
            else {
                self.settle(
                    summary,
                    ctx,
                    change,
                    ProgressState::Skipped,
                    Some("incomplete link change".into()),
                );
                continue;
            };
            let mut link = PlatformLink::new(track_id, ctx.binding.platform, external_id)
                .with_confidence(change.confidence.unwrap_or(1.0));
            if let Some(remote) = &change.remote_track {
                link.external_uri = remote.uri.clone();
                link.metadata = remote.raw.clone();
            }
            tx::upsert_link(tx, &link).await?;
            self.settle(summary, ctx, change, ProgressState::Succeeded, None);
        }
        Ok(())
    }

    /// Phase 1: platform → library additions. Local-only writes.
    async fn apply_inbound_adds(
        &self,
        changes: &[&SyncChange],
        ctx: &ExecutionContext,
        tx: &mut Transaction<'_, Sqlite>,
        summary: &mut JobSummary,
    ) -> Result<()> {
        for &change in changes {
            self.checkpoint(ctx)?;
            ctx.progress.emit(ProgressEvent::change(
                change.change_id.clone(),
                ProgressState::Running,
            ));

            let result = self.import_one(change, ctx, tx).await;
            match result {
                Ok(()) => self.settle(summary, ctx, change, ProgressState::Succeeded, None),
                Err(error) if error.is_job_fatal() => return Err(error),
                Err(error) => {
                    self.settle(summary, ctx, change, ProgressState::Failed, Some(error.to_string()));
                }
            }
        }
        Ok(())
    }

    async fn import_one(
        &self,
        change: &SyncChange,
        ctx: &ExecutionContext,
        tx: &mut Transaction<'_, Sqlite>,
    ) -> Result<()> {
        let track_id = match change.track_id {
            Some(track_id) => track_id,
            None => {
                // Unmatched import: materialize a new local track from the
                // remote metadata.
                let Some(remote) = &change.remote_track else {
                    return Err(SyncError::InvalidInput {
                        field: "remote_track".to_string(),
                        message: "import change without remote metadata".to_string(),
                    });
                };
                let mut track = Track::new(remote.title.clone(), remote.artist.clone());
                track.album = remote.album.clone();
                track.duration_ms = remote.duration_ms;
                tx::insert_track(tx, &track).await?
            }
        };

        if let Some(external_id) = change.external_id.as_deref() {
            let mut link = PlatformLink::new(track_id, ctx.binding.platform, external_id)
                .with_confidence(change.confidence.unwrap_or(1.0));
            if let Some(remote) = &change.remote_track {
                link.external_uri = remote.uri.clone();
                link.metadata = remote.raw.clone();
            }
            tx::upsert_link(tx, &link).await?;
        }

        tx::append_member(tx, ctx.binding.playlist_id, track_id).await?;
        Ok(())
    }

    /// Phases 2 and 3: outbound batched mutations.
    async fn apply_outbound(
        &self,
        changes: &[&SyncChange],
        ctx: &ExecutionContext,
        summary: &mut JobSummary,
        ext_playlist_id: Option<&str>,
        remote_members: &mut HashSet<String>,
        direction: Outbound,
    ) -> Result<()> {
        let mut batchable: Vec<(&SyncChange, String)> = Vec::new();
        for &change in changes {
            let Some(external_id) = change.external_id.clone() else {
                self.settle(
                    summary,
                    ctx,
                    change,
                    ProgressState::Skipped,
                    Some("no linked remote counterpart".into()),
                );
                continue;
            };

            // Idempotence against the membership observed at detect time.
            let already_applied = match direction {
                Outbound::Add => remote_members.contains(&external_id),
                Outbound::Remove => !remote_members.contains(&external_id),
            };
            if already_applied {
                self.settle(summary, ctx, change, ProgressState::Succeeded, Some("already in effect".into()));
                continue;
            }
            batchable.push((change, external_id));
        }

        if batchable.is_empty() {
            return Ok(());
        }
        let Some(playlist_id) = ext_playlist_id else {
            for (change, _) in &batchable {
                self.settle(
                    summary,
                    ctx,
                    change,
                    ProgressState::Failed,
                    Some("binding has no remote playlist".into()),
                );
            }
            return Ok(());
        };

        let batch_limit = ctx.adapter.capabilities().max_batch_size.max(1);
        for batch in batchable.chunks(batch_limit) {
            self.checkpoint(ctx)?;
            for (change, _) in batch {
                ctx.progress.emit(ProgressEvent::change(
                    change.change_id.clone(),
                    ProgressState::Running,
                ));
            }

            let ids: Vec<String> = batch.iter().map(|(_, id)| id.clone()).collect();
            let adapter = Arc::clone(&ctx.adapter);
            let playlist_id = playlist_id.to_string();
            let call_ids = ids.clone();
            let report = self
                .remote_call(ctx, move || {
                    let adapter = Arc::clone(&adapter);
                    let playlist_id = playlist_id.clone();
                    let ids = call_ids.clone();
                    async move {
                        match direction {
                            Outbound::Add => adapter.add_tracks(&playlist_id, &ids).await,
                            Outbound::Remove => adapter.remove_tracks(&playlist_id, &ids).await,
                        }
                    }
                })
                .await?;

            let mut failures: HashMap<&str, String> = HashMap::new();
            let mut skipped: HashSet<&str> = HashSet::new();
            for (external_id, error) in &report.failed {
                match error {
                    // A track the platform no longer knows: skip with a
                    // note rather than fail.
                    platform_traits::PlatformError::NotFound(_) => {
                        skipped.insert(external_id.as_str());
                    }
                    other => {
                        failures.insert(external_id.as_str(), other.to_string());
                    }
                }
            }

            for (change, external_id) in batch {
                if let Some(reason) = failures.get(external_id.as_str()) {
                    warn!(change_id = %change.change_id, %reason, "outbound item failed");
                    self.settle(summary, ctx, change, ProgressState::Failed, Some(reason.clone()));
                } else if skipped.contains(external_id.as_str()) {
                    self.settle(
                        summary,
                        ctx,
                        change,
                        ProgressState::Skipped,
                        Some("unknown to the platform".into()),
                    );
                } else {
                    match direction {
                        Outbound::Add => {
                            remote_members.insert(external_id.clone());
                        }
                        Outbound::Remove => {
                            remote_members.remove(external_id);
                        }
                    }
                    self.settle(summary, ctx, change, ProgressState::Succeeded, None);
                }
            }
        }
        Ok(())
    }

    /// Phase 4: platform → library removals. Local-only writes.
    async fn apply_inbound_removes(
        &self,
        changes: &[&SyncChange],
        ctx: &ExecutionContext,
        tx: &mut Transaction<'_, Sqlite>,
        summary: &mut JobSummary,
    ) -> Result<()> {
        for &change in changes {
            self.checkpoint(ctx)?;
            ctx.progress.emit(ProgressEvent::change(
                change.change_id.clone(),
                ProgressState::Running,
            ));

            let Some(track_id) = change.track_id else {
                self.settle(
                    summary,
                    ctx,
                    change,
                    ProgressState::Skipped,
                    Some("no local pair".into()),
                );
                continue;
            };
            let removed = tx::remove_member(tx, ctx.binding.playlist_id, track_id).await?;
            let note = if removed { None } else { Some("already absent".to_string()) };
            self.settle(summary, ctx, change, ProgressState::Succeeded, note);
        }
        Ok(())
    }

    /// Phase 5: conflict resolutions, per the user's chosen side.
    async fn apply_conflicts(
        &self,
        changes: &[&SyncChange],
        ctx: &ExecutionContext,
        tx: &mut Transaction<'_, Sqlite>,
        summary: &mut JobSummary,
    ) -> Result<()> {
        for &change in changes {
            self.checkpoint(ctx)?;
            match change.conflict_resolution {
                None => {
                    self.settle(
                        summary,
                        ctx,
                        change,
                        ProgressState::Skipped,
                        Some("conflict unresolved".into()),
                    );
                }
                Some(ConflictResolution::KeepLocal) => {
                    // The platform difference is accepted; nothing to write.
                    self.settle(summary, ctx, change, ProgressState::Succeeded, Some("kept local metadata".into()));
                }
                Some(ConflictResolution::KeepPlatform) => {
                    let (Some(track_id), Some(remote)) = (change.track_id, &change.remote_track)
                    else {
                        self.settle(
                            summary,
                            ctx,
                            change,
                            ProgressState::Skipped,
                            Some("missing conflict payload".into()),
                        );
                        continue;
                    };
                    ctx.progress.emit(ProgressEvent::change(
                        change.change_id.clone(),
                        ProgressState::Running,
                    ));
                    tx::update_track_metadata(
                        tx,
                        track_id,
                        &remote.title,
                        &remote.artist,
                        remote.album.as_deref(),
                        remote.duration_ms,
                    )
                    .await?;
                    self.settle(summary, ctx, change, ProgressState::Succeeded, Some("took platform metadata".into()));
                }
            }
        }
        Ok(())
    }

    /// After all phases: re-fetch the remote membership once and persist
    /// the fresh snapshot plus the binding's sync stamp, still inside the
    /// open transaction.
    async fn finish(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        ctx: &ExecutionContext,
        ext_playlist_id: Option<&str>,
    ) -> Result<()> {
        self.checkpoint(ctx)?;

        let platform_members: Vec<String> = match ext_playlist_id {
            Some(playlist_id) => {
                let adapter = Arc::clone(&ctx.adapter);
                let playlist_id = playlist_id.to_string();
                let tracks = self
                    .remote_call(ctx, move || {
                        let adapter = Arc::clone(&adapter);
                        let playlist_id = playlist_id.clone();
                        async move { adapter.fetch_playlist_tracks(&playlist_id).await }
                    })
                    .await?;
                tracks.into_iter().map(|track| track.id).collect()
            }
            None => Vec::new(),
        };

        let member_rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT track_id FROM playlist_tracks WHERE playlist_id = ? ORDER BY position",
        )
        .bind(ctx.binding.playlist_id.0)
        .fetch_all(&mut **tx)
        .await
        .map_err(core_library::LibraryError::Database)?;

        let link_rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT external_id, track_id FROM platform_links WHERE platform = ?",
        )
        .bind(ctx.binding.platform.as_str())
        .fetch_all(&mut **tx)
        .await
        .map_err(core_library::LibraryError::Database)?;
        let links: HashMap<String, TrackId> = link_rows
            .into_iter()
            .map(|(external_id, track_id)| (external_id, TrackId(track_id)))
            .collect();

        let mut snapshot = Snapshot::new(ctx.binding.id);
        snapshot.library_members = member_rows.into_iter().map(|(id,)| TrackId(id)).collect();
        for external_id in &platform_members {
            if let Some(track_id) = links.get(external_id) {
                snapshot.link_pairs.insert(external_id.clone(), *track_id);
            }
        }
        snapshot.platform_members = platform_members;

        tx::replace_snapshot(tx, &snapshot).await?;
        tx::touch_binding(tx, ctx.binding.id, snapshot.taken_at).await?;
        debug!(
            binding_id = %ctx.binding.id,
            library = snapshot.library_members.len(),
            platform = snapshot.platform_members.len(),
            "snapshot replaced"
        );
        Ok(())
    }

    /// One rate-limited remote call with retry, aborting early under the
    /// emergency stop.
    async fn remote_call<T, F, Fut>(&self, ctx: &ExecutionContext, make: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = platform_traits::Result<T>>,
    {
        self.checkpoint(ctx)?;
        crate::rate_limit::call_with_retry(
            &ctx.limiter,
            &ctx.retry,
            ctx.binding.platform,
            &ctx.cancel,
            make,
        )
        .await
    }
}

/// Direction of a batched outbound phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outbound {
    Add,
    Remove,
}
