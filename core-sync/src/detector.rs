//! # Change Detector
//!
//! Computes the three-way diff for one binding: current library membership
//! `L`, current platform membership `P`, and the last snapshot `S`. The
//! snapshot is what separates "added locally since last sync" from
//! "removed remotely since last sync".
//!
//! ## Resolution
//!
//! Platform members resolve to local tracks through existing links first;
//! unlinked members run through the matcher against the whole library and
//! come back auto-linked, as a candidate needing confirmation, or
//! unmatched. Library members without a link are offered a remote
//! counterpart through the adapter's search.
//!
//! ## Classification
//!
//! | Category          | Definition                |
//! |-------------------|---------------------------|
//! | `PlatformAdded`   | in `P`, not in `S_P`      |
//! | `PlatformRemoved` | in `S_P`, not in `P`      |
//! | `LibraryAdded`    | in `L`, not in `S_L`      |
//! | `LibraryRemoved`  | in `S_L`, not in `L`      |
//! | `Conflict`        | linked pair diverged past the matching threshold |
//! | `Unchanged`       | present in both and in the snapshot |
//!
//! With no snapshot, both snapshot sides are empty and everything becomes
//! an addition (first sync).

use crate::error::Result;
use crate::rate_limit::RateLimiter;
use core_library::{PlatformLink, PlaylistPlatformBinding, Snapshot, Track, TrackId};
use core_matching::{best_match, decide, score, MatchConfig, MatchDecision, TrackFacts};
use platform_traits::{ExtTrack, PlatformAdapter};
use std::collections::{HashMap, HashSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// How an unlinked platform member resolved against the library.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportResolution {
    /// An existing link already pairs this external id with a track.
    Linked(TrackId),
    /// The matcher is confident enough to link automatically.
    AutoMatch { track_id: TrackId, confidence: f64 },
    /// A plausible pair that needs user confirmation.
    Candidate { track_id: TrackId, confidence: f64 },
    /// Nothing in the library resembles it; import as a new track.
    Unmatched,
}

/// A track present remotely but absent from the snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformAddition {
    pub track: ExtTrack,
    pub resolution: ImportResolution,
}

/// A track the snapshot saw remotely that is now gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformRemoval {
    pub external_id: String,
    /// Local pair from the snapshot's link pairs (or current links).
    pub track_id: Option<TrackId>,
}

/// A remote counterpart proposed for an unlinked local addition.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportProposal {
    pub remote: ExtTrack,
    pub confidence: f64,
    /// Whether the match cleared the auto threshold.
    pub auto: bool,
}

/// A track added locally since the snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryAddition {
    pub track_id: TrackId,
    /// External id from an existing link, when the track is already linked.
    pub linked_external_id: Option<String>,
    /// Search-derived counterpart for unlinked tracks.
    pub proposal: Option<ExportProposal>,
}

/// A track removed locally since the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryRemoval {
    pub track_id: TrackId,
    /// External id recovered from the snapshot's link pairs even when the
    /// live link is gone.
    pub external_id: Option<String>,
}

/// A linked pair present on both sides whose metadata diverged past the
/// candidate threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataConflict {
    pub track_id: TrackId,
    pub external_id: String,
    pub confidence: f64,
    pub remote: ExtTrack,
}

/// Output of one detection pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MembershipDiff {
    pub platform_added: Vec<PlatformAddition>,
    pub platform_removed: Vec<PlatformRemoval>,
    pub library_added: Vec<LibraryAddition>,
    pub library_removed: Vec<LibraryRemoval>,
    pub conflicts: Vec<MetadataConflict>,
    pub unchanged: Vec<TrackId>,
}

impl MembershipDiff {
    pub fn is_empty(&self) -> bool {
        self.platform_added.is_empty()
            && self.platform_removed.is_empty()
            && self.library_added.is_empty()
            && self.library_removed.is_empty()
            && self.conflicts.is_empty()
    }
}

/// Everything a detection pass reads. All projections are read-only.
pub struct DetectorInput<'a> {
    pub binding: &'a PlaylistPlatformBinding,
    /// Current playlist membership, in position order.
    pub local_tracks: &'a [Track],
    /// Current platform membership, in platform order.
    pub remote_tracks: &'a [ExtTrack],
    /// Every link on this binding's platform.
    pub links: &'a [PlatformLink],
    /// Last snapshot, if one exists.
    pub snapshot: Option<&'a Snapshot>,
    /// The whole library, used to resolve unlinked platform members.
    pub library_pool: &'a [Track],
}

/// The detector itself; holds only matching thresholds.
#[derive(Debug, Clone, Default)]
pub struct ChangeDetector {
    match_config: MatchConfig,
}

impl ChangeDetector {
    pub fn new(match_config: MatchConfig) -> Self {
        Self { match_config }
    }

    /// Compute the three-way diff.
    ///
    /// Remote traffic is limited to `search()` calls for unlinked local
    /// additions, each gated by the rate limiter and the cancellation
    /// token.
    #[instrument(skip_all, fields(binding_id = %input.binding.id))]
    pub async fn detect(
        &self,
        input: DetectorInput<'_>,
        adapter: &dyn PlatformAdapter,
        limiter: &RateLimiter,
        cancel: &CancellationToken,
    ) -> Result<MembershipDiff> {
        let local_ids: HashSet<TrackId> = input.local_tracks.iter().map(|t| t.id).collect();
        let remote_ids: HashSet<&str> =
            input.remote_tracks.iter().map(|t| t.id.as_str()).collect();

        let empty_snapshot;
        let snapshot = match input.snapshot {
            Some(snapshot) => snapshot,
            None => {
                empty_snapshot = Snapshot::new(input.binding.id);
                &empty_snapshot
            }
        };
        let snapshot_local: HashSet<TrackId> = snapshot.library_members.iter().copied().collect();
        let snapshot_remote: HashSet<&str> = snapshot
            .platform_members
            .iter()
            .map(String::as_str)
            .collect();

        let link_by_external: HashMap<&str, TrackId> = input
            .links
            .iter()
            .map(|link| (link.external_id.as_str(), link.track_id))
            .collect();
        let link_by_track: HashMap<TrackId, &PlatformLink> =
            input.links.iter().map(|link| (link.track_id, link)).collect();

        let mut diff = MembershipDiff::default();

        // Platform side: in P, not in S_P. A member the snapshot saw but
        // never paired with a local track (an import skipped or left
        // unconfirmed) is still pending and surfaces again.
        for remote in input.remote_tracks {
            let seen = snapshot_remote.contains(remote.id.as_str());
            let paired = link_by_external.contains_key(remote.id.as_str())
                || snapshot.link_pairs.contains_key(&remote.id);
            if seen && paired {
                continue;
            }
            let resolution = match link_by_external.get(remote.id.as_str()) {
                Some(track_id) => ImportResolution::Linked(*track_id),
                None => self.resolve_import(remote, input.library_pool),
            };
            diff.platform_added.push(PlatformAddition {
                track: remote.clone(),
                resolution,
            });
        }

        // Platform side: in S_P, not in P.
        for external_id in &snapshot.platform_members {
            if remote_ids.contains(external_id.as_str()) {
                continue;
            }
            let track_id = snapshot
                .link_pairs
                .get(external_id)
                .copied()
                .or_else(|| link_by_external.get(external_id.as_str()).copied());
            diff.platform_removed.push(PlatformRemoval {
                external_id: external_id.clone(),
                track_id,
            });
        }

        // Library side: in L, not in S_L.
        for track in input.local_tracks {
            if snapshot_local.contains(&track.id) {
                continue;
            }
            let linked_external_id = link_by_track
                .get(&track.id)
                .map(|link| link.external_id.clone());
            let proposal = match &linked_external_id {
                Some(_) => None,
                None => {
                    self.propose_export(track, adapter, limiter, cancel, input.binding)
                        .await?
                }
            };
            diff.library_added.push(LibraryAddition {
                track_id: track.id,
                linked_external_id,
                proposal,
            });
        }

        // Library side: in S_L, not in L. The live link may already be
        // gone; the snapshot's pairs still name the external id.
        for track_id in &snapshot.library_members {
            if local_ids.contains(track_id) {
                continue;
            }
            let external_id = snapshot
                .link_pairs
                .iter()
                .find(|(_, paired)| *paired == track_id)
                .map(|(external_id, _)| external_id.clone())
                .or_else(|| {
                    link_by_track
                        .get(track_id)
                        .map(|link| link.external_id.clone())
                });
            diff.library_removed.push(LibraryRemoval {
                track_id: *track_id,
                external_id,
            });
        }

        // Stable side: present in L and S_L with a linked remote member.
        // Linked pairs still on both sides are re-scored; divergence past
        // the candidate threshold surfaces as a conflict.
        let remote_by_id: HashMap<&str, &ExtTrack> = input
            .remote_tracks
            .iter()
            .map(|t| (t.id.as_str(), t))
            .collect();
        for track in input.local_tracks {
            if !snapshot_local.contains(&track.id) {
                continue;
            }
            diff.unchanged.push(track.id);

            let Some(link) = link_by_track.get(&track.id) else {
                continue;
            };
            let Some(remote) = remote_by_id.get(link.external_id.as_str()) else {
                continue;
            };
            let confidence = score(&local_facts(track), &TrackFacts::from_ext(remote));
            if decide(confidence, &self.match_config) == MatchDecision::NoMatch {
                debug!(
                    track_id = %track.id,
                    external_id = %link.external_id,
                    confidence,
                    "linked pair diverged past the matching threshold"
                );
                diff.conflicts.push(MetadataConflict {
                    track_id: track.id,
                    external_id: link.external_id.clone(),
                    confidence,
                    remote: (*remote).clone(),
                });
            }
        }

        Ok(diff)
    }

    /// Match one unlinked platform member against the library pool.
    fn resolve_import(&self, remote: &ExtTrack, pool: &[Track]) -> ImportResolution {
        let remote_facts = TrackFacts::from_ext(remote);
        let mut best: Option<(TrackId, f64, i64)> = None;

        for track in pool {
            let confidence = score(&local_facts(track), &remote_facts);
            if decide(confidence, &self.match_config) == MatchDecision::NoMatch {
                continue;
            }
            let duration_delta = match (track.duration_ms, remote.duration_ms) {
                (Some(a), Some(b)) => (a - b).abs(),
                _ => i64::MAX,
            };
            let better = match &best {
                None => true,
                Some((best_id, best_confidence, best_delta)) => {
                    confidence > *best_confidence
                        || (confidence == *best_confidence
                            && (duration_delta < *best_delta
                                || (duration_delta == *best_delta && track.id < *best_id)))
                }
            };
            if better {
                best = Some((track.id, confidence, duration_delta));
            }
        }

        match best {
            Some((track_id, confidence, _)) => {
                match decide(confidence, &self.match_config) {
                    MatchDecision::Auto => ImportResolution::AutoMatch {
                        track_id,
                        confidence,
                    },
                    MatchDecision::Candidate => ImportResolution::Candidate {
                        track_id,
                        confidence,
                    },
                    MatchDecision::NoMatch => ImportResolution::Unmatched,
                }
            }
            None => ImportResolution::Unmatched,
        }
    }

    /// Search the platform for a counterpart to an unlinked local track.
    async fn propose_export(
        &self,
        track: &Track,
        adapter: &dyn PlatformAdapter,
        limiter: &RateLimiter,
        cancel: &CancellationToken,
        binding: &PlaylistPlatformBinding,
    ) -> Result<Option<ExportProposal>> {
        limiter.acquire(binding.platform, cancel).await?;

        let query = format!("{} {}", track.title, track.artist);
        let results = match adapter.search(&query, 10).await {
            Ok(results) => results,
            // Search is advisory; a failed lookup just leaves the track
            // unproposed rather than failing detection.
            Err(error) => {
                debug!(track_id = %track.id, %error, "export search failed");
                return Ok(None);
            }
        };

        let candidates: Vec<(String, TrackFacts)> = results
            .iter()
            .map(|remote| (remote.id.clone(), TrackFacts::from_ext(remote)))
            .collect();
        let Some(best) = best_match(&self.match_config, &local_facts(track), &candidates) else {
            return Ok(None);
        };
        let Some(remote) = results.into_iter().find(|r| r.id == best.external_id) else {
            return Ok(None);
        };
        Ok(Some(ExportProposal {
            remote,
            confidence: best.confidence,
            auto: best.decision == MatchDecision::Auto,
        }))
    }
}

fn local_facts(track: &Track) -> TrackFacts {
    TrackFacts {
        title: track.title.clone(),
        artist: track.artist.clone(),
        album: track.album.clone(),
        duration_ms: track.duration_ms,
        strong_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::{BindingId, PlaylistId};
    use platform_traits::{
        BatchReport, CapabilityFlags, ExtPlaylist, Platform, PlatformError,
    };

    /// Adapter stub whose only live operation is `search`.
    struct SearchAdapter {
        results: Vec<ExtTrack>,
    }

    #[async_trait::async_trait]
    impl PlatformAdapter for SearchAdapter {
        fn platform(&self) -> Platform {
            Platform::Spotify
        }
        fn capabilities(&self) -> CapabilityFlags {
            CapabilityFlags::default()
        }
        fn authenticated(&self) -> bool {
            true
        }
        async fn authenticate(&self) -> platform_traits::Result<()> {
            Ok(())
        }
        async fn list_playlists(&self) -> platform_traits::Result<Vec<ExtPlaylist>> {
            Ok(Vec::new())
        }
        async fn fetch_playlist_tracks(&self, _: &str) -> platform_traits::Result<Vec<ExtTrack>> {
            Ok(Vec::new())
        }
        async fn create_playlist(
            &self,
            _: &str,
            _: &str,
            _: bool,
        ) -> platform_traits::Result<String> {
            Err(PlatformError::NotPermitted("stub".into()))
        }
        async fn add_tracks(
            &self,
            _: &str,
            _: &[String],
        ) -> platform_traits::Result<BatchReport> {
            Ok(BatchReport::default())
        }
        async fn remove_tracks(
            &self,
            _: &str,
            _: &[String],
        ) -> platform_traits::Result<BatchReport> {
            Ok(BatchReport::default())
        }
        async fn search(&self, _: &str, _: usize) -> platform_traits::Result<Vec<ExtTrack>> {
            Ok(self.results.clone())
        }
    }

    fn track(id: i64, title: &str, artist: &str) -> Track {
        let mut track = Track::new(title, artist);
        track.id = TrackId(id);
        track
    }

    fn ext(id: &str, title: &str, artist: &str) -> ExtTrack {
        ExtTrack::new(id, title, artist)
    }

    fn link(track_id: i64, external_id: &str) -> PlatformLink {
        PlatformLink::new(TrackId(track_id), Platform::Spotify, external_id)
    }

    fn binding() -> PlaylistPlatformBinding {
        let mut binding = PlaylistPlatformBinding::new(PlaylistId(1), Platform::Spotify)
            .with_external_id("sp-list");
        binding.id = BindingId(1);
        binding
    }

    fn snapshot_of(
        library: &[i64],
        platform: &[&str],
        pairs: &[(&str, i64)],
    ) -> Snapshot {
        let mut snapshot = Snapshot::new(BindingId(1));
        snapshot.library_members = library.iter().map(|id| TrackId(*id)).collect();
        snapshot.platform_members = platform.iter().map(|id| id.to_string()).collect();
        for (external_id, track_id) in pairs {
            snapshot
                .link_pairs
                .insert(external_id.to_string(), TrackId(*track_id));
        }
        snapshot
    }

    async fn detect(
        local: &[Track],
        remote: &[ExtTrack],
        links: &[PlatformLink],
        snapshot: Option<&Snapshot>,
        pool: &[Track],
        adapter: &SearchAdapter,
    ) -> MembershipDiff {
        let binding = binding();
        let limiter = RateLimiter::new();
        ChangeDetector::default()
            .detect(
                DetectorInput {
                    binding: &binding,
                    local_tracks: local,
                    remote_tracks: remote,
                    links,
                    snapshot,
                    library_pool: pool,
                },
                adapter,
                &limiter,
                &CancellationToken::new(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_first_sync_makes_everything_an_addition() {
        let adapter = SearchAdapter { results: vec![] };
        let local = vec![track(1, "Blue Monday", "New Order")];
        let remote = vec![ext("r1", "Atmosphere", "Joy Division")];

        let diff = detect(&local, &remote, &[], None, &local, &adapter).await;

        assert_eq!(diff.library_added.len(), 1);
        assert_eq!(diff.platform_added.len(), 1);
        assert!(diff.platform_removed.is_empty());
        assert!(diff.library_removed.is_empty());
        assert!(diff.unchanged.is_empty());
    }

    #[tokio::test]
    async fn test_divergent_edits_classify_once_per_side() {
        // Snapshot: both sides {t1,t2,t3}. Locally: -t2 +t4. Remotely: -r3 +r5.
        let t1 = track(1, "One", "Artist");
        let t3 = track(3, "Three", "Artist");
        let t4 = track(4, "Four", "Artist");
        let local = vec![t1.clone(), t3.clone(), t4.clone()];
        let remote = vec![
            ext("r1", "One", "Artist"),
            ext("r2", "Two", "Artist"),
            ext("r5", "Five", "Artist"),
        ];
        let links = vec![link(1, "r1"), link(2, "r2"), link(3, "r3"), link(4, "r4")];
        let snapshot = snapshot_of(
            &[1, 2, 3],
            &["r1", "r2", "r3"],
            &[("r1", 1), ("r2", 2), ("r3", 3)],
        );
        let adapter = SearchAdapter { results: vec![] };

        let diff = detect(&local, &remote, &links, Some(&snapshot), &local, &adapter).await;

        assert_eq!(diff.library_added.len(), 1);
        assert_eq!(diff.library_added[0].track_id, TrackId(4));
        assert_eq!(
            diff.library_added[0].linked_external_id.as_deref(),
            Some("r4")
        );

        assert_eq!(diff.library_removed.len(), 1);
        assert_eq!(diff.library_removed[0].track_id, TrackId(2));
        assert_eq!(diff.library_removed[0].external_id.as_deref(), Some("r2"));

        assert_eq!(diff.platform_added.len(), 1);
        assert_eq!(diff.platform_added[0].track.id, "r5");

        assert_eq!(diff.platform_removed.len(), 1);
        assert_eq!(diff.platform_removed[0].external_id, "r3");
        assert_eq!(diff.platform_removed[0].track_id, Some(TrackId(3)));

        assert_eq!(diff.unchanged, vec![TrackId(1), TrackId(3)]);
    }

    #[tokio::test]
    async fn test_emptied_remote_emits_one_removal_per_member() {
        let snapshot = snapshot_of(&[], &["r1", "r2", "r3"], &[]);
        let adapter = SearchAdapter { results: vec![] };
        let diff = detect(&[], &[], &[], Some(&snapshot), &[], &adapter).await;
        assert_eq!(diff.platform_removed.len(), 3);
    }

    #[tokio::test]
    async fn test_platform_addition_resolves_through_existing_link() {
        let pool = vec![track(1, "Blue Monday", "New Order")];
        let remote = vec![ext("r1", "Blue Monday", "New Order")];
        let links = vec![link(1, "r1")];
        let adapter = SearchAdapter { results: vec![] };

        let diff = detect(&[], &remote, &links, None, &pool, &adapter).await;
        assert_eq!(
            diff.platform_added[0].resolution,
            ImportResolution::Linked(TrackId(1))
        );
    }

    #[tokio::test]
    async fn test_ambiguous_platform_addition_becomes_candidate() {
        // Title and artist agree but no album or duration data exists:
        // 0.45 + 0.30 = 0.75, inside the candidate band.
        let pool = vec![track(1, "Blue Monday", "New Order")];
        let remote = vec![ext("r9", "Blue Monday", "New Order")];
        let adapter = SearchAdapter { results: vec![] };

        let diff = detect(&[], &remote, &[], None, &pool, &adapter).await;
        match &diff.platform_added[0].resolution {
            ImportResolution::Candidate {
                track_id,
                confidence,
            } => {
                assert_eq!(*track_id, TrackId(1));
                assert!((*confidence - 0.75).abs() < 1e-9);
            }
            other => panic!("expected candidate resolution, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unmatched_platform_addition() {
        let pool = vec![track(1, "Blue Monday", "New Order")];
        let remote = vec![ext("r9", "Aguas de Marco", "Elis Regina")];
        let adapter = SearchAdapter { results: vec![] };

        let diff = detect(&[], &remote, &[], None, &pool, &adapter).await;
        assert_eq!(
            diff.platform_added[0].resolution,
            ImportResolution::Unmatched
        );
    }

    #[tokio::test]
    async fn test_unpaired_snapshot_member_surfaces_again() {
        // The snapshot saw amb-1 but recorded no local pair (the import
        // was skipped). It must keep surfacing until paired.
        let pool = vec![track(1, "Blue Monday", "New Order")];
        let remote = vec![ext("amb-1", "Blue Monday", "New Order")];
        let snapshot = snapshot_of(&[], &["amb-1"], &[]);
        let adapter = SearchAdapter { results: vec![] };

        let diff = detect(&[], &remote, &[], Some(&snapshot), &pool, &adapter).await;
        assert_eq!(diff.platform_added.len(), 1);
        assert!(matches!(
            diff.platform_added[0].resolution,
            ImportResolution::Candidate { .. }
        ));

        // Once linked, it stops surfacing.
        let links = vec![link(1, "amb-1")];
        let local = pool.clone();
        let snapshot = snapshot_of(&[1], &["amb-1"], &[("amb-1", 1)]);
        let diff = detect(&local, &remote, &links, Some(&snapshot), &pool, &adapter).await;
        assert!(diff.platform_added.is_empty());
    }

    #[tokio::test]
    async fn test_library_removal_recovers_external_id_from_snapshot() {
        // Track 2 left the playlist and its live link is gone; the
        // snapshot still pairs it with r2.
        let snapshot = snapshot_of(&[2], &["r2"], &[("r2", 2)]);
        let remote = vec![ext("r2", "Two", "Artist")];
        let adapter = SearchAdapter { results: vec![] };

        let diff = detect(&[], &remote, &[], Some(&snapshot), &[], &adapter).await;
        assert_eq!(diff.library_removed.len(), 1);
        assert_eq!(diff.library_removed[0].external_id.as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn test_unlinked_library_addition_gets_search_proposal() {
        let mut proposal = ext("found-1", "Blue Monday", "New Order");
        proposal.duration_ms = Some(445_000);
        let adapter = SearchAdapter {
            results: vec![proposal],
        };
        let mut added = track(1, "Blue Monday", "New Order");
        added.duration_ms = Some(445_000);
        let local = vec![added];

        let diff = detect(&local, &[], &[], None, &local, &adapter).await;
        let proposal = diff.library_added[0].proposal.as_ref().unwrap();
        assert_eq!(proposal.remote.id, "found-1");
        assert!(proposal.auto);
    }

    #[tokio::test]
    async fn test_diverged_linked_pair_is_a_conflict() {
        // Linked on both sides and in the snapshot, but the remote
        // metadata no longer resembles the local track.
        let local = vec![track(1, "Blue Monday", "New Order")];
        let remote = vec![ext("r1", "Completely Different Song", "Somebody Else")];
        let links = vec![link(1, "r1")];
        let snapshot = snapshot_of(&[1], &["r1"], &[("r1", 1)]);
        let adapter = SearchAdapter { results: vec![] };

        let diff = detect(&local, &remote, &links, Some(&snapshot), &local, &adapter).await;
        assert_eq!(diff.conflicts.len(), 1);
        assert_eq!(diff.conflicts[0].track_id, TrackId(1));
        assert_eq!(diff.conflicts[0].external_id, "r1");
        // Still counted as unchanged membership-wise.
        assert_eq!(diff.unchanged, vec![TrackId(1)]);
    }
}
