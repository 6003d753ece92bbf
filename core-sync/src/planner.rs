//! # Sync Planner
//!
//! Converts a [`MembershipDiff`] into an ordered, selectable plan of
//! [`SyncChange`]s, then applies the binding's sync mode and the ownership
//! policy:
//!
//! - `import_only` drops every outbound change.
//! - `add_only` drops removals in both directions.
//! - Mirror modes make the mirrored side win: local divergence under
//!   `mirror_from_platform` is undone locally, and symmetrically for
//!   `mirror_to_platform`.
//! - A binding the user does not own is treated as `import_only`
//!   regardless of its requested mode.
//!
//! Changes apply in a fixed phase order chosen to minimize remote churn:
//! links, inbound adds, outbound adds, outbound removes, inbound removes,
//! conflict resolutions.

use crate::change::{ChangeDirection, ChangeKind, SyncChange};
use crate::detector::{ImportResolution, MembershipDiff};
use core_library::{Playlist, PlaylistPlatformBinding, SyncMode, Track, TrackId};
use std::collections::HashMap;

/// An ordered, selectable plan for one binding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    pub changes: Vec<SyncChange>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Changes that will apply, given the default selections.
    pub fn selected(&self) -> impl Iterator<Item = &SyncChange> {
        self.changes.iter().filter(|change| change.user_selected)
    }

    pub fn find(&self, change_id: &str) -> Option<&SyncChange> {
        self.changes.iter().find(|change| change.change_id == change_id)
    }

    /// Toggle one change's selection. Returns whether the id was known.
    pub fn set_selected(&mut self, change_id: &str, selected: bool) -> bool {
        match self
            .changes
            .iter_mut()
            .find(|change| change.change_id == change_id)
        {
            Some(change) => {
                change.user_selected = selected;
                true
            }
            None => false,
        }
    }
}

/// Stateless plan builder.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncPlanner;

impl SyncPlanner {
    /// Build the plan for one binding from a detection pass.
    ///
    /// `local_tracks` is the current playlist membership, used for
    /// human-facing descriptions.
    pub fn plan(
        &self,
        binding: &PlaylistPlatformBinding,
        playlist: &Playlist,
        local_tracks: &[Track],
        diff: &MembershipDiff,
    ) -> SyncPlan {
        // Shared or public playlists are import-only by policy.
        let mode = if binding.is_personal {
            binding.sync_mode
        } else {
            SyncMode::ImportOnly
        };

        let titles: HashMap<TrackId, &Track> =
            local_tracks.iter().map(|track| (track.id, track)).collect();
        let label = |track_id: TrackId| -> String {
            titles
                .get(&track_id)
                .map(|track| format!("{} - {}", track.artist, track.title))
                .unwrap_or_else(|| format!("track {track_id}"))
        };

        let outbound_allowed = !matches!(mode, SyncMode::ImportOnly | SyncMode::MirrorFromPlatform);
        let mut changes = Vec::new();

        // Remote playlist creation, when the binding has no counterpart yet.
        if binding.external_playlist_id.is_none() && outbound_allowed {
            changes.push(SyncChange::new(
                binding.id,
                ChangeDirection::LibraryToPlatform,
                ChangeKind::Link,
                None,
                None,
                format!(
                    "Create playlist '{}' on {}",
                    playlist.name, binding.platform
                ),
            ));
        }

        // Inbound additions.
        for addition in &diff.platform_added {
            let inbound_allowed = !matches!(mode, SyncMode::MirrorToPlatform);
            if inbound_allowed {
                let description = format!(
                    "Add '{} - {}' from {}",
                    addition.track.artist, addition.track.title, binding.platform
                );
                let mut change = SyncChange::new(
                    binding.id,
                    ChangeDirection::PlatformToLibrary,
                    ChangeKind::Add,
                    match &addition.resolution {
                        ImportResolution::Linked(track_id)
                        | ImportResolution::AutoMatch { track_id, .. }
                        | ImportResolution::Candidate { track_id, .. } => Some(*track_id),
                        ImportResolution::Unmatched => None,
                    },
                    Some(addition.track.id.as_str()),
                    description,
                )
                .with_remote_track(addition.track.clone());
                match &addition.resolution {
                    ImportResolution::AutoMatch { confidence, .. } => {
                        change = change.with_confidence(*confidence);
                    }
                    ImportResolution::Candidate { confidence, .. } => {
                        change = change.needing_confirmation(*confidence);
                    }
                    ImportResolution::Linked(_) | ImportResolution::Unmatched => {}
                }
                changes.push(change);
            } else {
                // Mirror-to-platform: the platform-side addition is undone
                // remotely so the library stays the source of truth.
                changes.push(SyncChange::new(
                    binding.id,
                    ChangeDirection::LibraryToPlatform,
                    ChangeKind::Remove,
                    None,
                    Some(addition.track.id.as_str()),
                    format!(
                        "Remove '{} - {}' from {} (library mirror)",
                        addition.track.artist, addition.track.title, binding.platform
                    ),
                ));
            }
        }

        // Inbound removals.
        for removal in &diff.platform_removed {
            match mode {
                SyncMode::AddOnly => {}
                SyncMode::MirrorToPlatform => {
                    // Re-push what the platform dropped.
                    changes.push(SyncChange::new(
                        binding.id,
                        ChangeDirection::LibraryToPlatform,
                        ChangeKind::Add,
                        removal.track_id,
                        Some(removal.external_id.as_str()),
                        format!(
                            "Restore {} on {} (library mirror)",
                            removal
                                .track_id
                                .map(|track_id| label(track_id))
                                .unwrap_or_else(|| removal.external_id.clone()),
                            binding.platform
                        ),
                    ));
                }
                _ => {
                    if let Some(track_id) = removal.track_id {
                        changes.push(SyncChange::new(
                            binding.id,
                            ChangeDirection::PlatformToLibrary,
                            ChangeKind::Remove,
                            Some(track_id),
                            Some(removal.external_id.as_str()),
                            format!(
                                "Remove '{}' (removed on {})",
                                label(track_id),
                                binding.platform
                            ),
                        ));
                    }
                }
            }
        }

        // Outbound additions (and the links that make them possible).
        for addition in &diff.library_added {
            match mode {
                SyncMode::ImportOnly => {}
                SyncMode::MirrorFromPlatform => {
                    // The platform lacks this track; the mirror wins and
                    // the local addition is reverted.
                    changes.push(SyncChange::new(
                        binding.id,
                        ChangeDirection::PlatformToLibrary,
                        ChangeKind::Remove,
                        Some(addition.track_id),
                        addition.linked_external_id.as_deref(),
                        format!(
                            "Revert local addition of '{}' (platform mirror)",
                            label(addition.track_id)
                        ),
                    ));
                }
                _ => {
                    let mut external_id = addition.linked_external_id.clone();
                    if let Some(proposal) = &addition.proposal {
                        let mut link = SyncChange::new(
                            binding.id,
                            ChangeDirection::LibraryToPlatform,
                            ChangeKind::Link,
                            Some(addition.track_id),
                            Some(proposal.remote.id.as_str()),
                            format!(
                                "Link '{}' to '{} - {}' on {}",
                                label(addition.track_id),
                                proposal.remote.artist,
                                proposal.remote.title,
                                binding.platform
                            ),
                        )
                        .with_confidence(proposal.confidence)
                        .with_remote_track(proposal.remote.clone());
                        if !proposal.auto {
                            link = link.needing_confirmation(proposal.confidence);
                        }
                        changes.push(link);
                        external_id = Some(proposal.remote.id.clone());
                    }

                    let mut add = SyncChange::new(
                        binding.id,
                        ChangeDirection::LibraryToPlatform,
                        ChangeKind::Add,
                        Some(addition.track_id),
                        external_id.as_deref(),
                        format!(
                            "Add '{}' to {}",
                            label(addition.track_id),
                            binding.platform
                        ),
                    );
                    // An add riding on an unconfirmed candidate match must
                    // not push until the link is confirmed.
                    if let Some(proposal) = &addition.proposal {
                        if !proposal.auto {
                            add = add.needing_confirmation(proposal.confidence);
                        }
                    }
                    changes.push(add);
                }
            }
        }

        // Outbound removals.
        for removal in &diff.library_removed {
            match mode {
                SyncMode::ImportOnly | SyncMode::AddOnly => {}
                SyncMode::MirrorFromPlatform => {
                    // The platform still has it; the mirror wins and the
                    // track comes back locally.
                    if let Some(external_id) = &removal.external_id {
                        changes.push(SyncChange::new(
                            binding.id,
                            ChangeDirection::PlatformToLibrary,
                            ChangeKind::Add,
                            Some(removal.track_id),
                            Some(external_id.as_str()),
                            format!(
                                "Restore '{}' locally (platform mirror)",
                                label(removal.track_id)
                            ),
                        ));
                    }
                }
                _ => {
                    if let Some(external_id) = &removal.external_id {
                        changes.push(SyncChange::new(
                            binding.id,
                            ChangeDirection::LibraryToPlatform,
                            ChangeKind::Remove,
                            Some(removal.track_id),
                            Some(external_id.as_str()),
                            format!(
                                "Remove '{}' from {}",
                                label(removal.track_id),
                                binding.platform
                            ),
                        ));
                    }
                }
            }
        }

        // Metadata conflicts; unresolved until the user picks a side.
        for conflict in &diff.conflicts {
            changes.push(
                SyncChange::new(
                    binding.id,
                    ChangeDirection::PlatformToLibrary,
                    ChangeKind::Conflict,
                    Some(conflict.track_id),
                    Some(conflict.external_id.as_str()),
                    format!(
                        "Metadata conflict on '{}' vs '{} - {}' ({})",
                        label(conflict.track_id),
                        conflict.remote.artist,
                        conflict.remote.title,
                        binding.platform
                    ),
                )
                .with_remote_track(conflict.remote.clone())
                .with_confidence(conflict.confidence)
                .unselected(),
            );
        }

        changes.sort_by_key(|change| phase_rank(change));
        SyncPlan { changes }
    }
}

/// The deterministic apply order of the executor: links first, then
/// inbound adds, outbound adds, outbound removes, inbound removes,
/// conflicts.
pub(crate) fn phase_rank(change: &SyncChange) -> u8 {
    match (change.kind, change.direction) {
        (ChangeKind::Link, _) => 0,
        (ChangeKind::Add, ChangeDirection::PlatformToLibrary) => 1,
        (ChangeKind::Add, ChangeDirection::LibraryToPlatform) => 2,
        (ChangeKind::Remove, ChangeDirection::LibraryToPlatform) => 3,
        (ChangeKind::Remove, ChangeDirection::PlatformToLibrary) => 4,
        (ChangeKind::Conflict, _) => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{
        ExportProposal, ImportResolution, LibraryAddition, LibraryRemoval, MetadataConflict,
        PlatformAddition, PlatformRemoval,
    };
    use core_library::{BindingId, PlaylistId};
    use platform_traits::{ExtTrack, Platform};

    fn binding(mode: SyncMode, personal: bool, external: Option<&str>) -> PlaylistPlatformBinding {
        let mut binding =
            PlaylistPlatformBinding::new(PlaylistId(1), Platform::Spotify).with_mode(mode);
        binding.id = BindingId(1);
        binding.is_personal = personal;
        binding.external_playlist_id = external.map(str::to_string);
        binding
    }

    fn playlist() -> Playlist {
        let mut playlist = Playlist::new("Workout");
        playlist.id = PlaylistId(1);
        playlist
    }

    fn local(id: i64, title: &str) -> Track {
        let mut track = Track::new(title, "Artist");
        track.id = TrackId(id);
        track
    }

    fn planner() -> SyncPlanner {
        SyncPlanner
    }

    fn divergent_diff() -> MembershipDiff {
        MembershipDiff {
            platform_added: vec![PlatformAddition {
                track: ExtTrack::new("r5", "Five", "Artist"),
                resolution: ImportResolution::Unmatched,
            }],
            platform_removed: vec![PlatformRemoval {
                external_id: "r3".to_string(),
                track_id: Some(TrackId(3)),
            }],
            library_added: vec![LibraryAddition {
                track_id: TrackId(4),
                linked_external_id: Some("r4".to_string()),
                proposal: None,
            }],
            library_removed: vec![LibraryRemoval {
                track_id: TrackId(2),
                external_id: Some("r2".to_string()),
            }],
            conflicts: vec![],
            unchanged: vec![TrackId(1)],
        }
    }

    fn kinds(plan: &SyncPlan) -> Vec<(ChangeKind, ChangeDirection)> {
        plan.changes
            .iter()
            .map(|change| (change.kind, change.direction))
            .collect()
    }

    #[test]
    fn test_first_export_plans_playlist_creation_and_adds() {
        let diff = MembershipDiff {
            library_added: vec![
                LibraryAddition {
                    track_id: TrackId(1),
                    linked_external_id: Some("e1".to_string()),
                    proposal: None,
                },
                LibraryAddition {
                    track_id: TrackId(2),
                    linked_external_id: Some("e2".to_string()),
                    proposal: None,
                },
            ],
            ..Default::default()
        };
        let tracks = vec![local(1, "One"), local(2, "Two")];
        let plan = planner().plan(
            &binding(SyncMode::FullBidirectional, true, None),
            &playlist(),
            &tracks,
            &diff,
        );

        assert_eq!(
            kinds(&plan),
            vec![
                (ChangeKind::Link, ChangeDirection::LibraryToPlatform),
                (ChangeKind::Add, ChangeDirection::LibraryToPlatform),
                (ChangeKind::Add, ChangeDirection::LibraryToPlatform),
            ]
        );
        // The creation change carries no identifiers.
        assert!(plan.changes[0].track_id.is_none());
        assert!(plan.changes[0].external_id.is_none());
        assert!(plan.changes.iter().all(|change| change.user_selected));
    }

    #[test]
    fn test_full_bidirectional_keeps_all_four_directions() {
        let tracks = vec![local(1, "One"), local(4, "Four")];
        let plan = planner().plan(
            &binding(SyncMode::FullBidirectional, true, Some("sp-1")),
            &playlist(),
            &tracks,
            &divergent_diff(),
        );

        assert_eq!(
            kinds(&plan),
            vec![
                (ChangeKind::Add, ChangeDirection::PlatformToLibrary),
                (ChangeKind::Add, ChangeDirection::LibraryToPlatform),
                (ChangeKind::Remove, ChangeDirection::LibraryToPlatform),
                (ChangeKind::Remove, ChangeDirection::PlatformToLibrary),
            ]
        );
    }

    #[test]
    fn test_import_only_discards_outbound() {
        let plan = planner().plan(
            &binding(SyncMode::ImportOnly, true, Some("sp-1")),
            &playlist(),
            &[],
            &divergent_diff(),
        );
        assert!(plan
            .changes
            .iter()
            .all(|change| change.direction == ChangeDirection::PlatformToLibrary));
        assert_eq!(plan.changes.len(), 2);
    }

    #[test]
    fn test_add_only_discards_removals() {
        let plan = planner().plan(
            &binding(SyncMode::AddOnly, true, Some("sp-1")),
            &playlist(),
            &[],
            &divergent_diff(),
        );
        assert!(plan
            .changes
            .iter()
            .all(|change| change.kind == ChangeKind::Add));
        assert_eq!(plan.changes.len(), 2);
    }

    #[test]
    fn test_mirror_from_platform_wins_on_the_library_side() {
        let plan = planner().plan(
            &binding(SyncMode::MirrorFromPlatform, true, Some("sp-1")),
            &playlist(),
            &[],
            &divergent_diff(),
        );

        // Local divergence is undone locally: the post-snapshot local add
        // is reverted, the local removal is restored, and the platform's
        // own edits flow in. Nothing outbound.
        assert!(plan
            .changes
            .iter()
            .all(|change| change.direction == ChangeDirection::PlatformToLibrary));
        let kinds = kinds(&plan);
        assert!(kinds.contains(&(ChangeKind::Add, ChangeDirection::PlatformToLibrary)));
        assert!(kinds.contains(&(ChangeKind::Remove, ChangeDirection::PlatformToLibrary)));
        // Revert of the local addition of track 4.
        assert!(plan
            .changes
            .iter()
            .any(|change| change.kind == ChangeKind::Remove
                && change.track_id == Some(TrackId(4))));
        // Restore of the locally removed track 2.
        assert!(plan
            .changes
            .iter()
            .any(|change| change.kind == ChangeKind::Add && change.track_id == Some(TrackId(2))));
    }

    #[test]
    fn test_mirror_to_platform_wins_on_the_platform_side() {
        let plan = planner().plan(
            &binding(SyncMode::MirrorToPlatform, true, Some("sp-1")),
            &playlist(),
            &[],
            &divergent_diff(),
        );

        assert!(plan
            .changes
            .iter()
            .all(|change| change.direction == ChangeDirection::LibraryToPlatform));
        // The platform-side addition r5 is removed remotely; the
        // platform-side removal of r3 is pushed back.
        assert!(plan
            .changes
            .iter()
            .any(|change| change.kind == ChangeKind::Remove
                && change.external_id.as_deref() == Some("r5")));
        assert!(plan
            .changes
            .iter()
            .any(|change| change.kind == ChangeKind::Add
                && change.external_id.as_deref() == Some("r3")));
    }

    #[test]
    fn test_shared_binding_is_forced_import_only() {
        // Requested full bidirectional, but the playlist is not owned.
        let plan = planner().plan(
            &binding(SyncMode::FullBidirectional, false, Some("sp-1")),
            &playlist(),
            &[],
            &divergent_diff(),
        );
        assert!(plan
            .changes
            .iter()
            .all(|change| change.direction == ChangeDirection::PlatformToLibrary));
    }

    #[test]
    fn test_candidate_import_needs_confirmation_and_is_unselected() {
        let diff = MembershipDiff {
            platform_added: vec![PlatformAddition {
                track: ExtTrack::new("r9", "Blue Monday", "New Order"),
                resolution: ImportResolution::Candidate {
                    track_id: TrackId(1),
                    confidence: 0.70,
                },
            }],
            ..Default::default()
        };
        let plan = planner().plan(
            &binding(SyncMode::FullBidirectional, true, Some("sp-1")),
            &playlist(),
            &[],
            &diff,
        );

        let change = &plan.changes[0];
        assert!(change.needs_confirmation);
        assert!(!change.user_selected);
        assert_eq!(change.confidence, Some(0.70));
        assert!(plan.selected().next().is_none());
    }

    #[test]
    fn test_candidate_export_link_needs_confirmation() {
        let diff = MembershipDiff {
            library_added: vec![LibraryAddition {
                track_id: TrackId(1),
                linked_external_id: None,
                proposal: Some(ExportProposal {
                    remote: ExtTrack::new("found", "Blue Monday", "New Order"),
                    confidence: 0.7,
                    auto: false,
                }),
            }],
            ..Default::default()
        };
        let tracks = vec![local(1, "Blue Monday")];
        let plan = planner().plan(
            &binding(SyncMode::FullBidirectional, true, Some("sp-1")),
            &playlist(),
            &tracks,
            &diff,
        );

        let link = plan
            .changes
            .iter()
            .find(|change| change.kind == ChangeKind::Link)
            .unwrap();
        assert!(link.needs_confirmation);
        assert!(!link.user_selected);
        // The outbound add references the proposed counterpart but also
        // waits for confirmation.
        let add = plan
            .changes
            .iter()
            .find(|change| change.kind == ChangeKind::Add)
            .unwrap();
        assert_eq!(add.external_id.as_deref(), Some("found"));
        assert!(add.needs_confirmation);
        assert!(!add.user_selected);
    }

    #[test]
    fn test_conflicts_default_to_unselected() {
        let diff = MembershipDiff {
            conflicts: vec![MetadataConflict {
                track_id: TrackId(1),
                external_id: "r1".to_string(),
                confidence: 0.2,
                remote: ExtTrack::new("r1", "Other", "Artist"),
            }],
            ..Default::default()
        };
        let plan = planner().plan(
            &binding(SyncMode::FullBidirectional, true, Some("sp-1")),
            &playlist(),
            &[],
            &diff,
        );
        assert_eq!(plan.changes[0].kind, ChangeKind::Conflict);
        assert!(!plan.changes[0].user_selected);
        assert!(plan.changes[0].conflict_resolution.is_none());
    }

    #[test]
    fn test_plan_ids_are_stable_across_replans() {
        let tracks = vec![local(1, "One"), local(4, "Four")];
        let reference = binding(SyncMode::FullBidirectional, true, Some("sp-1"));
        let first = planner().plan(&reference, &playlist(), &tracks, &divergent_diff());
        let second = planner().plan(&reference, &playlist(), &tracks, &divergent_diff());

        let first_ids: Vec<&str> = first.changes.iter().map(|c| c.change_id.as_str()).collect();
        let second_ids: Vec<&str> =
            second.changes.iter().map(|c| c.change_id.as_str()).collect();
        assert_eq!(first_ids, second_ids);
    }

    #[test]
    fn test_selection_toggle() {
        let mut plan = planner().plan(
            &binding(SyncMode::FullBidirectional, true, Some("sp-1")),
            &playlist(),
            &[],
            &divergent_diff(),
        );
        let id = plan.changes[0].change_id.clone();
        assert!(plan.set_selected(&id, false));
        assert!(!plan.find(&id).unwrap().user_selected);
        assert!(!plan.set_selected("unknown", false));
    }
}
