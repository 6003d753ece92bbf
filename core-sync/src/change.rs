//! Sync change records.
//!
//! One [`SyncChange`] is one unit of diff: selectable by the user, tagged
//! with direction and kind, identified by a stable hash so re-planning an
//! unchanged world yields identical ids.

use core_library::{BindingId, TrackId};
use platform_traits::ExtTrack;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Which way a change flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeDirection {
    PlatformToLibrary,
    LibraryToPlatform,
}

impl ChangeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeDirection::PlatformToLibrary => "platform_to_library",
            ChangeDirection::LibraryToPlatform => "library_to_platform",
        }
    }
}

/// What a change does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Add,
    Remove,
    Link,
    Conflict,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Add => "add",
            ChangeKind::Remove => "remove",
            ChangeKind::Link => "link",
            ChangeKind::Conflict => "conflict",
        }
    }
}

/// How the user resolved a conflict change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Local metadata wins; the platform difference is accepted as-is.
    KeepLocal,
    /// Platform metadata overwrites the local track.
    KeepPlatform,
}

/// One selectable unit of diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncChange {
    /// Stable hash of binding, direction, kind and identifiers.
    pub change_id: String,
    pub binding_id: BindingId,
    pub direction: ChangeDirection,
    pub kind: ChangeKind,
    /// Local side of the change, when known.
    pub track_id: Option<TrackId>,
    /// Platform side of the change, when known.
    pub external_id: Option<String>,
    /// Human-facing description for the preview UI.
    pub description: String,
    /// Whether the change applies by default. Safe operations default to
    /// selected; anything needing confirmation defaults to unselected.
    pub user_selected: bool,
    /// Set when the match behind this change is a candidate, not certain.
    pub needs_confirmation: bool,
    /// Match confidence backing this change, when one was computed.
    pub confidence: Option<f64>,
    pub conflict_resolution: Option<ConflictResolution>,
    /// Remote metadata payload for imports and conflict resolution.
    pub remote_track: Option<ExtTrack>,
}

impl SyncChange {
    pub fn new(
        binding_id: BindingId,
        direction: ChangeDirection,
        kind: ChangeKind,
        track_id: Option<TrackId>,
        external_id: Option<&str>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            change_id: stable_change_id(binding_id, direction, kind, track_id, external_id),
            binding_id,
            direction,
            kind,
            track_id,
            external_id: external_id.map(str::to_string),
            description: description.into(),
            user_selected: true,
            needs_confirmation: false,
            confidence: None,
            conflict_resolution: None,
            remote_track: None,
        }
    }

    pub fn unselected(mut self) -> Self {
        self.user_selected = false;
        self
    }

    pub fn needing_confirmation(mut self, confidence: f64) -> Self {
        self.needs_confirmation = true;
        self.user_selected = false;
        self.confidence = Some(confidence);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_remote_track(mut self, track: ExtTrack) -> Self {
        self.remote_track = Some(track);
        self
    }
}

/// Hash of the identifying fields, hex-encoded and truncated. Identical
/// worlds plan identical ids across runs and processes.
pub fn stable_change_id(
    binding_id: BindingId,
    direction: ChangeDirection,
    kind: ChangeKind,
    track_id: Option<TrackId>,
    external_id: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(binding_id.0.to_be_bytes());
    hasher.update(direction.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(kind.as_str().as_bytes());
    hasher.update([0]);
    if let Some(track_id) = track_id {
        hasher.update(track_id.0.to_be_bytes());
    }
    hasher.update([0]);
    if let Some(external_id) = external_id {
        hasher.update(external_id.as_bytes());
    }
    let digest = hasher.finalize();
    let mut id = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        id.push_str(&format!("{byte:02x}"));
    }
    id
}
