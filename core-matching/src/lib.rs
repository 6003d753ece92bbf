//! # Track Identity & Matching
//!
//! Decides whether a library track and a platform track are the same song.
//!
//! ## Overview
//!
//! Matching runs in two layers:
//!
//! 1. **Strong identifiers**: when both sides carry one (ISRC, catalog
//!    release + position, file hash) equality alone yields confidence 1.0.
//! 2. **Weighted token-set similarity**: title 0.45, primary artist 0.30,
//!    album 0.15, duration agreement within ±3 s 0.10.
//!
//! A confidence at or above the auto threshold links automatically; in the
//! candidate band the match is surfaced for user confirmation; below that it
//! is discarded. Ties between equal-confidence candidates break
//! deterministically: shared album, then smallest duration delta, then
//! lowest external id.

mod normalize;

pub use normalize::normalize;

use platform_traits::ExtTrack;
use std::collections::BTreeSet;

/// Default confidence at or above which a match links automatically.
pub const DEFAULT_AUTO_THRESHOLD: f64 = 0.82;

/// Default confidence at or above which a match is kept as a candidate.
pub const DEFAULT_CANDIDATE_THRESHOLD: f64 = 0.60;

/// Duration agreement window in milliseconds.
const DURATION_WINDOW_MS: i64 = 3_000;

const TITLE_WEIGHT: f64 = 0.45;
const ARTIST_WEIGHT: f64 = 0.30;
const ALBUM_WEIGHT: f64 = 0.15;
const DURATION_WEIGHT: f64 = 0.10;

/// Matching thresholds.
#[derive(Debug, Clone, Copy)]
pub struct MatchConfig {
    /// Confidence at or above which the pair auto-links.
    pub auto_threshold: f64,
    /// Confidence at or above which the pair is kept as a candidate.
    pub candidate_threshold: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            auto_threshold: DEFAULT_AUTO_THRESHOLD,
            candidate_threshold: DEFAULT_CANDIDATE_THRESHOLD,
        }
    }
}

/// The metadata a match is computed from, platform-agnostic.
#[derive(Debug, Clone, Default)]
pub struct TrackFacts {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub duration_ms: Option<i64>,
    /// Strong external identifier (ISRC, release+position, file hash).
    pub strong_id: Option<String>,
}

impl TrackFacts {
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            ..Default::default()
        }
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: i64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_strong_id(mut self, strong_id: impl Into<String>) -> Self {
        self.strong_id = Some(strong_id.into());
        self
    }

    /// Facts for a platform-reported track.
    pub fn from_ext(track: &ExtTrack) -> Self {
        Self {
            title: track.title.clone(),
            artist: track.artist.clone(),
            album: track.album.clone(),
            duration_ms: track.duration_ms,
            strong_id: track.strong_id.clone(),
        }
    }
}

/// What to do with a computed confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchDecision {
    /// Link without confirmation.
    Auto,
    /// Surface for user confirmation.
    Candidate,
    /// Discard.
    NoMatch,
}

/// A scored platform candidate for one library track.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    /// External id of the candidate on its platform.
    pub external_id: String,
    pub confidence: f64,
    pub decision: MatchDecision,
    shares_album: bool,
    duration_delta_ms: i64,
}

/// Jaccard similarity over whitespace-delimited token sets.
///
/// Inputs are expected to be normalized already.
pub fn token_set_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return if a.is_empty() { 0.0 } else { 1.0 };
    }
    let set_a: BTreeSet<&str> = a.split_whitespace().collect();
    let set_b: BTreeSet<&str> = b.split_whitespace().collect();
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union as f64
}

/// Compute the match confidence in `[0, 1]` between two tracks.
///
/// Returns 0.0 when either side has an empty title or artist after
/// normalization.
pub fn score(local: &TrackFacts, other: &TrackFacts) -> f64 {
    let local_title = normalize(&local.title);
    let local_artist = normalize(&local.artist);
    let other_title = normalize(&other.title);
    let other_artist = normalize(&other.artist);

    if local_title.is_empty()
        || local_artist.is_empty()
        || other_title.is_empty()
        || other_artist.is_empty()
    {
        return 0.0;
    }

    if let (Some(a), Some(b)) = (&local.strong_id, &other.strong_id) {
        if !a.trim().is_empty() && a.trim().eq_ignore_ascii_case(b.trim()) {
            return 1.0;
        }
    }

    let mut confidence = TITLE_WEIGHT * token_set_similarity(&local_title, &other_title)
        + ARTIST_WEIGHT * token_set_similarity(&local_artist, &other_artist);

    if let (Some(a), Some(b)) = (&local.album, &other.album) {
        confidence += ALBUM_WEIGHT * token_set_similarity(&normalize(a), &normalize(b));
    }

    if let (Some(a), Some(b)) = (local.duration_ms, other.duration_ms) {
        if (a - b).abs() <= DURATION_WINDOW_MS {
            confidence += DURATION_WEIGHT;
        }
    }

    confidence
}

/// Classify a confidence against the thresholds. Both thresholds are
/// inclusive on their lower bound.
pub fn decide(confidence: f64, config: &MatchConfig) -> MatchDecision {
    if confidence >= config.auto_threshold {
        MatchDecision::Auto
    } else if confidence >= config.candidate_threshold {
        MatchDecision::Candidate
    } else {
        MatchDecision::NoMatch
    }
}

/// Score `candidates` against `local` and pick the best survivor.
///
/// Candidates below the candidate threshold are discarded. Equal
/// confidences break deterministically: album agreement first, then the
/// smallest duration delta, then the lexicographically lowest external id.
pub fn best_match(
    config: &MatchConfig,
    local: &TrackFacts,
    candidates: &[(String, TrackFacts)],
) -> Option<ScoredCandidate> {
    let local_album = local.album.as_deref().map(normalize);

    let mut scored: Vec<ScoredCandidate> = candidates
        .iter()
        .filter_map(|(external_id, facts)| {
            let confidence = score(local, facts);
            let decision = decide(confidence, config);
            if decision == MatchDecision::NoMatch {
                return None;
            }
            let shares_album = match (&local_album, &facts.album) {
                (Some(a), Some(b)) => !a.is_empty() && *a == normalize(b),
                _ => false,
            };
            let duration_delta_ms = match (local.duration_ms, facts.duration_ms) {
                (Some(a), Some(b)) => (a - b).abs(),
                _ => i64::MAX,
            };
            Some(ScoredCandidate {
                external_id: external_id.clone(),
                confidence,
                decision,
                shares_album,
                duration_delta_ms,
            })
        })
        .collect();

    scored.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| b.shares_album.cmp(&a.shares_album))
            .then_with(|| a.duration_delta_ms.cmp(&b.duration_delta_ms))
            .then_with(|| a.external_id.cmp(&b.external_id))
    });

    scored.into_iter().next()
}
