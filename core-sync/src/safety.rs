//! # Safety Gate
//!
//! The policy filter between planner output and executor input. Every
//! change passes through [`SafetyGate::authorize`] before any adapter call:
//!
//! - **Ownership**: outbound changes against a binding the user does not
//!   own are refused.
//! - **System playlist**: removals against the library's system playlist
//!   are refused.
//! - **Test-prefix policy**: in test mode, remote mutations are only
//!   allowed on playlists whose names carry a declared test prefix.
//! - **Emergency stop**: a process-wide flag that fails every change and
//!   drains pending jobs.

use crate::change::{ChangeDirection, ChangeKind, SyncChange};
use crate::error::{Result, SyncError};
use core_library::{Playlist, PlaylistPlatformBinding};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Cloneable handle to the process-wide emergency stop flag.
#[derive(Debug, Clone, Default)]
pub struct EmergencyStop {
    flag: Arc<AtomicBool>,
}

impl EmergencyStop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engage(&self) {
        self.flag.store(true, Ordering::SeqCst);
        warn!("emergency stop engaged: all sync operations blocked");
    }

    pub fn release(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_engaged(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Static policy input to the gate.
#[derive(Debug, Clone, Default)]
pub struct SafetyPolicy {
    /// When set, remote mutations require a test-prefixed playlist name.
    pub test_mode_enabled: bool,
    pub test_prefixes: Vec<String>,
}

impl SafetyPolicy {
    pub fn from_settings(settings: &core_runtime::SyncSettings) -> Self {
        Self {
            test_mode_enabled: settings.test_mode_enabled,
            test_prefixes: settings.test_prefix_set.clone(),
        }
    }
}

/// The gate itself. Cheap to share; all state is the policy plus the
/// emergency-stop flag.
#[derive(Debug, Clone, Default)]
pub struct SafetyGate {
    policy: SafetyPolicy,
    stop: EmergencyStop,
}

impl SafetyGate {
    pub fn new(policy: SafetyPolicy) -> Self {
        Self {
            policy,
            stop: EmergencyStop::new(),
        }
    }

    /// The shared emergency-stop handle.
    pub fn emergency_stop(&self) -> EmergencyStop {
        self.stop.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_engaged()
    }

    /// Whether `name` carries one of the declared test prefixes.
    pub fn is_test_name(&self, name: &str) -> bool {
        self.policy
            .test_prefixes
            .iter()
            .any(|prefix| name.starts_with(prefix.as_str()))
    }

    /// Whether a change will mutate remote state when applied.
    fn mutates_remote(change: &SyncChange) -> bool {
        match change.direction {
            ChangeDirection::LibraryToPlatform => true,
            // Inbound links and imports only touch the local store.
            ChangeDirection::PlatformToLibrary => false,
        }
    }

    /// Authorize one change against one binding.
    ///
    /// Emergency stop surfaces as [`SyncError::Stopped`] (whole-job fatal);
    /// every other refusal is [`SyncError::NotPermitted`] and fails only
    /// the change at hand, before any adapter call is made.
    pub fn authorize(
        &self,
        change: &SyncChange,
        binding: &PlaylistPlatformBinding,
        playlist: &Playlist,
    ) -> Result<()> {
        if self.stop.is_engaged() {
            return Err(SyncError::Stopped);
        }

        if change.kind == ChangeKind::Remove && playlist.is_system {
            return Err(SyncError::NotPermitted(format!(
                "removals against system playlist '{}' are not allowed",
                playlist.name
            )));
        }

        if Self::mutates_remote(change) {
            if !binding.is_personal {
                return Err(SyncError::NotPermitted(format!(
                    "remote playlist on {} is not owned by the user",
                    binding.platform
                )));
            }
            if self.policy.test_mode_enabled && !self.is_test_name(&playlist.name) {
                return Err(SyncError::NotPermitted(format!(
                    "test mode: playlist '{}' lacks a test prefix",
                    playlist.name
                )));
            }
        }

        Ok(())
    }
}
