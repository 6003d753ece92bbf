//! # Runtime Support
//!
//! Cross-cutting infrastructure for the synchronization core: the
//! configuration surface, the broadcast event bus, and logging bootstrap.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::SyncSettings;
pub use error::{Result, RuntimeError};
pub use events::{CoreEvent, EventBus, SafetyEvent, SyncEvent, DEFAULT_EVENT_BUFFER_SIZE};
pub use logging::{init_logging, LogFormat, LoggingConfig};
