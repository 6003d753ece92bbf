//! Cratesync workspace facade.
//!
//! Re-exports the workspace crates so host applications (desktop UI, CLI)
//! can depend on a single crate instead of wiring each member individually.

pub use core_library as library;
pub use core_matching as matching;
pub use core_runtime as runtime;
pub use core_sync as sync;
pub use platform_traits as platform;
