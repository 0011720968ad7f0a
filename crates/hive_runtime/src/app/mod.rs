//! Per-app coordinator
//!
//! [`AppHost::launch`] builds everything one running app needs and hands
//! back an [`AppHandle`]. The host itself lives on a single task, which is
//! what serializes every pool and page mutation.

mod handle;
mod host;
mod manifest;

pub use handle::{AppHandle, AppStatus};
pub use host::{AppHost, LIFECYCLE_KEY};
pub use manifest::{AppManifest, HostError, HostSettings};
