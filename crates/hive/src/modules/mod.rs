//! Bundled capability modules
//!
//! In-memory modules every app gets unless the shell is given its own list.

mod storage;
mod system;

pub use storage::StorageModule;
pub use system::SystemModule;

use std::sync::Arc;

use hive_runtime::{AppInfo, Module, ModuleFactory};

/// Factories for `storage` and `system`, in registration order.
pub fn bundled() -> Vec<ModuleFactory> {
    vec![
        Arc::new(|app: &AppInfo| Arc::new(StorageModule::new(app)) as Arc<dyn Module>),
        Arc::new(|app: &AppInfo| Arc::new(SystemModule::new(app)) as Arc<dyn Module>),
    ]
}
