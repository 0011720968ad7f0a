// Storage module - per-app key/value map
//
// Values live in memory for the lifetime of one launch and are dropped when
// the app exits.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use hive_types::CallError;
use hive_runtime::{ApiCall, ApiMap, AppInfo, LifecycleNotice, Module, ModuleResult};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};

type Entries = Arc<Mutex<HashMap<String, Value>>>;

#[derive(Debug, Deserialize)]
struct SetParams {
    key: String,
    #[serde(default)]
    data: Value,
}

pub struct StorageModule {
    app_id: String,
    entries: Entries,
}

impl StorageModule {
    pub fn new(app: &AppInfo) -> Self {
        Self {
            app_id: app.app_id.clone(),
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl Module for StorageModule {
    fn name(&self) -> &str {
        "storage"
    }

    fn api_map(&self) -> ApiMap {
        let set = self.entries.clone();
        let get = self.entries.clone();
        let remove = self.entries.clone();
        let clear = self.entries.clone();

        ApiMap::new()
            .with_fn("storage.set", move |call: ApiCall| {
                let entries = set.clone();
                async move {
                    let params: SetParams = call.params()?;
                    entries.lock().insert(params.key, params.data);
                    Ok(Value::Null)
                }
            })
            .with_fn("storage.get", move |call: ApiCall| {
                let entries = get.clone();
                async move {
                    let key = call.str_arg("key")?;
                    let data = entries
                        .lock()
                        .get(key)
                        .cloned()
                        .ok_or_else(|| CallError::handler(format!("no data stored for '{key}'")))?;
                    Ok(json!({ "data": data }))
                }
            })
            .with_fn("storage.remove", move |call: ApiCall| {
                let entries = remove.clone();
                async move {
                    let key = call.str_arg("key")?;
                    let removed = entries.lock().remove(key).is_some();
                    Ok(json!({ "removed": removed }))
                }
            })
            .with_fn("storage.clear", move |_call: ApiCall| {
                let entries = clear.clone();
                async move {
                    entries.lock().clear();
                    Ok(Value::Null)
                }
            })
    }

    async fn on_exit(&self, _notice: &LifecycleNotice) -> ModuleResult<()> {
        let mut entries = self.entries.lock();
        tracing::debug!(app = %self.app_id, keys = entries.len(), "clearing storage");
        entries.clear();
        Ok(())
    }
}
