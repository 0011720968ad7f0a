// System module - host and app metadata

use async_trait::async_trait;
use hive_runtime::{ApiCall, ApiMap, AppInfo, Module};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SystemInfo {
    host_version: &'static str,
    platform: &'static str,
    arch: &'static str,
    app_id: String,
    app_name: String,
    session: String,
    launched_at: String,
}

pub struct SystemModule {
    info: SystemInfo,
}

impl SystemModule {
    pub fn new(app: &AppInfo) -> Self {
        Self {
            info: SystemInfo {
                host_version: env!("CARGO_PKG_VERSION"),
                platform: std::env::consts::OS,
                arch: std::env::consts::ARCH,
                app_id: app.app_id.clone(),
                app_name: app.name.clone(),
                session: app.session.clone(),
                launched_at: chrono::Utc::now().to_rfc3339(),
            },
        }
    }
}

#[async_trait]
impl Module for SystemModule {
    fn name(&self) -> &str {
        "system"
    }

    fn api_map(&self) -> ApiMap {
        let info = self.info.clone();
        ApiMap::new().with_fn("system.info", move |call: ApiCall| {
            let info = info.clone();
            async move {
                let mut value = serde_json::to_value(&info).map_err(|e| {
                    hive_types::CallError::handler(e.to_string())
                })?;
                value["caller"] = serde_json::to_value(call.caller).unwrap_or(Value::Null);
                Ok(value)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::shell::tests::{call_from_page, launch_demo};
    use serde_json::Value;

    #[tokio::test]
    async fn test_info_reports_app_and_caller() {
        let (shell, app) = launch_demo().await;

        let callback = call_from_page(&app, "system.info", Value::Null).await;
        assert!(callback.is_ok());
        assert_eq!(callback.data["appId"], "demo");
        assert_eq!(callback.data["session"], app.session());
        assert_eq!(callback.data["platform"], std::env::consts::OS);
        assert!(callback.data["caller"].is_u64());

        shell.shutdown().await;
    }
}
