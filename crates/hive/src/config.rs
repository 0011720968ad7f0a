//! Host Configuration
//!
//! `hive.toml` describes the host knobs and the apps it can launch:
//!
//! ```toml
//! [host]
//! preload = true
//!
//! [host.pool]
//! target_idle = 2
//! max_idle = 4
//!
//! [[apps]]
//! app_id = "demo"
//! entry = "pages/index"
//! tabs = ["pages/index", "pages/me"]
//!
//! [apps.pages]
//! "pages/index" = "render('index')"
//! "pages/me" = "render('me')"
//! ```
//!
//! Every key can be overridden from the environment, nested with `__`:
//! `HIVE_HOST__POOL__TARGET_IDLE=3`, `HIVE_LOG__JSON=true`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use hive_runtime::{AppManifest, HostError, HostSettings};
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "HIVE_";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] figment::Error),

    #[error("App '{app}': {source}")]
    App {
        app: String,
        #[source]
        source: HostError,
    },

    #[error("App '{0}' is declared more than once")]
    DuplicateApp(String),
}

/// Logging output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is unset
    pub filter: String,
    /// Emit JSON lines instead of the human format
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "hive=info,hive_runtime=info".to_string(),
            json: false,
        }
    }
}

/// Complete host configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub host: HostSettings,
    pub log: LogConfig,
    pub apps: Vec<AppManifest>,
}

impl HostConfig {
    /// Defaults, then the TOML file (if any), then `HIVE_` variables.
    pub fn figment(path: Option<&Path>) -> Result<Figment, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(HostConfig::default()));
        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            figment = figment.merge(Toml::file(path));
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(path)?)
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: HostConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Every manifest must be valid and app ids unique.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for app in &self.apps {
            app.validate().map_err(|source| ConfigError::App {
                app: app.app_id.clone(),
                source,
            })?;
            if !seen.insert(app.app_id.as_str()) {
                return Err(ConfigError::DuplicateApp(app.app_id.clone()));
            }
        }
        Ok(())
    }

    pub fn app(&self, app_id: &str) -> Option<&AppManifest> {
        self.apps.iter().find(|app| app.app_id == app_id)
    }

    /// The app launched when none are configured.
    pub fn demo_app() -> AppManifest {
        AppManifest::new("demo", "pages/index")
            .with_page("pages/index", "render('index')")
            .with_page("pages/detail", "render('detail')")
            .with_page("pages/me", "render('me')")
            .with_tab("pages/index")
            .with_tab("pages/me")
            .with_service_script("serve()")
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use hive_runtime::RegistryPolicy;

    use super::*;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_without_file() {
        let config = HostConfig::from_figment(Figment::from(Serialized::defaults(
            HostConfig::default(),
        )))
        .unwrap();
        assert_eq!(config.host, HostSettings::default());
        assert!(config.apps.is_empty());
        assert!(!config.log.json);
    }

    #[test]
    fn test_load_apps_and_pool_from_toml() {
        let file = write_config(
            r#"
            [host]
            preload = false
            policy = "strict"

            [host.pool]
            target_idle = 1
            max_idle = 3

            [[apps]]
            app_id = "shop"
            entry = "pages/index"
            tabs = ["pages/index", "pages/cart"]
            service_script = "serve()"

            [apps.pages]
            "pages/index" = "render('index')"
            "pages/cart" = "render('cart')"
            "#,
        );

        let figment = Figment::from(Serialized::defaults(HostConfig::default()))
            .merge(Toml::file(file.path()));
        let config = HostConfig::from_figment(figment).unwrap();

        assert!(!config.host.preload);
        assert_eq!(config.host.policy, RegistryPolicy::Strict);
        assert_eq!(config.host.pool.target_idle, 1);
        assert_eq!(config.host.pool.max_idle, 3);

        let shop = config.app("shop").unwrap();
        assert_eq!(shop.name, "");
        assert_eq!(shop.tabs.len(), 2);
        assert_eq!(shop.script_for("pages/cart"), Some("render('cart')"));
    }

    #[test]
    fn test_missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(
            HostConfig::load(Some(&path)),
            Err(ConfigError::NotFound(p)) if p == path
        ));
    }

    #[test]
    fn test_invalid_manifest_is_rejected() {
        let file = write_config(
            r#"
            [[apps]]
            app_id = "broken"
            entry = "pages/missing"
            "#,
        );
        let figment = Figment::from(Serialized::defaults(HostConfig::default()))
            .merge(Toml::file(file.path()));
        assert!(matches!(
            HostConfig::from_figment(figment),
            Err(ConfigError::App { app, .. }) if app == "broken"
        ));
    }

    #[test]
    fn test_duplicate_app_ids_are_rejected() {
        let mut config = HostConfig::default();
        config.apps.push(HostConfig::demo_app());
        config.apps.push(HostConfig::demo_app());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateApp(id)) if id == "demo"
        ));
    }

    #[test]
    fn test_environment_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "hive.toml",
                r#"
                [host.pool]
                target_idle = 1
                max_idle = 2
                "#,
            )?;
            jail.set_env("HIVE_HOST__POOL__MAX_IDLE", "6");
            jail.set_env("HIVE_LOG__JSON", "true");

            let config = HostConfig::load(Some(Path::new("hive.toml")))
                .map_err(|e| e.to_string())?;
            assert_eq!(config.host.pool.target_idle, 1);
            assert_eq!(config.host.pool.max_idle, 6);
            assert!(config.log.json);
            Ok(())
        });
    }
}
