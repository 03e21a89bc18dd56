use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:1350";
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    pub general: Option<GeneralConfig>,
    pub backend: Option<BackendConfig>,
    pub store: Option<StoreConfig>,
    pub fetch: Option<FetchConfig>,
    pub theme: Option<ThemeConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GeneralConfig {
    /// Prefills the participant gate.
    pub participant_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BackendConfig {
    pub base_url: Option<String>,
    /// Per-request timeout. Unset means requests may wait indefinitely.
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StoreConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FetchConfig {
    /// Upper bound on concurrent per-resource calls during a plan load.
    pub max_concurrency: Option<usize>,
}

/// Color overrides. Values are `"#rrggbb"`, `"r,g,b"` or a color name,
/// optionally followed by `bold`, `italic`, `dim` or `underline`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ThemeConfig {
    pub colors: Option<std::collections::HashMap<String, String>>,
}

impl AppConfig {
    pub fn load() -> Self {
        let Some(path) = default_config_path() else {
            return Self::default();
        };

        let Ok(contents) = std::fs::read_to_string(&path) else {
            return Self::default();
        };

        match toml::from_str(&contents) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring malformed config");
                Self::default()
            }
        }
    }

    /// Backend base URL: env override, then config file, then the local default.
    pub fn backend_url(&self) -> String {
        let from_env = ["PLANGLOW_BACKEND_URL", "REACT_APP_BACKEND_URL"]
            .iter()
            .filter_map(|k| std::env::var(k).ok())
            .map(|v| v.trim().to_string())
            .find(|v| !v.is_empty());
        let url = from_env
            .or_else(|| self.backend.as_ref().and_then(|b| b.base_url.clone()))
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());
        url.trim_end_matches('/').to_string()
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.backend
            .as_ref()
            .and_then(|b| b.timeout_secs)
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
    }

    pub fn store_path(&self) -> Option<PathBuf> {
        std::env::var("PLANGLOW_STORE_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .or_else(|| self.store.as_ref().and_then(|s| s.path.clone()))
            .or_else(|| app_dir().map(|d| d.join("counters.db")))
    }

    pub fn max_concurrency(&self) -> usize {
        self.fetch
            .as_ref()
            .and_then(|f| f.max_concurrency)
            .unwrap_or(DEFAULT_MAX_CONCURRENCY)
            .max(1)
    }

    pub fn participant_id(&self) -> Option<String> {
        std::env::var("PLANGLOW_PARTICIPANT")
            .ok()
            .or_else(|| self.general.as_ref().and_then(|g| g.participant_id.clone()))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

pub fn app_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".planglow"))
}

fn default_config_path() -> Option<PathBuf> {
    app_dir().map(|dir| dir.join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_config() {
        let cfg: AppConfig = toml::from_str(
            r#"
[backend]
base_url = "http://plans.internal:8080/"
timeout_secs = 30

[fetch]
max_concurrency = 0
"#,
        )
        .unwrap();

        assert_eq!(cfg.request_timeout(), Some(Duration::from_secs(30)));
        // Zero would stall every fan-out.
        assert_eq!(cfg.max_concurrency(), 1);
        assert!(cfg.general.is_none());
    }

    #[test]
    fn defaults_without_file() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.request_timeout(), None);
        assert_eq!(cfg.max_concurrency(), DEFAULT_MAX_CONCURRENCY);
    }
}
