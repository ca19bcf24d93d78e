use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::AppCore;

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(super) struct AppConfig {
    pub(super) disable_network: Option<bool>,
    pub(super) server_url: Option<String>,
    pub(super) history_poll_interval_ms: Option<u64>,
    pub(super) request_timeout_ms: Option<u64>,
}

pub(super) fn load_app_config(data_dir: &str) -> AppConfig {
    let path = Path::new(data_dir).join("terra_config.json");
    let Ok(bytes) = std::fs::read(&path) else {
        return AppConfig::default();
    };
    match serde_json::from_slice::<AppConfig>(&bytes) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(%e, path = %path.display(), "ignoring malformed config");
            AppConfig::default()
        }
    }
}

impl AppConfig {
    pub(super) fn server_url(&self) -> String {
        if let Some(url) = self.server_url.as_deref().map(str::trim) {
            if !url.is_empty() {
                return url.to_string();
            }
        }
        if let Ok(url) = std::env::var("TERRA_SERVER_URL") {
            if !url.trim().is_empty() {
                return url.trim().to_string();
            }
        }
        DEFAULT_SERVER_URL.to_string()
    }

    pub(super) fn history_poll_interval(&self) -> Duration {
        self.history_poll_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(crate::history::DEFAULT_POLL_INTERVAL)
    }

    pub(super) fn request_timeout(&self) -> Duration {
        self.request_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl AppCore {
    pub(super) fn network_enabled(&self) -> bool {
        // Used to keep Rust tests deterministic and offline.
        if let Some(disable) = self.config.disable_network {
            return !disable;
        }
        std::env::var("TERRA_DISABLE_NETWORK").ok().as_deref() != Some("1")
    }
}
