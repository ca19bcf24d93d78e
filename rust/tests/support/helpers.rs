#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use terra_core::{AppReconciler, AppState, AppUpdate};

pub fn wait_until(what: &str, timeout: Duration, f: impl FnMut() -> bool) {
    wait_until_with_poll(what, timeout, Duration::from_millis(20), f);
}

pub fn wait_until_with_poll(
    what: &str,
    timeout: Duration,
    poll: Duration,
    mut f: impl FnMut() -> bool,
) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return;
        }
        std::thread::sleep(poll);
    }
    panic!("{what}: condition not met within {timeout:?}");
}

pub async fn wait_until_async(what: &str, timeout: Duration, mut f: impl FnMut() -> bool) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("{what}: condition not met within {timeout:?}");
}

pub fn write_config(data_dir: &str, server_url: &str, poll_interval_ms: u64) {
    let path = std::path::Path::new(data_dir).join("terra_config.json");
    let v = serde_json::json!({
        "disable_network": false,
        "server_url": server_url,
        "history_poll_interval_ms": poll_interval_ms,
        "request_timeout_ms": 5_000,
    });
    std::fs::write(path, serde_json::to_vec(&v).unwrap()).unwrap();
}

pub fn write_offline_config(data_dir: &str) {
    let path = std::path::Path::new(data_dir).join("terra_config.json");
    let v = serde_json::json!({ "disable_network": true });
    std::fs::write(path, serde_json::to_vec(&v).unwrap()).unwrap();
}

#[derive(Clone)]
pub struct Collector(pub Arc<Mutex<Vec<AppUpdate>>>);

impl Collector {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn last_state(&self) -> Option<AppState> {
        self.0.lock().unwrap().iter().rev().find_map(|u| match u {
            AppUpdate::FullState(s) => Some(s.clone()),
            _ => None,
        })
    }

    pub fn last_toast(&self) -> Option<String> {
        self.last_state().and_then(|s| s.toast)
    }

    pub fn scroll_to_top_count(&self) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|u| matches!(u, AppUpdate::HistoryScrollToTop { .. }))
            .count()
    }

    pub fn revs(&self) -> Vec<u64> {
        self.0.lock().unwrap().iter().map(AppUpdate::rev).collect()
    }
}

impl AppReconciler for Collector {
    fn reconcile(&self, update: AppUpdate) {
        self.0.lock().unwrap().push(update);
    }
}
