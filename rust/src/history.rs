// Polling synchronizer for the generation history view.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::api::ApiClient;
use crate::error::ApiError;
use crate::state::GenerationRequest;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Ordered history: every pending item, then every completed item, each
/// group in server order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HistorySnapshot(Vec<GenerationRequest>);

impl HistorySnapshot {
    pub fn from_server(items: Vec<GenerationRequest>) -> Self {
        let (mut pending, completed): (Vec<_>, Vec<_>) =
            items.into_iter().partition(GenerationRequest::is_pending);
        pending.extend(completed);
        Self(pending)
    }

    pub fn items(&self) -> &[GenerationRequest] {
        &self.0
    }

    pub fn into_items(self) -> Vec<GenerationRequest> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Changed(HistorySnapshot),
    Unchanged,
    /// The synchronizer was stopped or restarted while the request was in flight.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub outcome: FetchOutcome,
    pub scroll_to_top: bool,
}

#[derive(Debug)]
pub enum HistoryEvent {
    Changed {
        epoch: u64,
        snapshot: HistorySnapshot,
    },
    /// A poll hit an unrecoverable 401. The poll task has exited.
    SessionExpired { epoch: u64 },
}

pub type HistorySink = Arc<dyn Fn(HistoryEvent) + Send + Sync>;

#[derive(Default)]
struct Shared {
    // None until the first fetch for the current filter lands; that fetch
    // is always published, even when empty.
    last: Option<HistorySnapshot>,
    filter: Option<String>,
    epoch: u64,
}

/// Keeps the last published snapshot for one history view and polls for
/// changes while started.
///
/// Clones share state; any clone may stop the poll task.
#[derive(Clone)]
pub struct HistorySync {
    api: ApiClient,
    poll_interval: Duration,
    sink: HistorySink,
    shared: Arc<Mutex<Shared>>,
    poller: Arc<Mutex<Option<JoinHandle<()>>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poison) => poison.into_inner(),
    }
}

impl HistorySync {
    pub fn new(api: ApiClient, poll_interval: Duration, sink: HistorySink) -> Self {
        Self {
            api,
            poll_interval,
            sink,
            shared: Arc::new(Mutex::new(Shared::default())),
            poller: Arc::new(Mutex::new(None)),
        }
    }

    pub fn snapshot(&self) -> Option<HistorySnapshot> {
        lock(&self.shared).last.clone()
    }

    pub fn filter(&self) -> Option<String> {
        lock(&self.shared).filter.clone()
    }

    pub fn epoch(&self) -> u64 {
        lock(&self.shared).epoch
    }

    pub fn is_running(&self) -> bool {
        lock(&self.poller)
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Begin polling for `filter` (a generation batch id, or the full
    /// history). Replaces any running poll task. Returns the new epoch.
    pub fn start(&self, runtime: &Handle, filter: Option<String>) -> u64 {
        self.stop();

        let epoch = {
            let mut shared = lock(&self.shared);
            if shared.filter != filter {
                shared.last = None;
                shared.filter = filter.clone();
            }
            // Fetches issued between stop() and here belong to the old filter.
            shared.epoch = shared.epoch.wrapping_add(1);
            shared.epoch
        };
        tracing::info!(epoch, filter = ?filter, "history polling started");

        let this = self.clone();
        let task = runtime.spawn(async move { this.poll_loop(epoch).await });
        *lock(&self.poller) = Some(task);
        epoch
    }

    /// Cancel polling. Results of requests already in flight are discarded.
    pub fn stop(&self) {
        let task = lock(&self.poller).take();
        let mut shared = lock(&self.shared);
        shared.epoch = shared.epoch.wrapping_add(1);
        if let Some(task) = task {
            task.abort();
            tracing::info!(epoch = shared.epoch, "history polling stopped");
        }
    }

    /// Stop and forget everything (logout).
    pub fn reset(&self) {
        self.stop();
        let mut shared = lock(&self.shared);
        shared.last = None;
        shared.filter = None;
    }

    async fn poll_loop(&self, epoch: u64) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.fetch_for_epoch(epoch).await {
                Ok(FetchOutcome::Stale) => break,
                Ok(_) => {}
                Err(ApiError::SessionExpired) => {
                    (self.sink)(HistoryEvent::SessionExpired { epoch });
                    break;
                }
                Err(ApiError::NoCredential) => {
                    tracing::debug!("history poll skipped: no access token");
                }
                Err(e) => {
                    tracing::warn!(%e, "history poll failed; retrying next tick");
                }
            }
        }
    }

    /// One fetch for the current epoch.
    pub async fn fetch_once(&self) -> Result<FetchOutcome, ApiError> {
        let epoch = self.epoch();
        self.fetch_for_epoch(epoch).await
    }

    /// User-initiated fetch (pull-to-refresh).
    pub async fn refresh_now(&self) -> Result<RefreshOutcome, ApiError> {
        let epoch = self.epoch();
        let outcome = self.fetch_for_epoch(epoch).await?;
        let scroll_to_top = outcome != FetchOutcome::Stale && self.filter().is_none();
        Ok(RefreshOutcome {
            outcome,
            scroll_to_top,
        })
    }

    async fn fetch_for_epoch(&self, epoch: u64) -> Result<FetchOutcome, ApiError> {
        let filter = self.filter();
        let items = self.api.fetch_history(filter.as_deref()).await?;
        let candidate = HistorySnapshot::from_server(items);

        {
            let mut shared = lock(&self.shared);
            if shared.epoch != epoch {
                tracing::debug!(epoch, current = shared.epoch, "discarding stale history response");
                return Ok(FetchOutcome::Stale);
            }
            if shared.last.as_ref() == Some(&candidate) {
                return Ok(FetchOutcome::Unchanged);
            }
            shared.last = Some(candidate.clone());
        }

        tracing::debug!(items = candidate.len(), "history changed");
        (self.sink)(HistoryEvent::Changed {
            epoch,
            snapshot: candidate.clone(),
        });
        Ok(FetchOutcome::Changed(candidate))
    }
}
