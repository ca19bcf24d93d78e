mod config;
mod generation;
mod history_view;
mod session;

use std::path::Path;
use std::sync::{Arc, RwLock};

use flume::Sender;

use crate::actions::AppAction;
use crate::api::{build_http_client, ApiClient};
use crate::error::ApiError;
use crate::history::{HistorySink, HistorySync};
use crate::session::SessionManager;
use crate::state::{BusyState, Screen};
use crate::store::{KeyValueStore, MemoryStore, SqliteStore};
use crate::updates::{AppUpdate, CoreMsg, InternalEvent};

pub struct AppCore {
    pub state: crate::state::AppState,
    rev: u64,

    update_sender: Sender<AppUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<crate::state::AppState>>,

    config: config::AppConfig,
    runtime: tokio::runtime::Runtime,

    session: Arc<SessionManager>,
    api: ApiClient,
    history: HistorySync,
    // Epoch of the poll task backing the visible history screen, if any.
    history_epoch: Option<u64>,
    foreground: bool,
}

impl AppCore {
    pub fn new(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        data_dir: String,
        shared_state: Arc<RwLock<crate::state::AppState>>,
    ) -> Self {
        let config = config::load_app_config(&data_dir);
        let state = crate::state::AppState::empty();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .enable_io()
            .build()
            .expect("tokio runtime");

        let store: Arc<dyn KeyValueStore> = match SqliteStore::open(Path::new(&data_dir)) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::error!(%e, "credential store unavailable; session will not persist");
                Arc::new(MemoryStore::new())
            }
        };
        let http = build_http_client(config.request_timeout()).unwrap_or_else(|e| {
            tracing::warn!(%e, "http client builder failed; using defaults");
            reqwest::Client::new()
        });
        let server_url = config.server_url();
        tracing::info!(server_url = %server_url, "backend configured");

        let session = Arc::new(SessionManager::new(store, http.clone(), &server_url));
        let api = ApiClient::new(http, &server_url, session.clone());

        let tx = core_sender.clone();
        let sink: HistorySink = Arc::new(move |event| {
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::History(event))));
        });
        let history = HistorySync::new(api.clone(), config.history_poll_interval(), sink);

        let mut this = Self {
            state,
            rev: 0,
            update_sender,
            core_sender,
            shared_state,
            config,
            runtime,
            session,
            api,
            history,
            history_epoch: None,
            foreground: true,
        };

        // Ensure FfiApp.state() has an immediately-available snapshot.
        let snapshot = this.state.clone();
        this.commit_state_snapshot(&snapshot);

        this.restore_session();
        this
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn commit_state_snapshot(&self, snapshot: &crate::state::AppState) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    fn emit_state(&mut self) {
        self.next_rev();
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_sender.send(AppUpdate::FullState(snapshot));
    }

    fn emit_auth(&mut self) {
        self.emit_state();
    }

    fn emit_router(&mut self) {
        self.emit_state();
    }

    fn emit_busy(&mut self) {
        // Busy flags are part of AppState; emit a full snapshot like everything else.
        self.emit_state();
    }

    fn emit_models(&mut self) {
        self.emit_state();
    }

    fn emit_history(&mut self) {
        self.emit_state();
    }

    fn emit_toast(&mut self) {
        self.emit_state();
    }

    fn emit_scroll_to_top(&mut self) {
        let rev = self.next_rev();
        // Keep snapshot rev in sync with the update stream even though this is a side-effect update.
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_sender.send(AppUpdate::HistoryScrollToTop { rev });
    }

    fn toast(&mut self, msg: impl Into<String>) {
        // Keep toast in state until the UI explicitly clears it.
        self.state.toast = Some(msg.into());
        self.emit_toast();
    }

    fn is_logged_in(&self) -> bool {
        self.session.access_token().is_some()
    }

    fn set_busy(&mut self, f: impl FnOnce(&mut BusyState)) {
        let mut next = self.state.busy.clone();
        f(&mut next);
        if next != self.state.busy {
            self.state.busy = next;
            self.emit_busy();
        }
    }

    /// Report a failed request. Anything that means "log in again" ends the
    /// session; other failures surface as `user_message` when the request was
    /// user-initiated and are only logged otherwise.
    fn handle_api_error(&mut self, what: &'static str, err: ApiError, user_message: Option<&str>) {
        if err.requires_login() {
            tracing::warn!(%err, what, "request needs a fresh login");
            self.expire_session();
            return;
        }
        tracing::warn!(%err, what, "request failed");
        if let Some(msg) = user_message {
            self.toast(msg);
        }
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(ref action) => {
                // Never log `?action` directly: it can contain tokens.
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action.clone());
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
        }
    }

    fn handle_action(&mut self, action: AppAction) {
        match action {
            AppAction::CompleteLogin {
                access_token,
                refresh_token,
            } => self.complete_login(&access_token, &refresh_token),
            AppAction::Logout => self.logout(),

            AppAction::PushScreen { screen } => {
                if !self.is_logged_in() && screen != Screen::Login {
                    tracing::debug!("ignoring navigation while logged out");
                    return;
                }
                if self.state.router.screen_stack.last() != Some(&screen) {
                    self.state.router.screen_stack.push(screen);
                    self.emit_router();
                }
                self.sync_history_to_router();
            }
            AppAction::UpdateScreenStack { stack } => {
                // Platform navigation already happened (e.g. back swipe); just mirror it.
                self.state.router.screen_stack = stack;
                self.emit_router();
                self.sync_history_to_router();
            }

            AppAction::LoadModels => self.load_models(),
            AppAction::SelectModel { model_id } => self.select_model(model_id),
            AppAction::SubmitGeneration { prompt, num_images } => {
                self.submit_generation(prompt, num_images)
            }

            AppAction::RefreshHistory => self.refresh_history(),

            AppAction::ClearToast => {
                if self.state.toast.is_some() {
                    self.state.toast = None;
                    self.emit_toast();
                }
            }

            AppAction::Foregrounded => {
                self.foreground = true;
                if self.is_logged_in() && self.state.models.is_empty() {
                    self.load_models();
                }
                self.sync_history_to_router();
            }
            AppAction::Backgrounded => {
                self.foreground = false;
                self.sync_history_to_router();
            }
        }
    }

    fn handle_internal(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::ModelsLoaded { result } => self.handle_models_loaded(result),
            InternalEvent::GenerationSubmitted { result } => {
                self.handle_generation_submitted(result)
            }
            InternalEvent::HistoryRefreshed { epoch, result } => {
                self.handle_history_refreshed(epoch, result)
            }
            InternalEvent::History(event) => self.handle_history_event(event),
        }
    }
}
