// Session lifecycle as seen by the UI: routing and user-scoped state.

use super::*;

use crate::state::{AuthState, HistoryViewState};

impl AppCore {
    pub(super) fn restore_session(&mut self) {
        let logged_in = self.session.restore_session().is_some();
        self.state.auth = if logged_in {
            AuthState::LoggedIn
        } else {
            AuthState::LoggedOut
        };
        self.emit_auth();
        self.handle_auth_transition(logged_in);
        if logged_in {
            self.load_models();
        }
    }

    pub(super) fn complete_login(&mut self, access_token: &str, refresh_token: &str) {
        let access_token = access_token.trim();
        let refresh_token = refresh_token.trim();
        if access_token.is_empty() || refresh_token.is_empty() {
            self.toast("Login failed: missing credentials.");
            return;
        }
        if let Err(e) = self.session.complete_login(access_token, refresh_token) {
            tracing::error!(%e, "failed to persist credentials");
            self.toast(format!("Login failed: {e}"));
            return;
        }

        self.state.auth = AuthState::LoggedIn;
        self.emit_auth();
        self.handle_auth_transition(true);
        self.load_models();
    }

    pub(super) fn logout(&mut self) {
        self.end_session();
    }

    /// The backend no longer accepts our credentials and refresh did not help.
    pub(super) fn expire_session(&mut self) {
        if !matches!(self.state.auth, AuthState::LoggedIn) {
            return;
        }
        tracing::warn!("session expired; returning to login");
        self.end_session();
        self.toast("Session expired. Please log in again.");
    }

    fn end_session(&mut self) {
        self.history.reset();
        self.history_epoch = None;
        self.session.logout();
        self.state.auth = AuthState::LoggedOut;
        self.emit_auth();
        self.handle_auth_transition(false);
    }

    fn handle_auth_transition(&mut self, logged_in: bool) {
        self.state.router.screen_stack.clear();
        if logged_in {
            self.state.router.default_screen = Screen::Home;
            self.emit_router();
        } else {
            self.state.router.default_screen = Screen::Login;
            self.state.busy = BusyState::idle();
            self.state.models = vec![];
            self.state.selected_model_id = None;
            self.state.history = HistoryViewState::empty();
            self.emit_router();
        }
    }
}
