// Binds the history synchronizer to the visible screen.

use super::*;

use crate::history::{HistoryEvent, RefreshOutcome};
use crate::state::HistoryViewState;

impl AppCore {
    /// The filter the history view wants polled right now, if it is visible.
    fn visible_history_filter(&self) -> Option<Option<String>> {
        if !self.foreground || !self.is_logged_in() {
            return None;
        }
        match self.state.router.top() {
            Screen::History { request_id } => Some(request_id.clone()),
            _ => None,
        }
    }

    /// Start, retarget or stop polling so that exactly one poll task runs
    /// while a history screen is on top, and none otherwise.
    pub(super) fn sync_history_to_router(&mut self) {
        let wanted = self.visible_history_filter();
        match wanted {
            Some(filter) => {
                let retarget = self.state.history.filter_request_id != filter;
                if self.history_epoch.is_some() && !retarget {
                    return;
                }
                if retarget {
                    self.state.history = HistoryViewState {
                        filter_request_id: filter.clone(),
                        items: vec![],
                        loaded: false,
                    };
                    self.emit_history();
                }
                if !self.network_enabled() {
                    return;
                }
                let epoch = self.history.start(self.runtime.handle(), filter);
                self.history_epoch = Some(epoch);
            }
            None => {
                if self.history_epoch.take().is_some() {
                    self.history.stop();
                }
            }
        }
    }

    pub(super) fn refresh_history(&mut self) {
        let Some(epoch) = self.history_epoch else {
            tracing::debug!("refresh ignored: history not visible");
            return;
        };
        if self.state.busy.refreshing_history {
            return;
        }
        self.set_busy(|b| b.refreshing_history = true);

        let history = self.history.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = history.refresh_now().await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::HistoryRefreshed {
                epoch,
                result,
            })));
        });
    }

    pub(super) fn handle_history_event(&mut self, event: HistoryEvent) {
        match event {
            HistoryEvent::Changed { epoch, snapshot } => {
                if self.history_epoch != Some(epoch) {
                    tracing::debug!(epoch, "ignoring history change from stopped poller");
                    return;
                }
                self.state.history.items = snapshot.into_items();
                self.state.history.loaded = true;
                self.emit_history();
            }
            HistoryEvent::SessionExpired { epoch } => {
                if self.history_epoch == Some(epoch) {
                    self.history_epoch = None;
                    self.expire_session();
                }
            }
        }
    }

    pub(super) fn handle_history_refreshed(
        &mut self,
        epoch: u64,
        result: Result<RefreshOutcome, ApiError>,
    ) {
        self.set_busy(|b| b.refreshing_history = false);
        if self.history_epoch != Some(epoch) {
            return;
        }
        match result {
            Ok(refresh) => {
                if refresh.scroll_to_top {
                    self.emit_scroll_to_top();
                }
            }
            Err(e) => self.handle_api_error(
                "history refresh",
                e,
                Some("Could not refresh history."),
            ),
        }
    }
}
