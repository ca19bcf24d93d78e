// Model catalogue and generation submission.

use super::*;

const MAX_IMAGES_PER_REQUEST: u32 = 3;

impl AppCore {
    pub(super) fn load_models(&mut self) {
        if !self.network_enabled() || self.state.busy.loading_models {
            return;
        }
        self.set_busy(|b| b.loading_models = true);

        let api = self.api.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = api.fetch_models().await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::ModelsLoaded {
                result,
            })));
        });
    }

    pub(super) fn handle_models_loaded(
        &mut self,
        result: Result<Vec<crate::state::GenerationModel>, ApiError>,
    ) {
        self.set_busy(|b| b.loading_models = false);
        if !self.is_logged_in() {
            return;
        }
        match result {
            Ok(models) => {
                tracing::info!(count = models.len(), "models loaded");
                let keep_selection = self
                    .state
                    .selected_model_id
                    .as_deref()
                    .map(|id| models.iter().any(|m| m.id == id))
                    .unwrap_or(false);
                if !keep_selection {
                    self.state.selected_model_id = None;
                }
                self.state.models = models;
                self.emit_models();
            }
            Err(e) => self.handle_api_error("models", e, Some("Could not load models.")),
        }
    }

    pub(super) fn select_model(&mut self, model_id: String) {
        if !self.state.models.iter().any(|m| m.id == model_id) {
            tracing::debug!(model_id = %model_id, "ignoring unknown model");
            return;
        }
        if self.state.selected_model_id.as_deref() != Some(model_id.as_str()) {
            self.state.selected_model_id = Some(model_id);
            self.emit_models();
        }
    }

    pub(super) fn submit_generation(&mut self, prompt: String, num_images: u32) {
        let prompt = prompt.trim().to_string();
        let model_id = self
            .state
            .selected_model()
            .map(|m| m.id.clone())
            .filter(|_| !prompt.is_empty());
        let Some(model_id) = model_id else {
            self.toast("Select a model and enter a prompt.");
            return;
        };
        if self.state.busy.submitting_generation {
            return;
        }
        if !self.network_enabled() {
            self.toast("Network disabled.");
            return;
        }
        let num_images = num_images.clamp(1, MAX_IMAGES_PER_REQUEST);
        self.set_busy(|b| b.submitting_generation = true);

        tracing::info!(model = %model_id, num_images, "submitting generation");
        let api = self.api.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = api.submit_generation(&prompt, &model_id, num_images).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::GenerationSubmitted { result },
            )));
        });
    }

    pub(super) fn handle_generation_submitted(&mut self, result: Result<String, ApiError>) {
        self.set_busy(|b| b.submitting_generation = false);
        match result {
            Ok(request_id) => {
                if !self.is_logged_in() {
                    return;
                }
                tracing::info!(request_id = %request_id, "generation accepted");
                self.state.router.screen_stack.push(Screen::History {
                    request_id: Some(request_id),
                });
                self.emit_router();
                self.sync_history_to_router();
            }
            Err(e) => self.handle_api_error(
                "generate",
                e,
                Some("Could not start generation."),
            ),
        }
    }
}
