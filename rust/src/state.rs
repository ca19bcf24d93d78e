use serde::{Deserialize, Serialize};

#[derive(uniffi::Record, Clone, Debug)]
pub struct AppState {
    pub rev: u64,
    pub router: Router,
    pub auth: AuthState,
    pub busy: BusyState,
    pub models: Vec<GenerationModel>,
    pub selected_model_id: Option<String>,
    pub history: HistoryViewState,
    pub toast: Option<String>,
}

impl AppState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            router: Router {
                default_screen: Screen::Login,
                screen_stack: vec![],
            },
            auth: AuthState::LoggedOut,
            busy: BusyState::idle(),
            models: vec![],
            selected_model_id: None,
            history: HistoryViewState::empty(),
            toast: None,
        }
    }

    pub fn selected_model(&self) -> Option<&GenerationModel> {
        let id = self.selected_model_id.as_deref()?;
        self.models.iter().find(|m| m.id == id)
    }
}

/// "In flight" flags for requests the UI should reflect with spinners.
#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct BusyState {
    pub loading_models: bool,
    pub submitting_generation: bool,
    pub refreshing_history: bool,
}

impl BusyState {
    pub fn idle() -> Self {
        Self {
            loading_models: false,
            submitting_generation: false,
            refreshing_history: false,
        }
    }
}

#[derive(uniffi::Record, Clone, Debug)]
pub struct Router {
    pub default_screen: Screen,
    pub screen_stack: Vec<Screen>,
}

impl Router {
    pub fn top(&self) -> &Screen {
        self.screen_stack.last().unwrap_or(&self.default_screen)
    }
}

#[derive(uniffi::Enum, Clone, Debug, PartialEq)]
pub enum Screen {
    Login,
    Home,
    /// Generation history; `request_id` scopes it to one submitted batch.
    History {
        request_id: Option<String>,
    },
    ImageDetail {
        id: String,
    },
}

#[derive(uniffi::Enum, Clone, Debug, PartialEq, Eq)]
pub enum AuthState {
    LoggedOut,
    LoggedIn,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct GenerationModel {
    pub id: String,
    pub name: String,
    pub description: String,
    pub image_url: Option<String>,
}

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Pending,
    Completed,
}

/// One generated (or generating) image as reported by the backend.
///
/// `url` is `Some` exactly when `status` is `Completed`.
#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub id: String,
    pub request_id: Option<String>,
    pub prompt: String,
    pub status: GenerationStatus,
    pub created_at: i64,
    pub url: Option<String>,
}

impl GenerationRequest {
    pub fn is_pending(&self) -> bool {
        self.status == GenerationStatus::Pending
    }
}

#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct HistoryViewState {
    pub filter_request_id: Option<String>,
    pub items: Vec<GenerationRequest>,
    /// False until the first fetch for the current filter lands.
    pub loaded: bool,
}

impl HistoryViewState {
    pub fn empty() -> Self {
        Self {
            filter_request_id: None,
            items: vec![],
            loaded: false,
        }
    }
}

/// Whole days between `created_at` and `now` (both unix seconds), never negative.
pub fn days_since(created_at: i64, now: i64) -> i64 {
    (now - created_at).max(0) / 86_400
}

pub(crate) fn now_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}
