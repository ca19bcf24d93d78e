use crate::state::Screen;

#[derive(uniffi::Enum, Debug, Clone)]
pub enum AppAction {
    // Auth
    /// Hand over a token pair obtained by the platform login flow.
    CompleteLogin {
        access_token: String,
        refresh_token: String,
    },
    Logout,

    // Navigation
    PushScreen {
        screen: Screen,
    },
    UpdateScreenStack {
        stack: Vec<Screen>,
    },

    // Generation
    LoadModels,
    SelectModel {
        model_id: String,
    },
    SubmitGeneration {
        prompt: String,
        num_images: u32,
    },

    // History
    RefreshHistory,

    // UI
    ClearToast,

    // Lifecycle
    Foregrounded,
    Backgrounded,
}

impl AppAction {
    /// Log-safe action tag (never includes tokens).
    pub fn tag(&self) -> &'static str {
        match self {
            // Auth
            AppAction::CompleteLogin { .. } => "CompleteLogin",
            AppAction::Logout => "Logout",

            // Navigation
            AppAction::PushScreen { .. } => "PushScreen",
            AppAction::UpdateScreenStack { .. } => "UpdateScreenStack",

            // Generation
            AppAction::LoadModels => "LoadModels",
            AppAction::SelectModel { .. } => "SelectModel",
            AppAction::SubmitGeneration { .. } => "SubmitGeneration",

            // History
            AppAction::RefreshHistory => "RefreshHistory",

            // UI
            AppAction::ClearToast => "ClearToast",

            // Lifecycle
            AppAction::Foregrounded => "Foregrounded",
            AppAction::Backgrounded => "Backgrounded",
        }
    }
}
