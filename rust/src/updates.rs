use crate::error::ApiError;
use crate::history::{HistoryEvent, RefreshOutcome};
use crate::state::{AppState, GenerationModel};
use crate::AppAction;

#[derive(uniffi::Enum, Clone, Debug)]
pub enum AppUpdate {
    FullState(AppState),
    /// Pull-to-refresh of the unfiltered history finished; scroll the list to the top.
    HistoryScrollToTop {
        rev: u64,
    },
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState(s) => s.rev,
            AppUpdate::HistoryScrollToTop { rev } => *rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(AppAction),
    Internal(Box<InternalEvent>),
}

#[derive(Debug)]
pub enum InternalEvent {
    // Async results
    ModelsLoaded {
        result: Result<Vec<GenerationModel>, ApiError>,
    },
    GenerationSubmitted {
        result: Result<String, ApiError>,
    },
    HistoryRefreshed {
        epoch: u64,
        result: Result<RefreshOutcome, ApiError>,
    },

    // Pushed by the history poll task.
    History(HistoryEvent),
}
