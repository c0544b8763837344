//! The interactive grade grid: cell state, validation, paste import, derived
//! aggregates and the save scheduler for one class-month session.

pub mod cells;
pub mod model;
pub mod nav;
pub mod paste;
pub mod scheduler;
pub mod session;
pub mod sink;
pub mod validate;

use serde::{Deserialize, Serialize};

pub use model::{AttendanceSummary, CellKey, GridSnapshot, ScoreChange, Student, Subject};
pub use session::GridSession;
pub use sink::{SaveBatch, SaveError};

pub const DEFAULT_AUTOSAVE_QUIET_MS: u64 = 1000;
pub const DEFAULT_MAX_PASTE_CELLS: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GridConfig {
    pub autosave_quiet_ms: u64,
    pub max_paste_cells: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            autosave_quiet_ms: DEFAULT_AUTOSAVE_QUIET_MS,
            max_paste_cells: DEFAULT_MAX_PASTE_CELLS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GridError {
    #[error("cell ({row}, {col}) is outside the grid")]
    OutOfBounds { row: usize, col: usize },
    #[error("no cell for student {student_id} and subject {subject_id}")]
    UnknownCell {
        student_id: String,
        subject_id: String,
    },
    #[error(transparent)]
    Paste(#[from] paste::PasteError),
    #[error(transparent)]
    Scheduler(#[from] scheduler::SchedulerError),
}

impl GridError {
    pub fn code(&self) -> &'static str {
        match self {
            GridError::OutOfBounds { .. } | GridError::UnknownCell { .. } => "not_found",
            GridError::Paste(paste::PasteError::TooLarge { .. }) => "paste_too_large",
            GridError::Scheduler(scheduler::SchedulerError::NotInBatch) => "not_in_batch",
            GridError::Scheduler(scheduler::SchedulerError::FlushInFlight) => "flush_in_flight",
            GridError::Scheduler(scheduler::SchedulerError::UnknownTicket(_)) => "not_found",
        }
    }
}
