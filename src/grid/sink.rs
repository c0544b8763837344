use super::model::ScoreChange;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("save failed: {message}")]
pub struct SaveError {
    pub message: String,
}

impl SaveError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for SaveError {
    fn from(e: rusqlite::Error) -> Self {
        Self::new(e.to_string())
    }
}

/// The single write path for scores. Implementations must be idempotent per
/// key: sending the same (student, subject, score) twice is harmless.
pub trait SaveBatch {
    fn save_batch(&mut self, changes: &[ScoreChange]) -> Result<(), SaveError>;
}
