use super::state_machine::Stage;
use crate::aggregation::FailureKind;
use crate::scan::ScanError;
use crate::scoring::ScoringError;
use crate::session::{Window, WindowError};
use std::path::PathBuf;

/// Failure of one unit's pipeline
#[derive(Debug, thiserror::Error)]
pub enum UnitError {
    #[error("cannot load {}: {source}", path.display())]
    Input {
        path: PathBuf,
        #[source]
        source: ScanError,
    },

    #[error("window {window} is invalid: {source}")]
    Range {
        window: Window,
        #[source]
        source: WindowError,
    },

    #[error("{0}")]
    Scoring(#[from] ScoringError),

    #[error("cannot write {}: {message}", path.display())]
    Persist { path: PathBuf, message: String },
}

impl UnitError {
    pub fn kind(&self) -> FailureKind {
        match self {
            UnitError::Input { .. } => FailureKind::InputError,
            UnitError::Range { .. } => FailureKind::RangeError,
            UnitError::Scoring(_) => FailureKind::ScoringError,
            UnitError::Persist { .. } => FailureKind::PersistError,
        }
    }

    /// Stage whose work raised this error
    pub fn stage(&self) -> Stage {
        match self {
            UnitError::Input { .. } => Stage::Load,
            UnitError::Range { .. } => Stage::Trim,
            UnitError::Scoring(_) => Stage::Score,
            UnitError::Persist { .. } => Stage::Persist,
        }
    }

    pub fn persist(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        UnitError::Persist {
            path: path.into(),
            message: message.to_string(),
        }
    }
}
