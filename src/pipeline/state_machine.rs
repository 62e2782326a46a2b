//! Pure unit stage state machine
//!
//! ```text
//! Pending ──Load──▶ Loaded ──Trim──▶ Trimmed ──Score──▶ Scored ──Persist──▶ Persisted ──Finish──▶ Done
//!    │                 │                 │                 │                   │
//!    └─────────────────┴──────Fail───────┴─────────────────┴───────────────────┴──▶ Failed
//! ```
//!
//! `Done` and `Failed` are terminal. A failed unit never carries a metric
//! record, only a failure record tagged with the stage that raised it.

use super::error::UnitError;
use crate::aggregation::{FailureRecord, MetricRecord, UnitOutcome};
use crate::scan::ScanVolume;
use crate::scoring::ScoreOutput;
use crate::session::AnalysisUnit;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unit of work performed between two states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Load,
    Trim,
    Score,
    Persist,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Load => "load",
            Stage::Trim => "trim",
            Stage::Score => "score",
            Stage::Persist => "persist",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum UnitState {
    Pending {
        unit: AnalysisUnit,
    },
    Loaded {
        unit: AnalysisUnit,
        volume: ScanVolume,
    },
    Trimmed {
        unit: AnalysisUnit,
        volume: ScanVolume,
    },
    Scored {
        unit: AnalysisUnit,
        volume: ScanVolume,
        output: ScoreOutput,
    },
    Persisted {
        unit: AnalysisUnit,
        record: MetricRecord,
    },
    Done {
        record: MetricRecord,
    },
    Failed {
        record: FailureRecord,
    },
}

impl UnitState {
    pub fn new(unit: AnalysisUnit) -> Self {
        UnitState::Pending { unit }
    }

    pub fn name(&self) -> &'static str {
        match self {
            UnitState::Pending { .. } => "Pending",
            UnitState::Loaded { .. } => "Loaded",
            UnitState::Trimmed { .. } => "Trimmed",
            UnitState::Scored { .. } => "Scored",
            UnitState::Persisted { .. } => "Persisted",
            UnitState::Done { .. } => "Done",
            UnitState::Failed { .. } => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitState::Done { .. } | UnitState::Failed { .. })
    }

    fn unit(&self) -> Option<&AnalysisUnit> {
        match self {
            UnitState::Pending { unit }
            | UnitState::Loaded { unit, .. }
            | UnitState::Trimmed { unit, .. }
            | UnitState::Scored { unit, .. }
            | UnitState::Persisted { unit, .. } => Some(unit),
            UnitState::Done { .. } | UnitState::Failed { .. } => None,
        }
    }
}

#[derive(Debug)]
pub enum StageTransition {
    Load { volume: ScanVolume },
    Trim { volume: ScanVolume },
    Score { output: ScoreOutput },
    Persist,
    Finish,
    Fail { error: UnitError },
}

impl StageTransition {
    pub fn name(&self) -> &'static str {
        match self {
            StageTransition::Load { .. } => "Load",
            StageTransition::Trim { .. } => "Trim",
            StageTransition::Score { .. } => "Score",
            StageTransition::Persist => "Persist",
            StageTransition::Finish => "Finish",
            StageTransition::Fail { .. } => "Fail",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Invalid transition from {from} with {transition}")]
    InvalidTransition {
        from: &'static str,
        transition: &'static str,
    },
}

/// Apply a transition to the current state
pub fn apply_transition(
    state: UnitState,
    transition: StageTransition,
) -> Result<UnitState, StateError> {
    match (state, transition) {
        (UnitState::Pending { unit }, StageTransition::Load { volume }) => {
            Ok(UnitState::Loaded { unit, volume })
        }

        (UnitState::Loaded { unit, .. }, StageTransition::Trim { volume }) => {
            Ok(UnitState::Trimmed { unit, volume })
        }

        (UnitState::Trimmed { unit, volume }, StageTransition::Score { output }) => {
            Ok(UnitState::Scored {
                unit,
                volume,
                output,
            })
        }

        (UnitState::Scored { unit, output, .. }, StageTransition::Persist) => {
            let record = MetricRecord::new(&unit, output.metrics);
            Ok(UnitState::Persisted { unit, record })
        }

        (UnitState::Persisted { record, .. }, StageTransition::Finish) => {
            Ok(UnitState::Done { record })
        }

        (state, StageTransition::Fail { error }) => match state.unit() {
            Some(unit) => Ok(UnitState::Failed {
                record: FailureRecord::new(unit, error.kind(), error.to_string())
                    .at_stage(error.stage()),
            }),
            None => Err(StateError::InvalidTransition {
                from: state.name(),
                transition: "Fail",
            }),
        },

        (state, transition) => Err(StateError::InvalidTransition {
            from: state.name(),
            transition: transition.name(),
        }),
    }
}

/// Outcome of a terminal state, `None` while work remains
pub fn state_to_outcome(state: UnitState) -> Option<UnitOutcome> {
    match state {
        UnitState::Done { record } => Some(UnitOutcome::Metrics(record)),
        UnitState::Failed { record } => Some(UnitOutcome::Failure(record)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::FailureKind;
    use crate::session::{ScanKind, StopIndex, UnitId, UnitKey, Window, WindowError};
    use std::path::PathBuf;

    fn unit() -> AnalysisUnit {
        AnalysisUnit {
            key: UnitKey {
                kind: ScanKind::Functional,
                id: UnitId::new("sub1", "ses1", "rest_1"),
            },
            site: None,
            path: PathBuf::from("/data/rest.nii.gz"),
            window: Window::new(5, StopIndex::At(2)),
            exclude_zeros: false,
        }
    }

    fn volume() -> ScanVolume {
        ScanVolume::from_f32([1, 1, 1, 2], vec![1.0, 2.0]).unwrap()
    }

    #[test]
    fn test_happy_path_reaches_done() {
        let mut state = UnitState::new(unit());
        for transition in [
            StageTransition::Load { volume: volume() },
            StageTransition::Trim { volume: volume() },
            StageTransition::Score {
                output: ScoreOutput::default().metric("snr", 3.0),
            },
            StageTransition::Persist,
            StageTransition::Finish,
        ] {
            assert!(!state.is_terminal());
            state = apply_transition(state, transition).unwrap();
        }
        assert!(state.is_terminal());
        match state_to_outcome(state) {
            Some(UnitOutcome::Metrics(record)) => assert_eq!(record.metrics["snr"], 3.0),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_fail_is_tagged_with_stage() {
        let state = UnitState::Loaded {
            unit: unit(),
            volume: volume(),
        };
        let error = UnitError::Range {
            window: unit().window,
            source: WindowError::Inverted { start: 5, stop: 2 },
        };
        let state = apply_transition(state, StageTransition::Fail { error }).unwrap();
        match state_to_outcome(state) {
            Some(UnitOutcome::Failure(record)) => {
                assert_eq!(record.kind, FailureKind::RangeError);
                assert_eq!(record.stage, Some(Stage::Trim));
                assert!(record.message.contains("start index 5 is after stop index 2"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_out_of_order_transition_is_rejected() {
        let err = apply_transition(UnitState::new(unit()), StageTransition::Finish).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid transition from Pending with Finish"
        );
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        let failed = UnitState::Failed {
            record: FailureRecord::new(&unit(), FailureKind::Crash, "boom"),
        };
        let error = UnitError::persist("/x", "disk full");
        assert!(apply_transition(failed, StageTransition::Fail { error }).is_err());
    }

    #[test]
    fn test_only_terminal_states_have_outcomes() {
        let done = UnitState::Done {
            record: MetricRecord::new(&unit(), Default::default()),
        };
        assert!(done.is_terminal());
        assert!(state_to_outcome(done).is_some_and(|o| o.is_success()));
        assert!(state_to_outcome(UnitState::new(unit())).is_none());
    }
}
