//! Unit outcomes

use crate::pipeline::Stage;
use crate::session::{AnalysisUnit, ScanKind, UnitKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Classification of a unit failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    InputError,
    RangeError,
    ScoringError,
    PersistError,
    DispatchError,
    Timeout,
    Crash,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InputError => "InputError",
            FailureKind::RangeError => "RangeError",
            FailureKind::ScoringError => "ScoringError",
            FailureKind::PersistError => "PersistError",
            FailureKind::DispatchError => "DispatchError",
            FailureKind::Timeout => "Timeout",
            FailureKind::Crash => "Crash",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metrics produced by one successful unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub key: UnitKey,
    pub site: Option<String>,
    pub metrics: BTreeMap<String, f64>,
}

impl MetricRecord {
    pub fn new(unit: &AnalysisUnit, metrics: BTreeMap<String, f64>) -> Self {
        Self {
            key: unit.key.clone(),
            site: unit.site.clone(),
            metrics,
        }
    }

    pub fn kind(&self) -> ScanKind {
        self.key.kind
    }
}

/// Diagnostic for one failed unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub key: UnitKey,
    pub site: Option<String>,
    pub kind: FailureKind,
    /// Pipeline stage that failed, absent when the unit never ran
    pub stage: Option<Stage>,
    pub message: String,
}

impl FailureRecord {
    pub fn new(unit: &AnalysisUnit, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            key: unit.key.clone(),
            site: unit.site.clone(),
            kind,
            stage: None,
            message: message.into(),
        }
    }

    pub fn at_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            Some(stage) => write!(f, "{} [{} at {}]: {}", self.key, self.kind, stage, self.message),
            None => write!(f, "{} [{}]: {}", self.key, self.kind, self.message),
        }
    }
}

/// Exactly one of these is produced per unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UnitOutcome {
    Metrics(MetricRecord),
    Failure(FailureRecord),
}

impl UnitOutcome {
    pub fn key(&self) -> &UnitKey {
        match self {
            UnitOutcome::Metrics(record) => &record.key,
            UnitOutcome::Failure(record) => &record.key,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UnitOutcome::Metrics(_))
    }

    pub fn failure(unit: &AnalysisUnit, kind: FailureKind, message: impl Into<String>) -> Self {
        UnitOutcome::Failure(FailureRecord::new(unit, kind, message))
    }
}
