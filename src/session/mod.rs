//! Participant lists and their expansion into analysis units

pub mod resolver;
pub mod sublist;
pub mod types;

pub use resolver::{SessionResolver, UnitDefaults};
pub use sublist::{gather_raw_data, ParticipantList, ScanEntry, SessionEntry, SubjectEntry};
pub use types::{AnalysisUnit, ScanKind, StopIndex, UnitId, UnitKey, Window, WindowError};
