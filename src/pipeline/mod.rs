//! Unit pipeline
//!
//! Each analysis unit moves through `Loaded → Trimmed → Scored → Persisted →
//! Done`, or to `Failed` from any non-terminal state. Transitions are pure
//! (see [`state_machine`]); the [`UnitRunner`] performs the I/O that produces
//! them.

pub mod error;
pub mod runner;
pub mod state_machine;

pub use error::UnitError;
pub use runner::UnitRunner;
pub use state_machine::{apply_transition, state_to_outcome, Stage, StageTransition, StateError, UnitState};
