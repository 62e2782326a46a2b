//! Command implementation modules

pub mod run;
pub mod run_unit;
pub mod sublist;

pub use run::run_qap_command;
pub use run_unit::run_unit_command;
pub use sublist::run_sublist_command;
