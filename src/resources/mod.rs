//! Resource budget management
//!
//! The [`BudgetManager`] owns the run's processor, session and memory
//! ceilings. Units obtain a [`ResourceLease`] before executing; the lease
//! returns its capacity when dropped, whatever the unit's outcome.

pub mod budget;

pub use budget::{BudgetCapacity, BudgetError, BudgetManager, BudgetSnapshot, LeaseRequest, ResourceLease};
