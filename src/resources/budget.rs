//! Budget manager and leases
//!
//! Admission is strictly first come, first served: a waiting request at the
//! head of the queue is never overtaken by a smaller request behind it, so
//! units are granted capacity in the order they asked for it.

use crate::config::RunConfig;
use crate::error::{ErrorCode, QapError};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::{debug, trace};

/// Global ceilings enforced by the budget manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BudgetCapacity {
    pub slots: usize,
    pub sessions: usize,
    pub memory_mb: u64,
}

impl BudgetCapacity {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            slots: config.num_processors,
            sessions: config.num_sessions_at_once,
            memory_mb: config.memory_ceiling_mb(),
        }
    }
}

/// Capacity asked for by one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LeaseRequest {
    pub slots: usize,
    pub memory_mb: u64,
}

impl LeaseRequest {
    pub fn new(slots: usize, memory_mb: u64) -> Self {
        Self { slots, memory_mb }
    }

    /// Even share of the budget for one of `sessions` concurrent units
    pub fn per_unit(capacity: &BudgetCapacity) -> Self {
        let sessions = capacity.sessions.max(1);
        Self {
            slots: (capacity.slots / sessions).max(1),
            memory_mb: capacity.memory_mb / sessions as u64,
        }
    }
}

impl fmt::Display for LeaseRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} slot(s), {} MB", self.slots, self.memory_mb)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BudgetError {
    #[error("request for {request} can never be granted (capacity {capacity_slots} slot(s), {capacity_memory_mb} MB)")]
    ExceedsCapacity {
        request: LeaseRequest,
        capacity_slots: usize,
        capacity_memory_mb: u64,
    },
    #[error("a lease must hold at least one processor slot")]
    EmptyRequest,
}

impl From<BudgetError> for QapError {
    fn from(err: BudgetError) -> Self {
        QapError::Other {
            code: ErrorCode::DISPATCH_BUDGET_EXCEEDED,
            message: err.to_string(),
            source: None,
        }
    }
}

/// Point-in-time view of budget usage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BudgetSnapshot {
    pub capacity: BudgetCapacity,
    pub slots_in_use: usize,
    pub memory_in_use_mb: u64,
    pub active_leases: usize,
    pub waiting: usize,
    pub peak_slots: usize,
    pub peak_memory_mb: u64,
    pub peak_leases: usize,
    pub granted_total: u64,
}

#[derive(Debug, Default)]
struct BudgetState {
    slots_in_use: usize,
    memory_in_use_mb: u64,
    active_leases: usize,
    queue: VecDeque<u64>,
    next_ticket: u64,
    peak_slots: usize,
    peak_memory_mb: u64,
    peak_leases: usize,
    granted_total: u64,
}

impl BudgetState {
    fn fits(&self, capacity: &BudgetCapacity, request: &LeaseRequest) -> bool {
        self.slots_in_use + request.slots <= capacity.slots
            && self.active_leases < capacity.sessions
            && self.memory_in_use_mb + request.memory_mb <= capacity.memory_mb
    }

    fn grant(&mut self, request: &LeaseRequest) {
        self.slots_in_use += request.slots;
        self.memory_in_use_mb += request.memory_mb;
        self.active_leases += 1;
        self.granted_total += 1;
        self.peak_slots = self.peak_slots.max(self.slots_in_use);
        self.peak_memory_mb = self.peak_memory_mb.max(self.memory_in_use_mb);
        self.peak_leases = self.peak_leases.max(self.active_leases);
    }

    fn give_back(&mut self, request: &LeaseRequest) {
        self.slots_in_use = self.slots_in_use.saturating_sub(request.slots);
        self.memory_in_use_mb = self.memory_in_use_mb.saturating_sub(request.memory_mb);
        self.active_leases = self.active_leases.saturating_sub(1);
    }
}

struct BudgetInner {
    capacity: BudgetCapacity,
    state: Mutex<BudgetState>,
    changed: Notify,
}

impl BudgetInner {
    fn lock(&self) -> MutexGuard<'_, BudgetState> {
        // Counters stay consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Grants and reclaims per-unit resource leases
#[derive(Clone)]
pub struct BudgetManager {
    inner: Arc<BudgetInner>,
}

impl BudgetManager {
    pub fn new(capacity: BudgetCapacity) -> Self {
        Self {
            inner: Arc::new(BudgetInner {
                capacity,
                state: Mutex::new(BudgetState::default()),
                changed: Notify::new(),
            }),
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(BudgetCapacity::from_config(config))
    }

    pub fn capacity(&self) -> BudgetCapacity {
        self.inner.capacity
    }

    /// The request every unit of this run makes
    pub fn unit_request(&self) -> LeaseRequest {
        LeaseRequest::per_unit(&self.inner.capacity)
    }

    fn check(&self, request: &LeaseRequest) -> Result<(), BudgetError> {
        let capacity = &self.inner.capacity;
        if request.slots == 0 {
            return Err(BudgetError::EmptyRequest);
        }
        if request.slots > capacity.slots || request.memory_mb > capacity.memory_mb {
            return Err(BudgetError::ExceedsCapacity {
                request: *request,
                capacity_slots: capacity.slots,
                capacity_memory_mb: capacity.memory_mb,
            });
        }
        Ok(())
    }

    /// Wait in line until `request` fits, then take it.
    ///
    /// Dropping the returned future gives up the place in line.
    pub async fn acquire(&self, request: LeaseRequest) -> Result<ResourceLease, BudgetError> {
        self.check(&request)?;

        let ticket = {
            let mut state = self.inner.lock();
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            state.queue.push_back(ticket);
            ticket
        };
        let mut place = QueuePlace {
            inner: &self.inner,
            ticket,
            waiting: true,
        };

        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(lease) = self.try_grant(ticket, request) {
                place.waiting = false;
                return Ok(lease);
            }
            trace!(ticket, "Waiting for {}", request);
            notified.await;
        }
    }

    /// Take `request` only if nobody is queued and it fits right now
    pub fn try_acquire(&self, request: LeaseRequest) -> Result<Option<ResourceLease>, BudgetError> {
        self.check(&request)?;
        let mut state = self.inner.lock();
        if !state.queue.is_empty() || !state.fits(&self.inner.capacity, &request) {
            return Ok(None);
        }
        state.grant(&request);
        drop(state);
        Ok(Some(self.lease(request)))
    }

    /// Return a lease early; identical to dropping it
    pub fn release(&self, lease: ResourceLease) {
        drop(lease);
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        let state = self.inner.lock();
        BudgetSnapshot {
            capacity: self.inner.capacity,
            slots_in_use: state.slots_in_use,
            memory_in_use_mb: state.memory_in_use_mb,
            active_leases: state.active_leases,
            waiting: state.queue.len(),
            peak_slots: state.peak_slots,
            peak_memory_mb: state.peak_memory_mb,
            peak_leases: state.peak_leases,
            granted_total: state.granted_total,
        }
    }

    fn try_grant(&self, ticket: u64, request: LeaseRequest) -> Option<ResourceLease> {
        let mut state = self.inner.lock();
        if state.queue.front() != Some(&ticket) || !state.fits(&self.inner.capacity, &request) {
            return None;
        }
        state.queue.pop_front();
        state.grant(&request);
        drop(state);
        // The next in line may fit as well
        self.inner.changed.notify_waiters();
        Some(self.lease(request))
    }

    fn lease(&self, request: LeaseRequest) -> ResourceLease {
        debug!("Granted lease of {}", request);
        ResourceLease {
            inner: Arc::clone(&self.inner),
            request,
        }
    }
}

/// Removes an abandoned ticket from the queue
struct QueuePlace<'a> {
    inner: &'a BudgetInner,
    ticket: u64,
    waiting: bool,
}

impl Drop for QueuePlace<'_> {
    fn drop(&mut self) {
        if !self.waiting {
            return;
        }
        let mut state = self.inner.lock();
        state.queue.retain(|t| *t != self.ticket);
        drop(state);
        trace!(ticket = self.ticket, "Abandoned place in budget queue");
        self.inner.changed.notify_waiters();
    }
}

/// Capacity held by one running unit, released on drop
pub struct ResourceLease {
    inner: Arc<BudgetInner>,
    request: LeaseRequest,
}

impl ResourceLease {
    pub fn slots(&self) -> usize {
        self.request.slots
    }

    pub fn memory_mb(&self) -> u64 {
        self.request.memory_mb
    }

    /// Fraction of the memory ceiling held by this lease
    pub fn memory_share(&self) -> f64 {
        let ceiling = self.inner.capacity.memory_mb;
        if ceiling == 0 {
            return 0.0;
        }
        self.request.memory_mb as f64 / ceiling as f64
    }
}

impl fmt::Debug for ResourceLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLease")
            .field("slots", &self.request.slots)
            .field("memory_mb", &self.request.memory_mb)
            .finish()
    }
}

impl Drop for ResourceLease {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        state.give_back(&self.request);
        drop(state);
        debug!("Released lease of {}", self.request);
        self.inner.changed.notify_waiters();
    }
}
