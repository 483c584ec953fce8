//! Reassignment scheduler.
//!
//! Every armed booking owns one tokio task that sleeps until the booking's
//! next check, runs it, and loops until the booking settles or is flagged.
//! The registry maps booking ids to slots; arming a booking that already has
//! a slot replaces it and cancels the old task. Checks for one booking are
//! serialized through a check lock that outlives individual slots, so a
//! superseded task that is already mid-check finishes before the new one
//! starts.
//!
//! ## Slot lifecycle
//!
//! ```text
//! arm ──► sleeping ──deadline──► checking ──Next::At──► sleeping
//!            │                       │
//!            │ cancel/shutdown       └──Next::Stop──► released
//!            ▼
//!          exited
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch, Mutex as CheckLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::core::audit::{AuditAction, AuditLog};
use crate::core::id_set::DecodeError;
use crate::core::matcher::MechanicMatcher;
use crate::core::model::{Booking, BookingId};
use crate::core::reassign::{self, Next, Precheck, Transition};
use crate::core::store::Storage;
use crate::core::{MatchError, StoreError};
use crate::util::clock;

struct Slot {
    generation: u64,
    // Dropping or firing the sender ends the task's wait.
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Registry {
    slots: HashMap<BookingId, Slot>,
    check_locks: HashMap<BookingId, Weak<CheckLock<()>>>,
    next_generation: u64,
    closed: bool,
}

struct Inner<S> {
    store: Arc<S>,
    matcher: MechanicMatcher<S>,
    cfg: SchedulerConfig,
    audit: AuditLog,
    registry: Mutex<Registry>,
    shutdown: watch::Sender<bool>,
}

/// Timer-driven reassignment of unconfirmed bookings.
pub struct ReassignmentScheduler<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for ReassignmentScheduler<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Storage> ReassignmentScheduler<S> {
    /// Create a scheduler with no armed bookings.
    pub fn new(store: Arc<S>, cfg: SchedulerConfig, audit: AuditLog) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                matcher: MechanicMatcher::new(Arc::clone(&store)),
                store,
                cfg,
                audit,
                registry: Mutex::new(Registry::default()),
                shutdown,
            }),
        }
    }

    /// Schedule the next check of `id` at `at`, replacing any pending check.
    ///
    /// Must be called from within a tokio runtime. Ignored after
    /// [`ReassignmentScheduler::shutdown`].
    pub fn arm(&self, id: BookingId, at: DateTime<Utc>) {
        let mut registry = self.inner.registry.lock();
        if registry.closed {
            warn!(booking_id = %id, "scheduler closed, not arming");
            return;
        }

        registry.check_locks.retain(|_, lock| lock.strong_count() > 0);
        let check_lock = registry
            .check_locks
            .get(&id)
            .and_then(Weak::upgrade)
            .unwrap_or_else(|| Arc::new(CheckLock::new(())));
        registry.check_locks.insert(id, Arc::downgrade(&check_lock));

        registry.next_generation += 1;
        let generation = registry.next_generation;
        let (cancel, cancelled) = oneshot::channel();
        let handle = tokio::spawn(run_slot(
            Arc::clone(&self.inner),
            id,
            generation,
            at,
            cancelled,
            check_lock,
        ));

        if let Some(previous) = registry.slots.insert(
            id,
            Slot {
                generation,
                cancel,
                handle,
            },
        ) {
            let _ = previous.cancel.send(());
            debug!(booking_id = %id, replaced = previous.generation, "re-armed");
        } else {
            debug!(booking_id = %id, %at, "armed");
        }
    }

    /// Cancel any pending check for `id`. Returns whether one existed.
    pub fn disarm(&self, id: BookingId) -> bool {
        let removed = self.inner.registry.lock().slots.remove(&id);
        removed.is_some_and(|slot| {
            let _ = slot.cancel.send(());
            true
        })
    }

    /// Whether `id` has a pending check.
    #[must_use]
    pub fn is_armed(&self, id: BookingId) -> bool {
        self.inner.registry.lock().slots.contains_key(&id)
    }

    /// Number of bookings with a pending check.
    #[must_use]
    pub fn armed_count(&self) -> usize {
        self.inner.registry.lock().slots.len()
    }

    /// Re-arm every persisted pending booking that has no confirmed mechanic
    /// and no error message. Returns how many were armed.
    ///
    /// # Errors
    ///
    /// Fails if pending bookings cannot be listed.
    pub async fn start_all(&self) -> Result<usize, StoreError> {
        let pending = self.inner.store.pending_bookings().await?;
        let now = clock::now();
        let mut armed = 0;
        for booking in pending {
            if !booking.is_unassigned_pending() {
                continue;
            }
            if let Some(message) = &booking.error_message {
                debug!(booking_id = %booking.id, message, "skipping flagged booking");
                continue;
            }
            let at = reassign::resume_at(booking.next_execution_at, now, &self.inner.cfg);
            self.arm(booking.id, at);
            armed += 1;
        }
        info!(armed, "reassignment schedulers started");
        Ok(armed)
    }

    /// Stop all waits, let in-flight checks finish, and join every task with
    /// a bounded timeout.
    pub async fn shutdown(&self) {
        let slots: Vec<(BookingId, Slot)> = {
            let mut registry = self.inner.registry.lock();
            if registry.closed {
                return;
            }
            registry.closed = true;
            registry.slots.drain().collect()
        };
        self.inner.shutdown.send_replace(true);

        let timeout = self.inner.cfg.shutdown_timeout();
        info!(tasks = slots.len(), "shutting down reassignment scheduler");
        for (id, slot) in slots {
            drop(slot.cancel);
            match tokio::time::timeout(timeout, slot.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(booking_id = %id, error = %e, "scheduler task failed"),
                Err(_) => warn!(booking_id = %id, "scheduler task did not exit in time, detaching"),
            }
        }
    }
}

async fn run_slot<S: Storage>(
    inner: Arc<Inner<S>>,
    id: BookingId,
    generation: u64,
    mut at: DateTime<Utc>,
    mut cancelled: oneshot::Receiver<()>,
    check_lock: Arc<CheckLock<()>>,
) {
    let mut shutdown = inner.shutdown.subscribe();
    loop {
        if *shutdown.borrow() {
            return;
        }
        let deadline = clock::deadline_for(at, clock::now());
        tokio::select! {
            () = tokio::time::sleep_until(deadline) => {}
            _ = &mut cancelled => {
                debug!(booking_id = %id, generation, "slot cancelled");
                return;
            }
            _ = shutdown.changed() => return,
        }

        let _guard = check_lock.lock().await;
        // Superseded while waiting for the previous check to finish.
        if !matches!(
            cancelled.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        ) {
            return;
        }

        match inner.check(id).await {
            Next::At(next) => at = next,
            Next::Stop => {
                inner.release(id, generation);
                return;
            }
        }
    }
}

impl<S: Storage> Inner<S> {
    async fn check(&self, id: BookingId) -> Next {
        let booking = match self.store.get_booking(id).await {
            Ok(booking) => booking,
            Err(StoreError::NotFound(_)) => {
                warn!(booking_id = %id, "booking vanished, stopping");
                return Next::Stop;
            }
            Err(e) => return self.retry(id, &e),
        };

        let (blacklisted, visited) = match reassign::precheck(&booking) {
            Precheck::Stop => {
                info!(
                    booking_id = %id,
                    status = ?booking.status,
                    confirmed = ?booking.confirmed_mechanic_id,
                    "booking settled, scheduler stopped"
                );
                self.audit.record(
                    id.to_string(),
                    AuditAction::Settled,
                    Some(format!("{:?}", booking.status)),
                );
                return Next::Stop;
            }
            Precheck::Corrupt(err) => {
                self.flag_corrupt(booking, &err).await;
                return Next::Stop;
            }
            Precheck::Match {
                blacklisted,
                visited,
            } => (blacklisted, visited),
        };

        let outcome = self.matcher.find(&blacklisted, &visited).await;
        if let Err(MatchError::Store(e)) = &outcome {
            return self.retry(id, e);
        }

        let step = reassign::apply(booking, visited, outcome.as_ref(), clock::now(), &self.cfg);
        match self.store.update_unassigned_booking(&step.booking).await {
            Ok(()) => {}
            // Cancelled or confirmed while the match was running.
            Err(StoreError::Conflict(reason)) => {
                info!(booking_id = %id, %reason, "booking settled during check, scheduler stopped");
                self.audit
                    .record(id.to_string(), AuditAction::Settled, Some(reason));
                return Next::Stop;
            }
            Err(StoreError::NotFound(_)) => {
                warn!(booking_id = %id, "booking vanished during check, stopping");
                return Next::Stop;
            }
            Err(e) => return self.retry(id, &e),
        }

        let subject = id.to_string();
        match step.transition {
            Transition::Reassigned => {
                let mechanic = step.booking.provisional_mechanic_id;
                info!(booking_id = %id, mechanic_id = %mechanic, "booking reassigned");
                self.audit.record(
                    subject,
                    AuditAction::Reassigned,
                    Some(mechanic.to_string()),
                );
            }
            Transition::CycleReset => {
                info!(booking_id = %id, "all mechanics visited, starting new cycle");
                self.audit.record(subject, AuditAction::CycleReset, None);
            }
            Transition::NoMechanic => {
                warn!(booking_id = %id, "no mechanic available, booking flagged");
                self.audit.record(subject, AuditAction::NoMechanic, None);
            }
        }
        step.next
    }

    fn retry(&self, id: BookingId, err: &StoreError) -> Next {
        warn!(
            booking_id = %id,
            error = %err,
            retry_in_secs = self.cfg.retry_delay_secs,
            "reassignment check failed, retrying"
        );
        self.audit
            .record(id.to_string(), AuditAction::Retried, Some(err.to_string()));
        Next::At(reassign::after(clock::now(), self.cfg.retry_delay_secs))
    }

    // Sets stay as persisted so they can be inspected and repaired.
    async fn flag_corrupt(&self, mut booking: Booking, err: &DecodeError) {
        error!(booking_id = %booking.id, error = %err, "exclusion sets unreadable, scheduler stopped");
        self.audit
            .record(booking.id.to_string(), AuditAction::Corrupt, Some(err.to_string()));
        booking.error_message = Some(err.to_string());
        booking.next_execution_at = None;
        booking.updated_at = clock::now();
        if let Err(e) = self.store.update_unassigned_booking(&booking).await {
            warn!(booking_id = %booking.id, error = %e, "could not persist corruption flag");
        }
    }

    fn release(&self, id: BookingId, generation: u64) {
        let mut registry = self.registry.lock();
        if registry
            .slots
            .get(&id)
            .is_some_and(|slot| slot.generation == generation)
        {
            registry.slots.remove(&id);
        }
    }
}
