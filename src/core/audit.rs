//! Audit trail of fulfillment decisions.
//!
//! The reassignment scheduler and the ledger report what they did here, so an
//! operator can reconstruct why a booking ended up with a given mechanic or an
//! error message without trawling logs.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    /// Booking created and scheduler armed.
    BookingCreated,
    /// Booking cancelled by the customer.
    BookingCancelled,
    /// Scheduler offered the booking to another mechanic.
    Reassigned,
    /// Every eligible mechanic was tried; the visited set was reset.
    CycleReset,
    /// No eligible mechanic exists; the booking carries an error.
    NoMechanic,
    /// Scheduler stopped because the booking is settled or cancelled.
    Settled,
    /// Exclusion sets were unreadable; scheduling abandoned.
    Corrupt,
    /// A storage failure postponed the check.
    Retried,
    /// A pending credit was confirmed.
    CreditConfirmed,
}

impl AuditAction {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BookingCreated => "booking_created",
            Self::BookingCancelled => "booking_cancelled",
            Self::Reassigned => "reassigned",
            Self::CycleReset => "cycle_reset",
            Self::NoMechanic => "no_mechanic",
            Self::Settled => "settled",
            Self::Corrupt => "corrupt",
            Self::Retried => "retried",
            Self::CreditConfirmed => "credit_confirmed",
        }
    }
}

/// Audit event structure.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: Uuid,
    /// Booking or ledger reference the event is about.
    pub subject: String,
    /// Action taken.
    pub action: AuditAction,
    /// When it was recorded.
    pub created_at: DateTime<Utc>,
    /// Additional context.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// Bounded in-memory audit sink.
pub struct InMemoryAuditSink {
    events: VecDeque<AuditEvent>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a sink keeping at most `max_events`, dropping the oldest first.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events.min(1024)),
            max_events,
        }
    }

    /// Snapshot of stored events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }

    /// Stored events about `subject`, oldest first.
    #[must_use]
    pub fn events_for(&self, subject: &str) -> Vec<AuditEvent> {
        self.events
            .iter()
            .filter(|e| e.subject == subject)
            .cloned()
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.max_events == 0 {
            return;
        }
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Shared sinks record through their lock, so a caller can keep a handle
/// and read back what a component wrote.
impl<T: AuditSink> AuditSink for Arc<Mutex<T>> {
    fn record(&mut self, event: AuditEvent) {
        self.lock().record(event);
    }
}

/// Cloneable handle components use to record events; a no-op when no sink
/// is attached.
#[derive(Clone, Default)]
pub struct AuditLog {
    sink: Option<Arc<Mutex<Box<dyn AuditSink>>>>,
}

impl AuditLog {
    /// Handle writing to `sink`.
    #[must_use]
    pub fn new(sink: Box<dyn AuditSink>) -> Self {
        Self {
            sink: Some(Arc::new(Mutex::new(sink))),
        }
    }

    /// Handle that drops every event.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Record `action` about `subject`.
    pub fn record(&self, subject: impl Into<String>, action: AuditAction, detail: Option<String>) {
        if let Some(sink) = &self.sink {
            sink.lock().record(build_audit_event(subject, action, detail));
        }
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("enabled", &self.sink.is_some())
            .finish()
    }
}

/// Build an event stamped with the current time.
pub fn build_audit_event(
    subject: impl Into<String>,
    action: AuditAction,
    detail: Option<String>,
) -> AuditEvent {
    AuditEvent {
        event_id: Uuid::new_v4(),
        subject: subject.into(),
        action,
        created_at: crate::util::clock::now(),
        detail,
    }
}
