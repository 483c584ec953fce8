//! Pure reassignment transitions.
//!
//! Given a freshly loaded booking, the outcome of a matcher run and the
//! current time, compute the booking image to persist and what the scheduler
//! does next. Nothing here touches storage or timers.

use chrono::{DateTime, TimeDelta, Utc};

use crate::config::SchedulerConfig;
use crate::core::id_set::{DecodeError, MechanicIdSet};
use crate::core::model::{Booking, Mechanic};
use crate::core::MatchError;

/// Error message persisted when nobody can take a booking.
pub const NO_MECHANIC_MESSAGE: &str = "No mechanic available at this time";

/// What to do with a booking before asking the matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precheck {
    /// A mechanic confirmed or the booking left pending; stop without writing.
    Stop,
    /// Exclusion sets are unreadable; stop and flag the booking.
    Corrupt(DecodeError),
    /// Run the matcher with these sets.
    Match {
        /// Permanent exclusions.
        blacklisted: MechanicIdSet,
        /// Current cycle exclusions.
        visited: MechanicIdSet,
    },
}

/// Inspect a loaded booking.
#[must_use]
pub fn precheck(booking: &Booking) -> Precheck {
    if !booking.is_unassigned_pending() {
        return Precheck::Stop;
    }
    let blacklisted = match booking.blacklisted() {
        Ok(set) => set,
        Err(e) => return Precheck::Corrupt(e),
    };
    match booking.visited() {
        Ok(visited) => Precheck::Match { blacklisted, visited },
        Err(e) => Precheck::Corrupt(e),
    }
}

/// Scheduler directive following a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    /// Check again at the given instant.
    At(DateTime<Utc>),
    /// No further checks.
    Stop,
}

/// Which transition fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Provisional mechanic swapped for a new candidate.
    Reassigned,
    /// Visited set cleared; a new cycle starts after the retry delay.
    CycleReset,
    /// Nobody is eligible; booking flagged.
    NoMechanic,
}

/// Booking image to persist plus the follow-up.
#[derive(Debug, Clone)]
pub struct Step {
    /// New booking row.
    pub booking: Booking,
    /// Which transition fired.
    pub transition: Transition,
    /// Follow-up for the scheduler.
    pub next: Next,
}

/// Apply a non-storage matcher outcome to `booking`.
///
/// `Err(MatchError::Store(_))` is not a transition; callers handle it as a
/// transient failure and must not pass it here. If they do, it is treated as a
/// cycle reset so the booking is retried rather than flagged.
#[must_use]
pub fn apply(
    mut booking: Booking,
    mut visited: MechanicIdSet,
    outcome: Result<&Mechanic, &MatchError>,
    now: DateTime<Utc>,
    cfg: &SchedulerConfig,
) -> Step {
    booking.updated_at = now;
    match outcome {
        Ok(mechanic) => {
            visited.insert(mechanic.id);
            booking.visited_mechanics = visited.encode();
            booking.provisional_mechanic_id = mechanic.id;
            let at = after(now, cfg.reassign_interval_secs);
            booking.next_execution_at = Some(at);
            Step {
                booking,
                transition: Transition::Reassigned,
                next: Next::At(at),
            }
        }
        Err(MatchError::NotFound) => {
            booking.error_message = Some(NO_MECHANIC_MESSAGE.to_owned());
            booking.next_execution_at = None;
            Step {
                booking,
                transition: Transition::NoMechanic,
                next: Next::Stop,
            }
        }
        Err(MatchError::ExhaustedCycle | MatchError::Store(_)) => {
            visited.clear();
            booking.visited_mechanics = visited.encode();
            let at = after(now, cfg.retry_delay_secs);
            booking.next_execution_at = Some(at);
            Step {
                booking,
                transition: Transition::CycleReset,
                next: Next::At(at),
            }
        }
    }
}

/// Next check time for a booking found at process start.
///
/// A future timestamp is kept. A missing or past one becomes `now` plus the
/// overdue grace.
#[must_use]
pub fn resume_at(
    next_execution_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    cfg: &SchedulerConfig,
) -> DateTime<Utc> {
    match next_execution_at {
        Some(at) if at > now => at,
        _ => after(now, cfg.overdue_grace_secs),
    }
}

/// `now` plus `secs` seconds, saturating at the latest representable time.
pub(crate) fn after(now: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
