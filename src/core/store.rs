//! Storage contracts consumed by the fulfillment core.
//!
//! Reads go straight to the backend. Writes that must be atomic go through a
//! [`UnitOfWork`] obtained from [`TransactionalStore::begin`]: every staged
//! write becomes visible at `commit`, or none does. Dropping a unit of work
//! without committing discards it.
//!
//! Writes derived from an earlier read carry what they expect to find: a
//! balance change names the balance it was computed from, an entry update the
//! status it was read in, and a reassignment only lands on a booking that is
//! still unassigned. A write whose expectation no longer holds is rejected
//! instead of silently overwriting the concurrent change.

use async_trait::async_trait;
use uuid::Uuid;

use crate::core::id_set::MechanicIdSet;
use crate::core::model::{
    Account, Booking, BookingId, LedgerEntry, LedgerStatus, Mechanic, MechanicId, Money,
    ServiceItem, User, UserId, Vehicle,
};
use crate::core::StoreError;

/// Eligibility filter for mechanic candidate queries.
#[derive(Debug, Clone, Copy)]
pub struct MechanicFilter<'a> {
    /// Permanently excluded mechanics.
    pub blacklisted: &'a MechanicIdSet,
    /// Mechanics already offered in this cycle.
    pub visited: &'a MechanicIdSet,
    /// Only ratings strictly below this ceiling qualify.
    pub below: Option<f64>,
}

impl<'a> MechanicFilter<'a> {
    /// Filter excluding both sets with no rating ceiling.
    #[must_use]
    pub const fn new(blacklisted: &'a MechanicIdSet, visited: &'a MechanicIdSet) -> Self {
        Self {
            blacklisted,
            visited,
            below: None,
        }
    }

    /// Same filter restricted to ratings strictly below `ceiling`.
    #[must_use]
    pub const fn below(self, ceiling: f64) -> Self {
        Self {
            below: Some(ceiling),
            ..self
        }
    }

    /// Whether `mechanic` passes the filter.
    #[must_use]
    pub fn admits(&self, mechanic: &Mechanic) -> bool {
        mechanic.is_available
            && !self.blacklisted.contains(&mechanic.id)
            && !self.visited.contains(&mechanic.id)
            && self.below.is_none_or(|ceiling| mechanic.rating < ceiling)
    }
}

/// Mechanic queries.
#[async_trait]
pub trait MechanicStore: Send + Sync {
    /// Highest rating among mechanics admitted by `filter`, or `0.0` if none.
    async fn max_rating(&self, filter: &MechanicFilter<'_>) -> Result<f64, StoreError>;

    /// Mechanics admitted by `filter` whose rating equals `rating`.
    async fn candidates_at(
        &self,
        rating: f64,
        filter: &MechanicFilter<'_>,
    ) -> Result<Vec<Mechanic>, StoreError>;

    /// Every mechanic currently flagged available.
    async fn available_mechanics(&self) -> Result<Vec<Mechanic>, StoreError>;

    /// Fetch one mechanic.
    async fn get_mechanic(&self, id: MechanicId) -> Result<Mechanic, StoreError>;
}

/// Booking queries and single-row updates.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// All bookings in the pending status.
    async fn pending_bookings(&self) -> Result<Vec<Booking>, StoreError>;

    /// Fetch one booking.
    async fn get_booking(&self, id: BookingId) -> Result<Booking, StoreError>;

    /// Overwrite an existing booking row.
    async fn update_booking(&self, booking: &Booking) -> Result<(), StoreError>;

    /// Overwrite an existing booking row only while the stored row is still
    /// pending with no confirmed mechanic.
    ///
    /// A row that was cancelled, confirmed or otherwise settled since it was
    /// read is left as is and reported as [`StoreError::Conflict`].
    async fn update_unassigned_booking(&self, booking: &Booking) -> Result<(), StoreError>;

    /// Current flat booking fee.
    async fn booking_fee(&self) -> Result<Money, StoreError>;

    /// Bookings owned by `user_id`, newest first.
    async fn bookings_for_user(&self, user_id: UserId) -> Result<Vec<Booking>, StoreError>;
}

/// Customer queries.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fetch one customer.
    async fn get_user(&self, id: UserId) -> Result<User, StoreError>;
}

/// Ledger queries.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Fetch the entry carrying `reference`.
    async fn entry_by_reference(&self, reference: &str) -> Result<LedgerEntry, StoreError>;
}

/// Service catalogue queries.
#[async_trait]
pub trait ServiceStore: Send + Sync {
    /// Fetch one service line item.
    async fn get_service(&self, id: Uuid) -> Result<ServiceItem, StoreError>;
}

/// Atomic write scope.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Set the balance of `account` to `new_balance`, provided it still equals
    /// `expected`. A balance that moved fails with [`StoreError::Stale`], at
    /// staging or at commit.
    async fn set_balance(
        &mut self,
        account: Account,
        expected: Money,
        new_balance: Money,
    ) -> Result<(), StoreError>;

    /// Create a ledger entry; its reference must be unique.
    async fn create_entry(&mut self, entry: LedgerEntry) -> Result<LedgerEntry, StoreError>;

    /// Overwrite an existing ledger entry, matched by id, provided its stored
    /// status is still `expected`; otherwise [`StoreError::Conflict`].
    async fn update_entry(
        &mut self,
        entry: LedgerEntry,
        expected: LedgerStatus,
    ) -> Result<(), StoreError>;

    /// Create a vehicle row.
    async fn create_vehicle(&mut self, vehicle: Vehicle) -> Result<Vehicle, StoreError>;

    /// Create a booking row; its payment reference must be unique.
    async fn create_booking(&mut self, booking: Booking) -> Result<Booking, StoreError>;

    /// Create a customer; the email is checked for duplicates under the
    /// unit's lock on the user table.
    async fn create_user(&mut self, user: User) -> Result<User, StoreError>;

    /// Apply every staged write atomically.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Discard every staged write.
    async fn rollback(self: Box<Self>);
}

/// Source of units of work.
#[async_trait]
pub trait TransactionalStore: Send + Sync {
    /// Open a new unit of work.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;
}

/// Everything the fulfillment core needs from a backend.
pub trait Storage:
    MechanicStore + BookingStore + UserStore + LedgerStore + ServiceStore + TransactionalStore + 'static
{
}

impl<T> Storage for T where
    T: MechanicStore
        + BookingStore
        + UserStore
        + LedgerStore
        + ServiceStore
        + TransactionalStore
        + 'static
{
}
