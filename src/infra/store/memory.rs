//! In-memory storage backend.
//!
//! All tables live behind one `parking_lot` mutex that is never held across an
//! await. Units of work queue their writes; each new write is tried against
//! the live tables together with everything queued before it and undone again,
//! so constraint violations surface at the call that caused them. `commit`
//! applies the queue in place and undoes it if any write no longer applies.
//!
//! With a snapshot attached, every committed write encodes the tables under
//! the lock and hands the text to the blocking pool once the lock is released.
//!
//! Tests steer the backend through fail points: make the next call (or every
//! call) to an operation fail, delay it, or make candidate queries come back
//! empty once to simulate a mechanic going unavailable mid-search.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::core::model::{
    Account, Booking, BookingId, BookingStatus, LedgerEntry, LedgerStatus, Mechanic, MechanicId,
    Money, ServiceItem, User, UserId, Vehicle,
};
use crate::core::store::{
    BookingStore, LedgerStore, MechanicFilter, MechanicStore, ServiceStore, TransactionalStore,
    UnitOfWork, UserStore,
};
use crate::core::StoreError;
use crate::infra::store::file::{SnapshotFile, SnapshotWriter};

/// Every table of the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreState {
    users: HashMap<UserId, User>,
    mechanics: HashMap<MechanicId, Mechanic>,
    bookings: HashMap<BookingId, Booking>,
    vehicles: HashMap<Uuid, Vehicle>,
    services: HashMap<Uuid, ServiceItem>,
    ledger: HashMap<Uuid, LedgerEntry>,
    booking_fee: Money,
}

// Previous value of one row, restored when a write is undone.
enum Undo {
    User(UserId, Option<User>),
    Mechanic(MechanicId, Option<Mechanic>),
    Entry(Uuid, Option<LedgerEntry>),
    Vehicle(Uuid, Option<Vehicle>),
    Booking(BookingId, Option<Booking>),
}

fn restore<K: std::hash::Hash + Eq, V>(table: &mut HashMap<K, V>, key: K, row: Option<V>) {
    match row {
        Some(row) => table.insert(key, row),
        None => table.remove(&key),
    };
}

fn check_balance(found: Money, expected: Money, account: Account) -> Result<(), StoreError> {
    if found == expected {
        Ok(())
    } else {
        Err(StoreError::Stale(format!(
            "balance of {account:?} is {found}, expected {expected}"
        )))
    }
}

impl StoreState {
    fn apply(&mut self, op: &Staged) -> Result<Undo, StoreError> {
        match op {
            Staged::SetBalance {
                account,
                expected,
                balance,
            } => match *account {
                Account::User(id) => {
                    let user = self
                        .users
                        .get_mut(&id)
                        .ok_or_else(|| StoreError::NotFound(format!("user {id}")))?;
                    check_balance(user.balance, *expected, *account)?;
                    let undo = Undo::User(id, Some(user.clone()));
                    user.balance = *balance;
                    Ok(undo)
                }
                Account::Mechanic(id) => {
                    let mechanic = self
                        .mechanics
                        .get_mut(&id)
                        .ok_or_else(|| StoreError::NotFound(format!("mechanic {id}")))?;
                    check_balance(mechanic.balance, *expected, *account)?;
                    let undo = Undo::Mechanic(id, Some(mechanic.clone()));
                    mechanic.balance = *balance;
                    Ok(undo)
                }
            },
            Staged::CreateEntry(entry) => {
                if self.ledger.values().any(|e| e.reference == entry.reference) {
                    return Err(StoreError::Conflict(format!(
                        "ledger reference {} already exists",
                        entry.reference
                    )));
                }
                let prev = self.ledger.insert(entry.id, entry.clone());
                Ok(Undo::Entry(entry.id, prev))
            }
            Staged::UpdateEntry { entry, expected } => {
                let slot = self
                    .ledger
                    .get_mut(&entry.id)
                    .ok_or_else(|| StoreError::NotFound(format!("ledger entry {}", entry.id)))?;
                if slot.status != *expected {
                    return Err(StoreError::Conflict(format!(
                        "transaction {} is {:?}, expected {expected:?}",
                        slot.reference, slot.status
                    )));
                }
                let prev = std::mem::replace(slot, entry.clone());
                Ok(Undo::Entry(entry.id, Some(prev)))
            }
            Staged::CreateVehicle(vehicle) => {
                let prev = self.vehicles.insert(vehicle.id, vehicle.clone());
                Ok(Undo::Vehicle(vehicle.id, prev))
            }
            Staged::CreateBooking(booking) => {
                if self
                    .bookings
                    .values()
                    .any(|b| b.payment_ref == booking.payment_ref)
                {
                    return Err(StoreError::Conflict(format!(
                        "payment reference {} already exists",
                        booking.payment_ref
                    )));
                }
                if !self.vehicles.contains_key(&booking.vehicle_id) {
                    return Err(StoreError::NotFound(format!("vehicle {}", booking.vehicle_id)));
                }
                let prev = self.bookings.insert(booking.id, booking.clone());
                Ok(Undo::Booking(booking.id, prev))
            }
            Staged::CreateUser(user) => {
                let email = user.email.to_lowercase();
                if self.users.values().any(|u| u.email.to_lowercase() == email) {
                    return Err(StoreError::Conflict(format!(
                        "user with email {} already exists",
                        user.email
                    )));
                }
                let prev = self.users.insert(user.id, user.clone());
                Ok(Undo::User(user.id, prev))
            }
        }
    }

    /// Apply `ops` in order. On the first failure everything applied so far is
    /// undone and the tables are left as they were.
    fn apply_all(&mut self, ops: &[Staged]) -> Result<Vec<Undo>, StoreError> {
        let mut undo = Vec::with_capacity(ops.len());
        for op in ops {
            match self.apply(op) {
                Ok(u) => undo.push(u),
                Err(e) => {
                    self.revert(undo);
                    return Err(e);
                }
            }
        }
        Ok(undo)
    }

    fn revert(&mut self, undo: Vec<Undo>) {
        for u in undo.into_iter().rev() {
            match u {
                Undo::User(id, row) => restore(&mut self.users, id, row),
                Undo::Mechanic(id, row) => restore(&mut self.mechanics, id, row),
                Undo::Entry(id, row) => restore(&mut self.ledger, id, row),
                Undo::Vehicle(id, row) => restore(&mut self.vehicles, id, row),
                Undo::Booking(id, row) => restore(&mut self.bookings, id, row),
            }
        }
    }
}

/// Backend operations that can be failed or delayed on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// [`MechanicStore::max_rating`].
    MaxRating,
    /// [`MechanicStore::candidates_at`].
    CandidatesAt,
    /// [`MechanicStore::available_mechanics`].
    AvailableMechanics,
    /// [`MechanicStore::get_mechanic`].
    GetMechanic,
    /// [`BookingStore::pending_bookings`].
    PendingBookings,
    /// [`BookingStore::get_booking`].
    GetBooking,
    /// [`BookingStore::update_booking`] and
    /// [`BookingStore::update_unassigned_booking`].
    UpdateBooking,
    /// [`BookingStore::booking_fee`].
    BookingFee,
    /// [`BookingStore::bookings_for_user`].
    BookingsForUser,
    /// [`UserStore::get_user`].
    GetUser,
    /// [`LedgerStore::entry_by_reference`].
    EntryByReference,
    /// [`ServiceStore::get_service`].
    GetService,
    /// [`TransactionalStore::begin`].
    Begin,
    /// [`UnitOfWork::set_balance`].
    SetBalance,
    /// [`UnitOfWork::create_entry`].
    CreateEntry,
    /// [`UnitOfWork::update_entry`].
    UpdateEntry,
    /// [`UnitOfWork::create_vehicle`].
    CreateVehicle,
    /// [`UnitOfWork::create_booking`].
    CreateBooking,
    /// [`UnitOfWork::create_user`].
    CreateUser,
    /// [`UnitOfWork::commit`].
    Commit,
}

#[derive(Default)]
struct Faults {
    fail_next: HashMap<FailPoint, usize>,
    fail_always: HashSet<FailPoint>,
    delays: HashMap<FailPoint, Duration>,
    calls: HashMap<FailPoint, usize>,
    vanish_candidates: usize,
}

struct Shared {
    state: Mutex<StoreState>,
    faults: Mutex<Faults>,
    snapshot: Option<SnapshotWriter>,
    // Bumped under the state lock on every write.
    version: AtomicU64,
}

impl Shared {
    async fn hit(&self, point: FailPoint) -> Result<(), StoreError> {
        let delay = {
            let mut faults = self.faults.lock();
            *faults.calls.entry(point).or_default() += 1;
            let injected = faults.fail_always.contains(&point)
                || faults.fail_next.get_mut(&point).is_some_and(|left| {
                    let fire = *left > 0;
                    *left = left.saturating_sub(1);
                    fire
                });
            if injected {
                debug!(?point, "injected storage failure");
                return Err(StoreError::Unavailable(format!("injected failure at {point:?}")));
            }
            faults.delays.get(&point).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    // Encoded snapshot of `state`, taken while its lock is held.
    fn encode(&self, state: &StoreState) -> Option<(u64, String)> {
        if self.snapshot.is_none() {
            return None;
        }
        let version = self.version.fetch_add(1, Ordering::Relaxed) + 1;
        match SnapshotFile::encode(state) {
            Ok(content) => Some((version, content)),
            Err(e) => {
                error!(version, error = %e, "failed to encode store snapshot");
                None
            }
        }
    }

    /// Run `write` against the live tables, then persist the result off the
    /// lock. Memory is authoritative: a failed snapshot write is logged and
    /// the next successful one catches the file up.
    async fn write<T>(
        &self,
        apply: impl FnOnce(&mut StoreState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let (out, encoded) = {
            let mut state = self.state.lock();
            let out = apply(&mut *state)?;
            (out, self.encode(&state))
        };
        if let (Some(writer), Some((version, content))) = (&self.snapshot, encoded) {
            if let Err(e) = writer.write_async(version, content).await {
                error!(version, error = %e, "failed to write store snapshot");
            }
        }
        Ok(out)
    }

    fn read<T>(&self, f: impl FnOnce(&StoreState) -> T) -> T {
        f(&self.state.lock())
    }

    // Seeding writes persist synchronously and best-effort.
    fn seed(&self, f: impl FnOnce(&mut StoreState)) {
        let mut state = self.state.lock();
        f(&mut *state);
        if let (Some(writer), Some((version, content))) = (&self.snapshot, self.encode(&state)) {
            if let Err(e) = writer.write(version, &content) {
                warn!(error = %e, "failed to persist seeded state");
            }
        }
    }

    async fn write_booking(
        &self,
        booking: &Booking,
        admit: impl FnOnce(&Booking) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        self.write(|state| {
            let slot = state
                .bookings
                .get_mut(&booking.id)
                .ok_or_else(|| StoreError::NotFound(format!("booking {}", booking.id)))?;
            admit(slot)?;
            *slot = booking.clone();
            Ok(())
        })
        .await
    }
}

/// Thread-safe in-memory backend implementing every storage contract.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store with a zero booking fee.
    #[must_use]
    pub fn new() -> Self {
        Self::from_parts(StoreState::default(), None)
    }

    pub(crate) fn from_parts(state: StoreState, snapshot: Option<SnapshotFile>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                faults: Mutex::new(Faults::default()),
                snapshot: snapshot.map(SnapshotWriter::new),
                version: AtomicU64::new(0),
            }),
        }
    }

    /// Copy of every table.
    #[must_use]
    pub fn snapshot(&self) -> StoreState {
        self.shared.read(StoreState::clone)
    }

    /// Insert or replace a customer.
    pub fn insert_user(&self, user: User) {
        self.shared.seed(|s| {
            s.users.insert(user.id, user);
        });
    }

    /// Insert or replace a mechanic.
    pub fn insert_mechanic(&self, mechanic: Mechanic) {
        self.shared.seed(|s| {
            s.mechanics.insert(mechanic.id, mechanic);
        });
    }

    /// Insert or replace a catalogue item.
    pub fn insert_service(&self, service: ServiceItem) {
        self.shared.seed(|s| {
            s.services.insert(service.id, service);
        });
    }

    /// Insert or replace a booking row, bypassing constraints.
    pub fn insert_booking(&self, booking: Booking) {
        self.shared.seed(|s| {
            s.bookings.insert(booking.id, booking);
        });
    }

    /// Set the flat booking fee.
    pub fn set_booking_fee(&self, fee: Money) {
        self.shared.seed(|s| s.booking_fee = fee);
    }

    /// Flip a mechanic's availability. Returns false for unknown ids.
    pub fn set_mechanic_availability(&self, id: MechanicId, available: bool) -> bool {
        let mut found = false;
        self.shared.seed(|s| {
            if let Some(m) = s.mechanics.get_mut(&id) {
                m.is_available = available;
                found = true;
            }
        });
        found
    }

    /// Current customer row.
    #[must_use]
    pub fn user(&self, id: UserId) -> Option<User> {
        self.shared.read(|s| s.users.get(&id).cloned())
    }

    /// Current booking row.
    #[must_use]
    pub fn booking(&self, id: BookingId) -> Option<Booking> {
        self.shared.read(|s| s.bookings.get(&id).cloned())
    }

    /// All ledger entries, oldest first.
    #[must_use]
    pub fn ledger_entries(&self) -> Vec<LedgerEntry> {
        let mut entries: Vec<_> = self.shared.read(|s| s.ledger.values().cloned().collect());
        entries.sort_by_key(|e| e.created_at);
        entries
    }

    /// Number of vehicle rows.
    #[must_use]
    pub fn vehicle_count(&self) -> usize {
        self.shared.read(|s| s.vehicles.len())
    }

    /// Fail the next `times` calls to `point`.
    pub fn fail_next(&self, point: FailPoint, times: usize) {
        self.shared.faults.lock().fail_next.insert(point, times);
    }

    /// Fail every call to `point` until cleared.
    pub fn fail_always(&self, point: FailPoint) {
        self.shared.faults.lock().fail_always.insert(point);
    }

    /// Delay every call to `point`.
    pub fn delay(&self, point: FailPoint, by: Duration) {
        self.shared.faults.lock().delays.insert(point, by);
    }

    /// Make the next candidate query return no rows.
    pub fn vanish_candidates_once(&self) {
        self.shared.faults.lock().vanish_candidates += 1;
    }

    /// Remove every injected fault for `point`.
    pub fn clear(&self, point: FailPoint) {
        let mut faults = self.shared.faults.lock();
        faults.fail_next.remove(&point);
        faults.fail_always.remove(&point);
        faults.delays.remove(&point);
    }

    /// How many times `point` was called.
    #[must_use]
    pub fn calls(&self, point: FailPoint) -> usize {
        self.shared.faults.lock().calls.get(&point).copied().unwrap_or(0)
    }
}

#[async_trait]
impl MechanicStore for MemoryStore {
    async fn max_rating(&self, filter: &MechanicFilter<'_>) -> Result<f64, StoreError> {
        self.shared.hit(FailPoint::MaxRating).await?;
        Ok(self.shared.read(|s| {
            s.mechanics
                .values()
                .filter(|m| filter.admits(m))
                .map(|m| m.rating)
                .fold(0.0_f64, f64::max)
        }))
    }

    async fn candidates_at(
        &self,
        rating: f64,
        filter: &MechanicFilter<'_>,
    ) -> Result<Vec<Mechanic>, StoreError> {
        self.shared.hit(FailPoint::CandidatesAt).await?;
        {
            let mut faults = self.shared.faults.lock();
            if faults.vanish_candidates > 0 {
                faults.vanish_candidates -= 1;
                return Ok(Vec::new());
            }
        }
        Ok(self.shared.read(|s| {
            s.mechanics
                .values()
                .filter(|m| filter.admits(m) && (m.rating - rating).abs() <= f64::EPSILON)
                .cloned()
                .collect()
        }))
    }

    async fn available_mechanics(&self) -> Result<Vec<Mechanic>, StoreError> {
        self.shared.hit(FailPoint::AvailableMechanics).await?;
        Ok(self.shared.read(|s| {
            s.mechanics
                .values()
                .filter(|m| m.is_available)
                .cloned()
                .collect()
        }))
    }

    async fn get_mechanic(&self, id: MechanicId) -> Result<Mechanic, StoreError> {
        self.shared.hit(FailPoint::GetMechanic).await?;
        self.shared
            .read(|s| s.mechanics.get(&id).cloned())
            .ok_or_else(|| StoreError::NotFound(format!("mechanic {id}")))
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn pending_bookings(&self) -> Result<Vec<Booking>, StoreError> {
        self.shared.hit(FailPoint::PendingBookings).await?;
        Ok(self.shared.read(|s| {
            s.bookings
                .values()
                .filter(|b| b.status == BookingStatus::Pending)
                .cloned()
                .collect()
        }))
    }

    async fn get_booking(&self, id: BookingId) -> Result<Booking, StoreError> {
        self.shared.hit(FailPoint::GetBooking).await?;
        self.shared
            .read(|s| s.bookings.get(&id).cloned())
            .ok_or_else(|| StoreError::NotFound(format!("booking {id}")))
    }

    async fn update_booking(&self, booking: &Booking) -> Result<(), StoreError> {
        self.shared.hit(FailPoint::UpdateBooking).await?;
        self.shared.write_booking(booking, |_| Ok(())).await
    }

    async fn update_unassigned_booking(&self, booking: &Booking) -> Result<(), StoreError> {
        self.shared.hit(FailPoint::UpdateBooking).await?;
        self.shared
            .write_booking(booking, |stored| {
                if stored.status == BookingStatus::Pending && stored.confirmed_mechanic_id.is_none() {
                    Ok(())
                } else {
                    Err(StoreError::Conflict(format!(
                        "booking {} is {:?} with confirmed mechanic {:?}",
                        stored.id, stored.status, stored.confirmed_mechanic_id
                    )))
                }
            })
            .await
    }

    async fn booking_fee(&self) -> Result<Money, StoreError> {
        self.shared.hit(FailPoint::BookingFee).await?;
        Ok(self.shared.read(|s| s.booking_fee))
    }

    async fn bookings_for_user(&self, user_id: UserId) -> Result<Vec<Booking>, StoreError> {
        self.shared.hit(FailPoint::BookingsForUser).await?;
        let mut bookings: Vec<Booking> = self.shared.read(|s| {
            s.bookings
                .values()
                .filter(|b| b.user_id == user_id)
                .cloned()
                .collect()
        });
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bookings)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_user(&self, id: UserId) -> Result<User, StoreError> {
        self.shared.hit(FailPoint::GetUser).await?;
        self.shared
            .read(|s| s.users.get(&id).cloned())
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn entry_by_reference(&self, reference: &str) -> Result<LedgerEntry, StoreError> {
        self.shared.hit(FailPoint::EntryByReference).await?;
        self.shared
            .read(|s| s.ledger.values().find(|e| e.reference == reference).cloned())
            .ok_or_else(|| StoreError::NotFound(format!("transaction {reference}")))
    }
}

#[async_trait]
impl ServiceStore for MemoryStore {
    async fn get_service(&self, id: Uuid) -> Result<ServiceItem, StoreError> {
        self.shared.hit(FailPoint::GetService).await?;
        self.shared
            .read(|s| s.services.get(&id).cloned())
            .ok_or_else(|| StoreError::NotFound(format!("service {id}")))
    }
}

#[async_trait]
impl TransactionalStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        self.shared.hit(FailPoint::Begin).await?;
        Ok(Box::new(MemoryUnit {
            shared: Arc::clone(&self.shared),
            staged: Vec::new(),
        }))
    }
}

#[derive(Debug, Clone)]
enum Staged {
    SetBalance {
        account: Account,
        expected: Money,
        balance: Money,
    },
    CreateEntry(LedgerEntry),
    UpdateEntry {
        entry: LedgerEntry,
        expected: LedgerStatus,
    },
    CreateVehicle(Vehicle),
    CreateBooking(Booking),
    CreateUser(User),
}

struct MemoryUnit {
    shared: Arc<Shared>,
    staged: Vec<Staged>,
}

impl MemoryUnit {
    async fn stage(&mut self, point: FailPoint, op: Staged) -> Result<(), StoreError> {
        self.shared.hit(point).await?;
        self.staged.push(op);
        let mut state = self.shared.state.lock();
        match state.apply_all(&self.staged) {
            Ok(undo) => {
                state.revert(undo);
                Ok(())
            }
            Err(e) => {
                self.staged.pop();
                Err(e)
            }
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    async fn set_balance(
        &mut self,
        account: Account,
        expected: Money,
        new_balance: Money,
    ) -> Result<(), StoreError> {
        self.stage(
            FailPoint::SetBalance,
            Staged::SetBalance {
                account,
                expected,
                balance: new_balance,
            },
        )
        .await
    }

    async fn create_entry(&mut self, entry: LedgerEntry) -> Result<LedgerEntry, StoreError> {
        self.stage(FailPoint::CreateEntry, Staged::CreateEntry(entry.clone()))
            .await?;
        Ok(entry)
    }

    async fn update_entry(
        &mut self,
        entry: LedgerEntry,
        expected: LedgerStatus,
    ) -> Result<(), StoreError> {
        self.stage(FailPoint::UpdateEntry, Staged::UpdateEntry { entry, expected })
            .await
    }

    async fn create_vehicle(&mut self, vehicle: Vehicle) -> Result<Vehicle, StoreError> {
        self.stage(FailPoint::CreateVehicle, Staged::CreateVehicle(vehicle.clone()))
            .await?;
        Ok(vehicle)
    }

    async fn create_booking(&mut self, booking: Booking) -> Result<Booking, StoreError> {
        self.stage(FailPoint::CreateBooking, Staged::CreateBooking(booking.clone()))
            .await?;
        Ok(booking)
    }

    async fn create_user(&mut self, user: User) -> Result<User, StoreError> {
        self.stage(FailPoint::CreateUser, Staged::CreateUser(user.clone()))
            .await?;
        Ok(user)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let unit = *self;
        unit.shared.hit(FailPoint::Commit).await?;
        let writes = unit.staged.len();
        unit.shared
            .write(|state| state.apply_all(&unit.staged).map(drop))
            .await?;
        debug!(writes, "unit of work committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) {
        debug!(discarded = self.staged.len(), "unit of work rolled back");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::id_set::EncodedIdSet;
    use crate::core::model::{LedgerKind, Location};
    use chrono::Utc;

    fn user(email: &str, balance: Money) -> User {
        User {
            id: Uuid::new_v4(),
            full_name: "Ada".into(),
            email: email.into(),
            balance,
        }
    }

    fn entry(reference: &str, account: Account) -> LedgerEntry {
        let now = Utc::now();
        LedgerEntry {
            id: Uuid::new_v4(),
            reference: reference.into(),
            account,
            previous_balance: 0,
            current_balance: 0,
            amount: 10,
            status: LedgerStatus::Success,
            kind: LedgerKind::Debit,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn booking() -> Booking {
        let now = Utc::now();
        Booking {
            id: Uuid::new_v4(),
            payment_ref: "REF1".into(),
            user_id: Uuid::new_v4(),
            provisional_mechanic_id: Uuid::from_u128(1),
            confirmed_mechanic_id: None,
            status: BookingStatus::Pending,
            booking_date: now,
            fee: 500,
            blacklisted_mechanics: EncodedIdSet::from_raw("[]"),
            visited_mechanics: EncodedIdSet::from_raw("[]"),
            next_execution_at: Some(now),
            error_message: None,
            vehicle_id: Uuid::new_v4(),
            service_type: "repair".into(),
            service_description: None,
            service_ids: vec![],
            location: Location::default(),
            vehicle_image_urls: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn staged_writes_invisible_until_commit() {
        let store = MemoryStore::new();
        let ada = user("ada@example.com", 1_000);
        store.insert_user(ada.clone());

        let mut tx = store.begin().await.unwrap();
        tx.set_balance(Account::User(ada.id), 1_000, 400).await.unwrap();
        assert_eq!(store.user(ada.id).unwrap().balance, 1_000);

        tx.commit().await.unwrap();
        assert_eq!(store.user(ada.id).unwrap().balance, 400);
    }

    #[tokio::test]
    async fn duplicate_reference_rejected_when_staged() {
        let store = MemoryStore::new();
        let ada = user("ada@example.com", 0);
        store.insert_user(ada.clone());

        let mut tx = store.begin().await.unwrap();
        tx.create_entry(entry("debit_1", Account::User(ada.id))).await.unwrap();
        let err = tx
            .create_entry(entry("debit_1", Account::User(ada.id)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn concurrent_registration_conflicts_at_commit() {
        let store = MemoryStore::new();
        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        first.create_user(user("dup@example.com", 0)).await.unwrap();
        second.create_user(user("DUP@example.com", 0)).await.unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.snapshot().users.len(), 1);
    }

    #[tokio::test]
    async fn balance_moved_since_staging_is_stale_at_commit() {
        let store = MemoryStore::new();
        let ada = user("ada@example.com", 1_000);
        store.insert_user(ada.clone());

        let mut slow = store.begin().await.unwrap();
        slow.set_balance(Account::User(ada.id), 1_000, 0).await.unwrap();
        slow.create_entry(entry("debit_slow", Account::User(ada.id)))
            .await
            .unwrap();

        let mut fast = store.begin().await.unwrap();
        fast.set_balance(Account::User(ada.id), 1_000, 0).await.unwrap();
        fast.commit().await.unwrap();

        let err = slow.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::Stale(_)));
        assert_eq!(store.user(ada.id).unwrap().balance, 0);
        assert!(store.ledger_entries().is_empty());
    }

    #[tokio::test]
    async fn entry_update_requires_the_status_it_was_read_in() {
        let store = MemoryStore::new();
        let ada = user("ada@example.com", 0);
        store.insert_user(ada.clone());
        let mut pending = entry("credit_1", Account::User(ada.id));
        pending.status = LedgerStatus::Pending;
        let mut tx = store.begin().await.unwrap();
        tx.create_entry(pending.clone()).await.unwrap();
        tx.commit().await.unwrap();

        let settled = LedgerEntry {
            status: LedgerStatus::Success,
            ..pending
        };
        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        first
            .update_entry(settled.clone(), LedgerStatus::Pending)
            .await
            .unwrap();
        second
            .update_entry(settled, LedgerStatus::Pending)
            .await
            .unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.ledger_entries()[0].status, LedgerStatus::Success);
    }

    #[tokio::test]
    async fn settled_booking_refuses_unassigned_write() {
        let store = MemoryStore::new();
        let booking = Booking {
            status: BookingStatus::Cancelled,
            ..booking()
        };
        store.insert_booking(booking.clone());

        let rewrite = Booking {
            status: BookingStatus::Pending,
            ..booking.clone()
        };
        let err = store.update_unassigned_booking(&rewrite).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.booking(booking.id).unwrap().status, BookingStatus::Cancelled);

        store.update_booking(&rewrite).await.unwrap();
        assert_eq!(store.booking(booking.id).unwrap().status, BookingStatus::Pending);
    }

    #[tokio::test]
    async fn fail_next_fires_once() {
        let store = MemoryStore::new();
        store.fail_next(FailPoint::BookingFee, 1);
        assert!(store.booking_fee().await.is_err());
        assert_eq!(store.booking_fee().await.unwrap(), 0);
        assert_eq!(store.calls(FailPoint::BookingFee), 2);
    }
}
