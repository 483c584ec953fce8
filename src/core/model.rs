//! Records shared by the fulfillment components and storage backends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::id_set::{EncodedIdSet, MechanicIdSet};

/// Monetary amount in minor currency units.
pub type Money = i64;
/// Booking identifier.
pub type BookingId = Uuid;
/// Mechanic identifier.
pub type MechanicId = Uuid;
/// Customer identifier.
pub type UserId = Uuid;

/// Booking lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Waiting for a mechanic to accept.
    Pending,
    /// A mechanic accepted the booking.
    Booked,
    /// Cancelled by the customer.
    Cancelled,
    /// Work finished.
    Completed,
}

/// Customer-supplied location of the vehicle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
    /// Free-form street address.
    pub address: String,
}

/// Booking row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    /// Identity.
    pub id: BookingId,
    /// Unique payment reference shown to the customer.
    pub payment_ref: String,
    /// Owning customer.
    pub user_id: UserId,
    /// Mechanic the booking is currently offered to.
    pub provisional_mechanic_id: MechanicId,
    /// Mechanic that accepted the booking, if any.
    pub confirmed_mechanic_id: Option<MechanicId>,
    /// Lifecycle status.
    pub status: BookingStatus,
    /// Requested service date.
    pub booking_date: DateTime<Utc>,
    /// Fee debited at creation.
    pub fee: Money,
    /// Permanently excluded mechanics.
    pub blacklisted_mechanics: EncodedIdSet,
    /// Mechanics offered during the current cycle.
    pub visited_mechanics: EncodedIdSet,
    /// When the reassignment scheduler will look at the booking next.
    pub next_execution_at: Option<DateTime<Utc>>,
    /// Fatal condition requiring manual intervention.
    pub error_message: Option<String>,
    /// Vehicle row created with the booking.
    pub vehicle_id: Uuid,
    /// Requested service category.
    pub service_type: String,
    /// Optional customer notes.
    pub service_description: Option<String>,
    /// Resolved service line items.
    pub service_ids: Vec<Uuid>,
    /// Where the work happens.
    pub location: Location,
    /// Uploaded vehicle images.
    pub vehicle_image_urls: Vec<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Whether the booking still waits for a mechanic.
    #[must_use]
    pub fn is_unassigned_pending(&self) -> bool {
        self.status == BookingStatus::Pending && self.confirmed_mechanic_id.is_none()
    }

    /// Decode the blacklisted set.
    ///
    /// # Errors
    ///
    /// Fails if the persisted text is corrupt.
    pub fn blacklisted(&self) -> Result<MechanicIdSet, crate::core::id_set::DecodeError> {
        self.blacklisted_mechanics.decode("blacklisted")
    }

    /// Decode the visited set.
    ///
    /// # Errors
    ///
    /// Fails if the persisted text is corrupt.
    pub fn visited(&self) -> Result<MechanicIdSet, crate::core::id_set::DecodeError> {
        self.visited_mechanics.decode("visited")
    }
}

/// Mechanic row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mechanic {
    /// Identity.
    pub id: MechanicId,
    /// Display name.
    pub full_name: String,
    /// Average customer rating; zero means unrated.
    pub rating: f64,
    /// Whether the mechanic currently takes work.
    pub is_available: bool,
    /// Wallet balance.
    pub balance: Money,
}

/// Customer row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Identity.
    pub id: UserId,
    /// Display name.
    pub full_name: String,
    /// Unique login email.
    pub email: String,
    /// Wallet balance.
    pub balance: Money,
}

/// Vehicle row created per booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    /// Identity.
    pub id: Uuid,
    /// Body type (car, bus, ...).
    pub kind: String,
    /// Manufacturer.
    pub brand: String,
    /// Size class.
    pub size: String,
    /// Model year.
    pub model_year: i32,
}

/// Service line item offered by the marketplace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceItem {
    /// Identity.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Starting price.
    pub base_price: Money,
    /// Whether it can be booked.
    pub is_available: bool,
}

/// Ledger entry settlement status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    /// Awaiting settlement.
    Pending,
    /// Settled.
    Success,
    /// Rejected by the payment provider.
    Failed,
}

/// Direction of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    /// Money leaves the account.
    Debit,
    /// Money enters the account.
    Credit,
}

impl LedgerKind {
    /// Lowercase name used in references.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
        }
    }
}

/// Account whose balance a ledger entry moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Account {
    /// Customer wallet.
    User(UserId),
    /// Mechanic wallet.
    Mechanic(MechanicId),
}

/// Ledger entry row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Identity.
    pub id: Uuid,
    /// Unique external reference.
    pub reference: String,
    /// Account the entry belongs to.
    pub account: Account,
    /// Balance before the movement.
    pub previous_balance: Money,
    /// Balance after the movement.
    pub current_balance: Money,
    /// Absolute amount moved.
    pub amount: Money,
    /// Settlement status.
    pub status: LedgerStatus,
    /// Direction.
    pub kind: LedgerKind,
    /// Optional note.
    pub description: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}
