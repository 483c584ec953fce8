//! Booking fulfillment: matching, intake, reassignment and capacity.

pub mod audit;
pub mod capacity;
pub mod error;
pub mod id_set;
pub mod intake;
pub mod ledger;
pub mod matcher;
pub mod model;
pub mod reassign;
pub mod scheduler;
pub mod store;

pub use audit::{AuditAction, AuditEvent, AuditLog, AuditSink, InMemoryAuditSink, build_audit_event};
pub use capacity::CapacityEstimator;
pub use error::{AppResult, FulfillmentError, MatchError, StoreError};
pub use id_set::{DecodeError, EncodedIdSet, MechanicIdSet};
pub use intake::{BookingIntake, CreateBookingPayload, ServiceDetails, VehicleDetails};
pub use ledger::Ledger;
pub use matcher::MechanicMatcher;
pub use model::{
    Account, Booking, BookingId, BookingStatus, LedgerEntry, LedgerKind, LedgerStatus, Location,
    Mechanic, MechanicId, Money, ServiceItem, User, UserId, Vehicle,
};
pub use scheduler::ReassignmentScheduler;
pub use store::{
    BookingStore, LedgerStore, MechanicFilter, MechanicStore, ServiceStore, Storage,
    TransactionalStore, UnitOfWork, UserStore,
};
