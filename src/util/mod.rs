//! Shared utilities.

pub mod clock;
pub mod refs;
pub mod telemetry;

pub use clock::{now, tomorrow};
pub use refs::{ledger_reference, payment_reference};
pub use telemetry::init_tracing;
