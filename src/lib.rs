//! # Mechanic Dispatch
//!
//! Booking fulfillment core for a vehicle-repair marketplace.
//!
//! A customer books a repair; the crate debits the booking fee, offers the job
//! to the best available mechanic, and keeps re-offering it on a timer until
//! someone accepts or nobody is left. Independently, it estimates which
//! upcoming dates are already over capacity.
//!
//! ## Components
//!
//! - **Mechanic matcher** ([`core::matcher`]): highest-rated available
//!   mechanic outside the booking's blacklisted and visited sets, ties broken
//!   at random.
//! - **Booking intake** ([`core::intake`]): fee debit, service resolution,
//!   matching, and row creation in one unit of work, then arms the scheduler.
//! - **Reassignment scheduler** ([`core::scheduler`], [`core::reassign`]):
//!   one timer per unconfirmed booking; each check offers the booking to the
//!   next mechanic, resets the cycle when everyone was tried, or flags the
//!   booking when nobody is eligible.
//! - **Capacity estimator** ([`core::capacity`]): dates whose pending demand
//!   exceeds current mechanic supply.
//! - **Ledger** ([`core::ledger`]): every balance movement paired with a
//!   ledger entry in the same unit of work.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mechanic_dispatch::builders::build_service;
//! use mechanic_dispatch::config::FulfillmentConfig;
//! use mechanic_dispatch::infra::open_file_store;
//!
//! mechanic_dispatch::util::init_tracing(mechanic_dispatch::util::telemetry::DEFAULT_DIRECTIVE);
//! let store = Arc::new(open_file_store("data/store.json")?);
//! let service = build_service(FulfillmentConfig::from_env()?, store)?;
//! service.start_all_schedulers().await?;
//!
//! let booking = service.create_booking(payload, user_id).await?;
//! let full = service.disabled_dates().await?;
//!
//! service.shutdown().await;
//! ```
//!
//! For end-to-end scenarios see `tests/service_test.rs`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Booking fulfillment: matching, intake, reassignment, capacity, ledger.
pub mod core;
/// Configuration models for scheduling and estimation.
pub mod config;
/// Builders to construct the service from configuration.
pub mod builders;
/// Storage backends.
pub mod infra;
/// Service surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
