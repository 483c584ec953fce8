//! Builders assembling the fulfillment service from configuration.

pub mod service_builder;

pub use service_builder::{build_service, build_service_with_audit};
