//! Configuration models for the fulfillment service.

pub mod fulfillment;

pub use fulfillment::{EstimatorConfig, FulfillmentConfig, SchedulerConfig};
