//! Service surface exposed to transport layers.

pub mod api;

pub use api::{FulfillmentService, FundWallet, Registration};
