//! Build a [`FulfillmentService`] from configuration.

use std::sync::Arc;

use tracing::info;

use crate::config::FulfillmentConfig;
use crate::core::{AuditLog, AuditSink, FulfillmentError, InMemoryAuditSink, Storage};
use crate::runtime::FulfillmentService;

/// Validate `cfg` and assemble a service over `store`.
///
/// A non-zero `audit_capacity` attaches a bounded in-memory audit trail.
///
/// # Errors
///
/// [`FulfillmentError::Config`] when the configuration is invalid.
pub fn build_service<S: Storage>(
    cfg: FulfillmentConfig,
    store: Arc<S>,
) -> Result<FulfillmentService<S>, FulfillmentError> {
    let audit = if cfg.audit_capacity > 0 {
        AuditLog::new(Box::new(InMemoryAuditSink::new(cfg.audit_capacity)))
    } else {
        AuditLog::disabled()
    };
    build(cfg, store, audit)
}

/// Validate `cfg` and assemble a service recording into `sink`.
///
/// # Errors
///
/// [`FulfillmentError::Config`] when the configuration is invalid.
pub fn build_service_with_audit<S: Storage>(
    cfg: FulfillmentConfig,
    store: Arc<S>,
    sink: Box<dyn AuditSink>,
) -> Result<FulfillmentService<S>, FulfillmentError> {
    build(cfg, store, AuditLog::new(sink))
}

fn build<S: Storage>(
    cfg: FulfillmentConfig,
    store: Arc<S>,
    audit: AuditLog,
) -> Result<FulfillmentService<S>, FulfillmentError> {
    cfg.validate().map_err(FulfillmentError::Config)?;
    info!(
        reassign_interval_secs = cfg.scheduler.reassign_interval_secs,
        retry_delay_secs = cfg.scheduler.retry_delay_secs,
        window_days = cfg.estimator.window_days,
        audit = ?audit,
        "fulfillment service configured"
    );
    Ok(FulfillmentService::new(store, cfg, audit))
}
