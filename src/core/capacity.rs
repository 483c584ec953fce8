//! Capacity estimation.
//!
//! A date is disabled when more pending bookings fall on it than there are
//! available mechanics right now. Demand and supply are read concurrently and
//! each read is bounded; if either fails the estimate is abandoned rather
//! than computed from half the picture.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, NaiveDate};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::config::EstimatorConfig;
use crate::core::model::Booking;
use crate::core::store::Storage;
use crate::core::{FulfillmentError, StoreError};
use crate::util::clock;

/// Demand per calendar day.
pub type DemandHistogram = BTreeMap<NaiveDate, usize>;

/// Count pending bookings per day of their booking date.
#[must_use]
pub fn demand_histogram(bookings: &[Booking]) -> DemandHistogram {
    let mut histogram = DemandHistogram::new();
    for booking in bookings {
        *histogram.entry(booking.booking_date.date_naive()).or_default() += 1;
    }
    histogram
}

/// The `window_days` dates starting the day after `today`.
#[must_use]
pub fn window(today: NaiveDate, window_days: u32) -> Vec<NaiveDate> {
    let first = clock::tomorrow(today);
    (0..u64::from(window_days))
        .filter_map(|offset| first.checked_add_days(Days::new(offset)))
        .collect()
}

/// Computes dates that can no longer accept bookings.
pub struct CapacityEstimator<S> {
    store: Arc<S>,
    fetch_timeout: Duration,
}

impl<S> Clone for CapacityEstimator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            fetch_timeout: self.fetch_timeout,
        }
    }
}

impl<S: Storage> CapacityEstimator<S> {
    /// Create an estimator over `store`.
    pub fn new(store: Arc<S>, cfg: &EstimatorConfig) -> Self {
        Self {
            store,
            fetch_timeout: cfg.fetch_timeout(),
        }
    }

    /// Disabled dates among the `window_days` days after `today`, ascending.
    ///
    /// # Errors
    ///
    /// [`FulfillmentError::Timeout`] when a read exceeds the fetch timeout,
    /// storage errors when a read fails.
    pub async fn disabled_dates(
        &self,
        window_days: u32,
        today: NaiveDate,
    ) -> Result<Vec<NaiveDate>, FulfillmentError> {
        let (pending, available) = tokio::try_join!(
            self.fetch("pending bookings", self.store.pending_bookings()),
            self.fetch("available mechanics", self.store.available_mechanics()),
        )?;

        let demand = Arc::new(demand_histogram(&pending));
        let supply = available.len();
        debug!(pending = pending.len(), supply, days = window_days, "estimating capacity");

        let mut tasks = JoinSet::new();
        for day in window(today, window_days) {
            let demand = Arc::clone(&demand);
            tasks.spawn(async move {
                let booked = demand.get(&day).copied().unwrap_or(0);
                (booked > supply).then_some(day)
            });
        }

        let mut disabled = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let day = joined.map_err(|e| {
                FulfillmentError::Store(StoreError::Unavailable(format!("estimator task failed: {e}")))
            })?;
            disabled.extend(day);
        }
        disabled.sort_unstable();

        info!(disabled = disabled.len(), supply, "capacity estimated");
        Ok(disabled)
    }

    async fn fetch<T>(
        &self,
        what: &'static str,
        read: impl std::future::Future<Output = Result<Vec<T>, StoreError>>,
    ) -> Result<Vec<T>, FulfillmentError> {
        match timeout(self.fetch_timeout, read).await {
            Ok(rows) => Ok(rows?),
            Err(_) => Err(FulfillmentError::Timeout(what)),
        }
    }
}
