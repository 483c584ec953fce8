//! Service boundary consumed by the HTTP/CLI layer.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::FulfillmentConfig;
use crate::core::{
    Account, AuditAction, AuditLog, Booking, BookingId, BookingIntake, BookingStatus,
    CapacityEstimator, CreateBookingPayload, FulfillmentError, Ledger, LedgerEntry, Money,
    ReassignmentScheduler, Storage, User, UserId,
};
use crate::util::clock;

/// Customer registration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    /// Display name.
    pub full_name: String,
    /// Login email; must be unique.
    pub email: String,
}

/// Wallet top-up request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundWallet {
    /// Amount in minor units.
    pub amount: Money,
    /// Note shown on the statement.
    pub description: Option<String>,
}

/// Fulfillment operations over one storage backend.
pub struct FulfillmentService<S> {
    store: Arc<S>,
    cfg: FulfillmentConfig,
    audit: AuditLog,
    intake: BookingIntake<S>,
    scheduler: ReassignmentScheduler<S>,
    estimator: CapacityEstimator<S>,
    ledger: Ledger<S>,
}

impl<S: Storage> FulfillmentService<S> {
    /// Wire every component to `store`. The config is assumed valid; use
    /// [`crate::builders::build_service`] to validate it first.
    pub fn new(store: Arc<S>, cfg: FulfillmentConfig, audit: AuditLog) -> Self {
        let scheduler =
            ReassignmentScheduler::new(Arc::clone(&store), cfg.scheduler.clone(), audit.clone());
        Self {
            intake: BookingIntake::new(
                Arc::clone(&store),
                scheduler.clone(),
                cfg.scheduler.clone(),
                audit.clone(),
            ),
            estimator: CapacityEstimator::new(Arc::clone(&store), &cfg.estimator),
            ledger: Ledger::new(Arc::clone(&store), audit.clone()),
            scheduler,
            store,
            cfg,
            audit,
        }
    }

    /// Configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &FulfillmentConfig {
        &self.cfg
    }

    /// Reassignment scheduler, for inspection.
    #[must_use]
    pub const fn scheduler(&self) -> &ReassignmentScheduler<S> {
        &self.scheduler
    }

    /// Create a booking and arm its first reassignment check.
    ///
    /// # Errors
    ///
    /// See [`BookingIntake::create`].
    pub async fn create_booking(
        &self,
        payload: CreateBookingPayload,
        user_id: UserId,
    ) -> Result<Booking, FulfillmentError> {
        self.intake.create(payload, user_id).await
    }

    /// Cancel a booking and stop its reassignment checks. The fee is not
    /// refunded.
    ///
    /// # Errors
    ///
    /// Not-found for unknown ids; conflict when the booking is already
    /// cancelled or completed.
    #[instrument(skip(self))]
    pub async fn cancel_booking(&self, id: BookingId) -> Result<Booking, FulfillmentError> {
        let mut booking = self.store.get_booking(id).await?;
        match booking.status {
            BookingStatus::Cancelled => {
                return Err(FulfillmentError::Conflict("booking already cancelled".into()));
            }
            BookingStatus::Completed => {
                return Err(FulfillmentError::Conflict("booking already completed".into()));
            }
            BookingStatus::Pending | BookingStatus::Booked => {}
        }

        booking.status = BookingStatus::Cancelled;
        booking.next_execution_at = None;
        booking.updated_at = clock::now();
        self.store.update_booking(&booking).await?;
        let disarmed = self.scheduler.disarm(id);

        info!(booking_id = %id, disarmed, "booking cancelled");
        self.audit
            .record(id.to_string(), AuditAction::BookingCancelled, None);
        Ok(booking)
    }

    /// Dates within the configured window that can no longer accept
    /// bookings, counted from today.
    ///
    /// # Errors
    ///
    /// See [`CapacityEstimator::disabled_dates`].
    pub async fn disabled_dates(&self) -> Result<Vec<NaiveDate>, FulfillmentError> {
        self.disabled_dates_from(self.cfg.estimator.window_days, clock::now().date_naive())
            .await
    }

    /// Disabled dates among the `window_days` days after `today`.
    ///
    /// # Errors
    ///
    /// See [`CapacityEstimator::disabled_dates`].
    pub async fn disabled_dates_from(
        &self,
        window_days: u32,
        today: NaiveDate,
    ) -> Result<Vec<NaiveDate>, FulfillmentError> {
        self.estimator.disabled_dates(window_days, today).await
    }

    /// Re-arm reassignment for every persisted pending booking.
    ///
    /// # Errors
    ///
    /// Fails if pending bookings cannot be listed.
    pub async fn start_all_schedulers(&self) -> Result<usize, FulfillmentError> {
        Ok(self.scheduler.start_all().await?)
    }

    /// Current flat booking fee.
    ///
    /// # Errors
    ///
    /// Storage errors.
    pub async fn booking_fee(&self) -> Result<Money, FulfillmentError> {
        Ok(self.store.booking_fee().await?)
    }

    /// Create a customer with a zero balance.
    ///
    /// # Errors
    ///
    /// Validation error for a blank name or malformed email, conflict when
    /// the email is taken.
    pub async fn register_user(&self, registration: Registration) -> Result<User, FulfillmentError> {
        let full_name = registration.full_name.trim();
        let email = registration.email.trim();
        if full_name.is_empty() {
            return Err(FulfillmentError::Validation("fullName is required".into()));
        }
        if !is_plausible_email(email) {
            return Err(FulfillmentError::Validation(format!("invalid email {email}")));
        }

        let user = User {
            id: Uuid::new_v4(),
            full_name: full_name.to_owned(),
            email: email.to_owned(),
            balance: 0,
        };
        let mut tx = self.store.begin().await?;
        let user = match tx.create_user(user).await {
            Ok(user) => user,
            Err(e) => {
                tx.rollback().await;
                warn!(email, error = %e, "registration rejected");
                return Err(e.into());
            }
        };
        tx.commit().await?;
        info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    /// Open a pending wallet credit. The returned entry's reference is what
    /// the payment provider echoes back on confirmation.
    ///
    /// # Errors
    ///
    /// See [`Ledger::initiate_credit`].
    pub async fn fund_wallet(
        &self,
        user_id: UserId,
        request: FundWallet,
    ) -> Result<LedgerEntry, FulfillmentError> {
        self.ledger
            .initiate_credit(user_id, request.amount, request.description)
            .await
    }

    /// Settle the pending credit `reference` owned by `user_id`.
    ///
    /// # Errors
    ///
    /// Not-found when the reference is unknown or belongs to someone else,
    /// conflict when it was already confirmed.
    pub async fn confirm_payment(
        &self,
        user_id: UserId,
        reference: &str,
    ) -> Result<LedgerEntry, FulfillmentError> {
        let entry = self.ledger.by_reference(reference).await?;
        if entry.account != Account::User(user_id) {
            return Err(FulfillmentError::NotFound(format!("transaction {reference}")));
        }
        self.ledger.confirm_credit(reference, None).await
    }

    /// Bookings of `user_id`, newest first.
    ///
    /// # Errors
    ///
    /// Storage errors.
    pub async fn user_bookings(&self, user_id: UserId) -> Result<Vec<Booking>, FulfillmentError> {
        Ok(self.store.bookings_for_user(user_id).await?)
    }

    /// Stop every reassignment task.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}

fn is_plausible_email(email: &str) -> bool {
    email.split_once('@').is_some_and(|(local, domain)| {
        !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
    })
}

#[cfg(test)]
mod tests {
    use super::is_plausible_email;

    #[test]
    fn email_shape() {
        assert!(is_plausible_email("ada@example.com"));
        assert!(!is_plausible_email("ada.example.com"));
        assert!(!is_plausible_email("@example.com"));
        assert!(!is_plausible_email("ada@localhost"));
    }
}
