//! Booking intake.
//!
//! Creating a booking debits the customer's fee, resolves the requested
//! service items, picks a provisional mechanic, and writes the vehicle and
//! booking rows. All writes share one unit of work; if any step fails nothing
//! is applied, including the debit. A debit computed from a balance that has
//! since moved is discarded and the intake starts over from a fresh read.
//! Only after commit is the booking handed to the reassignment scheduler.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::core::audit::{AuditAction, AuditLog};
use crate::core::id_set::MechanicIdSet;
use crate::core::ledger::{Ledger, STALE_ATTEMPTS};
use crate::core::matcher::MechanicMatcher;
use crate::core::model::{
    Account, Booking, BookingStatus, Location, Money, ServiceItem, User, UserId, Vehicle,
};
use crate::core::reassign;
use crate::core::scheduler::ReassignmentScheduler;
use crate::core::store::{Storage, UnitOfWork};
use crate::core::FulfillmentError;
use crate::util::{clock, refs};

/// Requested service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDetails {
    /// Service category, e.g. "repair".
    #[serde(rename = "type")]
    pub service_type: String,
    /// Catalogue items to include.
    #[serde(default)]
    pub services: Vec<Uuid>,
    /// Free-form notes.
    pub description: Option<String>,
}

/// Vehicle being serviced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleDetails {
    /// Body type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Manufacturer.
    pub brand: String,
    /// Size class.
    pub size: String,
    /// Model year.
    pub model: i32,
}

/// Booking creation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingPayload {
    /// Where the work happens.
    pub location: Location,
    /// Requested day, `YYYY-MM-DD`.
    pub date: String,
    /// What to do.
    #[serde(rename = "servicesDetails")]
    pub service_details: ServiceDetails,
    /// Vehicle description.
    pub vehicle_details: VehicleDetails,
    /// Already-uploaded images.
    #[serde(default, rename = "vehicleImagesUrl")]
    pub vehicle_image_urls: Vec<String>,
}

impl CreateBookingPayload {
    /// Check required fields and parse the requested date.
    ///
    /// # Errors
    ///
    /// [`FulfillmentError::Validation`] naming the first offending field.
    pub fn validate(&self) -> Result<DateTime<Utc>, FulfillmentError> {
        let invalid = |msg: &str| Err(FulfillmentError::Validation(msg.to_owned()));

        if self.location.address.trim().is_empty() {
            return invalid("location.address is required");
        }
        if !(-90.0..=90.0).contains(&self.location.lat) || !(-180.0..=180.0).contains(&self.location.lng)
        {
            return invalid("location coordinates out of range");
        }
        if self.service_details.service_type.trim().is_empty() {
            return invalid("servicesDetails.type is required");
        }
        let vehicle = &self.vehicle_details;
        if vehicle.kind.trim().is_empty() || vehicle.brand.trim().is_empty() || vehicle.size.trim().is_empty() {
            return invalid("vehicleDetails type, brand and size are required");
        }
        if vehicle.model <= 0 {
            return invalid("vehicleDetails.model must be a year");
        }

        let day = NaiveDate::parse_from_str(self.date.trim(), "%Y-%m-%d").map_err(|e| {
            FulfillmentError::Validation(format!("date must be YYYY-MM-DD: {e}"))
        })?;
        Ok(day.and_time(NaiveTime::MIN).and_utc())
    }
}

/// Orchestrates booking creation.
pub struct BookingIntake<S> {
    store: Arc<S>,
    ledger: Ledger<S>,
    matcher: MechanicMatcher<S>,
    scheduler: ReassignmentScheduler<S>,
    cfg: SchedulerConfig,
    audit: AuditLog,
}

impl<S: Storage> BookingIntake<S> {
    /// Wire intake to its collaborators.
    pub fn new(
        store: Arc<S>,
        scheduler: ReassignmentScheduler<S>,
        cfg: SchedulerConfig,
        audit: AuditLog,
    ) -> Self {
        Self {
            ledger: Ledger::new(Arc::clone(&store), audit.clone()),
            matcher: MechanicMatcher::new(Arc::clone(&store)),
            store,
            scheduler,
            cfg,
            audit,
        }
    }

    /// Create a booking for `user_id` and arm its first reassignment check.
    ///
    /// # Errors
    ///
    /// * [`FulfillmentError::Validation`] for a malformed payload;
    /// * [`FulfillmentError::InsufficientFunds`] when the balance is below
    ///   the fee, before anything is written;
    /// * [`FulfillmentError::NoMechanic`] when nobody can take the booking;
    /// * not-found and storage errors otherwise.
    ///
    /// On any error every staged write is discarded.
    #[instrument(skip(self, payload), fields(user_id = %user_id))]
    pub async fn create(
        &self,
        payload: CreateBookingPayload,
        user_id: UserId,
    ) -> Result<Booking, FulfillmentError> {
        let booking_date = payload.validate()?;
        let mut attempt = 1;
        let booking = loop {
            match self.try_create(&payload, user_id, booking_date).await {
                Err(e) if e.is_stale() && attempt < STALE_ATTEMPTS => {
                    debug!(attempt, error = %e, "balance moved during intake, retrying");
                    attempt += 1;
                }
                other => break other?,
            }
        };

        if let Some(at) = booking.next_execution_at {
            self.scheduler.arm(booking.id, at);
        }
        info!(
            booking_id = %booking.id,
            mechanic_id = %booking.provisional_mechanic_id,
            payment_ref = %booking.payment_ref,
            "booking created"
        );
        self.audit.record(
            booking.id.to_string(),
            AuditAction::BookingCreated,
            Some(booking.provisional_mechanic_id.to_string()),
        );
        Ok(booking)
    }

    async fn try_create(
        &self,
        payload: &CreateBookingPayload,
        user_id: UserId,
        booking_date: DateTime<Utc>,
    ) -> Result<Booking, FulfillmentError> {
        let (fee, user) =
            tokio::try_join!(self.store.booking_fee(), self.store.get_user(user_id))?;
        if user.balance < fee {
            warn!(balance = user.balance, fee, "insufficient funds for booking");
            return Err(FulfillmentError::InsufficientFunds {
                balance: user.balance,
                fee,
            });
        }

        let mut tx = self.store.begin().await?;
        let booking = match self.stage(tx.as_mut(), payload, &user, fee, booking_date).await {
            Ok(booking) => booking,
            Err(e) => {
                warn!(error = %e, "booking intake aborted, rolling back");
                tx.rollback().await;
                return Err(e);
            }
        };
        tx.commit().await?;
        Ok(booking)
    }

    async fn stage(
        &self,
        tx: &mut dyn UnitOfWork,
        payload: &CreateBookingPayload,
        user: &User,
        fee: Money,
        booking_date: DateTime<Utc>,
    ) -> Result<Booking, FulfillmentError> {
        let debit = self
            .ledger
            .debit(
                tx,
                Account::User(user.id),
                user.balance,
                fee,
                Some("booking fee".to_owned()),
            )
            .await?;

        let nobody = MechanicIdSet::new();
        let (services, mechanic) = tokio::try_join!(
            self.resolve_services(&payload.service_details.services),
            async {
                self.matcher
                    .find(&nobody, &nobody)
                    .await
                    .map_err(FulfillmentError::from)
            },
        )?;

        let details = &payload.vehicle_details;
        let vehicle = tx
            .create_vehicle(Vehicle {
                id: Uuid::new_v4(),
                kind: details.kind.clone(),
                brand: details.brand.clone(),
                size: details.size.clone(),
                model_year: details.model,
            })
            .await?;

        let now = clock::now();
        let booking = Booking {
            id: Uuid::new_v4(),
            payment_ref: refs::payment_reference(),
            user_id: user.id,
            provisional_mechanic_id: mechanic.id,
            confirmed_mechanic_id: None,
            status: BookingStatus::Pending,
            booking_date,
            fee,
            blacklisted_mechanics: nobody.encode(),
            visited_mechanics: nobody.encode(),
            next_execution_at: Some(reassign::after(now, self.cfg.reassign_interval_secs)),
            error_message: None,
            vehicle_id: vehicle.id,
            service_type: payload.service_details.service_type.clone(),
            service_description: payload.service_details.description.clone(),
            service_ids: services.iter().map(|s| s.id).collect(),
            location: payload.location.clone(),
            vehicle_image_urls: payload.vehicle_image_urls.clone(),
            created_at: now,
            updated_at: now,
        };
        let booking = tx.create_booking(booking).await?;
        info!(reference = %debit.reference, fee, "booking fee staged");
        Ok(booking)
    }

    async fn resolve_services(&self, ids: &[Uuid]) -> Result<Vec<ServiceItem>, FulfillmentError> {
        let services = try_join_all(ids.iter().map(|id| self.store.get_service(*id))).await?;
        if let Some(unavailable) = services.iter().find(|s| !s.is_available) {
            return Err(FulfillmentError::Validation(format!(
                "service {} is not available",
                unavailable.name
            )));
        }
        Ok(services)
    }
}
