//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use mechanic_dispatch::config::FulfillmentConfig;
use mechanic_dispatch::core::{
    Booking, BookingStatus, CreateBookingPayload, EncodedIdSet, InMemoryAuditSink, Location,
    Mechanic, MechanicIdSet, Money, ServiceDetails, ServiceItem, User, VehicleDetails,
};
use mechanic_dispatch::infra::MemoryStore;
use parking_lot::Mutex;
use uuid::Uuid;

pub fn mid(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

pub fn mechanic(n: u128, rating: f64) -> Mechanic {
    Mechanic {
        id: mid(n),
        full_name: format!("Mechanic {n}"),
        rating,
        is_available: true,
        balance: 0,
    }
}

pub fn user(balance: Money) -> User {
    let id = Uuid::new_v4();
    User {
        id,
        full_name: "Test Customer".into(),
        email: format!("{id}@example.com"),
        balance,
    }
}

pub fn service_item(name: &str, available: bool) -> ServiceItem {
    ServiceItem {
        id: Uuid::new_v4(),
        name: name.into(),
        base_price: 5_000,
        is_available: available,
    }
}

pub fn payload(date: &str, services: Vec<Uuid>) -> CreateBookingPayload {
    CreateBookingPayload {
        location: Location {
            lat: 6.5244,
            lng: 3.3792,
            address: "12 Marina Road".into(),
        },
        date: date.into(),
        service_details: ServiceDetails {
            service_type: "repair".into(),
            services,
            description: Some("brakes squeal".into()),
        },
        vehicle_details: VehicleDetails {
            kind: "car".into(),
            brand: "Toyota".into(),
            size: "medium".into(),
            model: 2018,
        },
        vehicle_image_urls: vec!["https://img.example.com/front.jpg".into()],
    }
}

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Pending booking inserted directly into the store, bypassing intake.
pub fn pending_booking(provisional: Uuid, date: NaiveDate) -> Booking {
    let now = Utc::now();
    let empty = MechanicIdSet::new().encode();
    Booking {
        id: Uuid::new_v4(),
        payment_ref: format!("REF-{}", Uuid::new_v4()),
        user_id: Uuid::new_v4(),
        provisional_mechanic_id: provisional,
        confirmed_mechanic_id: None,
        status: BookingStatus::Pending,
        booking_date: midnight(date),
        fee: 1_000,
        blacklisted_mechanics: empty.clone(),
        visited_mechanics: empty,
        next_execution_at: None,
        error_message: None,
        vehicle_id: Uuid::new_v4(),
        service_type: "repair".into(),
        service_description: None,
        service_ids: vec![],
        location: Location::default(),
        vehicle_image_urls: vec![],
        created_at: now,
        updated_at: now,
    }
}

pub fn ids(members: &[u128]) -> EncodedIdSet {
    members.iter().map(|n| mid(*n)).collect::<MechanicIdSet>().encode()
}

pub fn store_with_fee(fee: Money) -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    store.set_booking_fee(fee);
    Arc::new(store)
}

pub fn config() -> FulfillmentConfig {
    FulfillmentConfig::default()
}

pub fn shared_sink() -> Arc<Mutex<InMemoryAuditSink>> {
    Arc::new(Mutex::new(InMemoryAuditSink::new(256)))
}
