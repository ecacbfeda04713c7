#![allow(dead_code)]

use chrono::NaiveDate;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use unipool_core::memory::{InMemoryBookingRepository, InMemoryRideRepository};
use unipool_core::{
    Booking, BookingLifecycle, BookingRepository, EventPublisher, NewRide, Ride, RideLifecycle,
    RideRepository,
};
use unipool_shared::LifecycleEvent;

pub struct World {
    pub rides: Arc<InMemoryRideRepository>,
    pub bookings: Arc<InMemoryBookingRepository>,
    pub ride_lifecycle: RideLifecycle,
    pub booking_lifecycle: BookingLifecycle,
    pub events: UnboundedReceiver<LifecycleEvent>,
}

impl World {
    pub fn new() -> Self {
        let rides = Arc::new(InMemoryRideRepository::new());
        let bookings = Arc::new(InMemoryBookingRepository::new());
        let (publisher, events) = EventPublisher::channel();
        Self {
            ride_lifecycle: RideLifecycle::new(rides.clone(), bookings.clone()),
            booking_lifecycle: BookingLifecycle::new(rides.clone(), bookings.clone(), publisher),
            rides,
            bookings,
            events,
        }
    }

    /// Creates and confirms a ride, returning it open.
    pub async fn open_ride(&self, driver: Uuid, total_seats: i32) -> Ride {
        let ride = self
            .ride_lifecycle
            .create_ride(
                driver,
                NewRide {
                    pickup_location: "Campus Main Gate".into(),
                    drop_location: "Central Station".into(),
                    date: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
                    time: "8:15 AM".into(),
                    price_per_seat: 100,
                    total_seats,
                },
            )
            .await
            .unwrap();
        self.ride_lifecycle.confirm(ride.id, driver).await.unwrap()
    }

    pub async fn ride(&self, id: Uuid) -> Ride {
        self.rides.find(id).await.unwrap().unwrap()
    }

    pub async fn booking(&self, id: Uuid) -> Booking {
        self.bookings.find(id).await.unwrap().unwrap()
    }

    /// `available + Σ active seats == total` for the ride.
    pub async fn assert_ledger_balanced(&self, ride_id: Uuid) {
        let ride = self.ride(ride_id).await;
        let held: i32 = self
            .bookings
            .list_for_ride(ride_id)
            .await
            .unwrap()
            .iter()
            .filter(|b| b.booking_status.holds_seats())
            .map(|b| b.seats_booked)
            .sum();
        assert_eq!(
            ride.available_seats + held,
            ride.total_seats,
            "ledger out of balance: available {} + held {} != total {}",
            ride.available_seats,
            held,
            ride.total_seats
        );
    }
}
