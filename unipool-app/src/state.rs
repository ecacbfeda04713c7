use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use unipool_core::memory::{
    InMemoryBookingRepository, InMemoryContactDirectory, InMemoryRideRepository,
};
use unipool_core::notify::ContactDirectory;
use unipool_core::{
    BookingLifecycle, BookingRepository, EventPublisher, RideLifecycle, RideRepository,
};
use unipool_store::app_config::{Config, StoreBackend};
use unipool_store::{
    DbClient, ExpoPushClient, PgBookingRepository, PgContactDirectory, PgRideRepository,
};

use crate::worker::start_notification_worker;

pub struct AppState {
    pub db: Option<Arc<DbClient>>,
    pub rides: Arc<dyn RideRepository>,
    pub bookings: Arc<dyn BookingRepository>,
    pub ride_lifecycle: RideLifecycle,
    pub booking_lifecycle: BookingLifecycle,
}

impl AppState {
    /// Wires repositories, lifecycles and notification delivery from config.
    ///
    /// Returns the worker handle when notifications are enabled; it finishes
    /// after the state (and with it the last publisher) is dropped.
    pub async fn build(config: &Config) -> anyhow::Result<(Self, Option<JoinHandle<()>>)> {
        let (db, rides, bookings, contacts): (
            Option<Arc<DbClient>>,
            Arc<dyn RideRepository>,
            Arc<dyn BookingRepository>,
            Arc<dyn ContactDirectory>,
        ) = match config.store.backend {
            StoreBackend::Memory => {
                info!("Using in-memory store");
                let rides: Arc<dyn RideRepository> = Arc::new(InMemoryRideRepository::new());
                let bookings: Arc<dyn BookingRepository> =
                    Arc::new(InMemoryBookingRepository::new());
                let contacts: Arc<dyn ContactDirectory> = Arc::new(InMemoryContactDirectory::new());
                (None, rides, bookings, contacts)
            }
            StoreBackend::Postgres => {
                let db = DbClient::new(&config.database).await?;
                db.migrate().await?;
                let pool = db.pool.clone();
                let rides: Arc<dyn RideRepository> = Arc::new(PgRideRepository::new(pool.clone()));
                let bookings: Arc<dyn BookingRepository> =
                    Arc::new(PgBookingRepository::new(pool.clone()));
                let contacts: Arc<dyn ContactDirectory> = Arc::new(PgContactDirectory::new(pool));
                (Some(Arc::new(db)), rides, bookings, contacts)
            }
        };

        let (publisher, worker) = if config.notifications.enabled {
            let dispatcher = Arc::new(ExpoPushClient::new(&config.notifications)?);
            let (publisher, rx) = EventPublisher::channel();
            (publisher, Some(start_notification_worker(rx, contacts, dispatcher)))
        } else {
            info!("Push notifications disabled");
            (EventPublisher::disabled(), None)
        };

        let rules = &config.business_rules;
        let ride_lifecycle = RideLifecycle::new(rides.clone(), bookings.clone())
            .with_page_size_limit(rules.page_size_limit);
        let booking_lifecycle = BookingLifecycle::new(rides.clone(), bookings.clone(), publisher)
            .with_max_seats(rules.max_seats_per_booking)
            .with_page_size_limit(rules.page_size_limit);

        Ok((
            Self {
                db,
                rides,
                bookings,
                ride_lifecycle,
                booking_lifecycle,
            },
            worker,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use unipool_core::{CoreError, NewRide};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_memory_backend_applies_business_rules() {
        let mut config = Config::default();
        config.business_rules.max_seats_per_booking = 2;

        let (state, worker) = AppState::build(&config).await.unwrap();
        assert!(worker.is_none());
        assert!(state.db.is_none());

        let driver = Uuid::new_v4();
        let ride = state
            .ride_lifecycle
            .create_ride(
                driver,
                NewRide {
                    pickup_location: "Science Block".into(),
                    drop_location: "Old Town".into(),
                    date: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
                    time: "9:00 AM".into(),
                    price_per_seat: 40,
                    total_seats: 4,
                },
            )
            .await
            .unwrap();
        state.ride_lifecycle.confirm(ride.id, driver).await.unwrap();

        let result = state.booking_lifecycle.create_booking(ride.id, Uuid::new_v4(), 3).await;
        assert!(matches!(result, Err(CoreError::InvalidSeatCount { requested: 3, max: 2 })));
    }
}
