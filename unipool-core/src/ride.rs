use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{BookingStatus, NewRide, Page, Paged, Ride, RideFilter, RideStatus};
use crate::repository::{BookingRepository, RideRepository, StoreResult};
use crate::schedule::parse_ride_time;
use crate::{CoreError, CoreResult};

/// Brings `status` in line with the seat count of a ride snapshot.
///
/// open -> full at zero seats, full -> open once seats return. Both moves are
/// conditional on the stored seat count, so a stale snapshot can only lead to
/// a no-op. Terminal rides are left alone.
pub(crate) async fn settle_status(rides: &dyn RideRepository, ride: Ride) -> StoreResult<Ride> {
    if ride.status.is_terminal() {
        return Ok(ride);
    }
    let settled = match ride.status {
        RideStatus::Open if ride.available_seats == 0 => rides.mark_full(ride.id).await?,
        RideStatus::Full if ride.available_seats > 0 => rides.reopen(ride.id).await?,
        _ => None,
    };
    Ok(settled.unwrap_or(ride))
}

/// Driver-side ride operations and status upkeep.
#[derive(Clone)]
pub struct RideLifecycle {
    rides: Arc<dyn RideRepository>,
    bookings: Arc<dyn BookingRepository>,
    page_size_limit: u32,
}

impl RideLifecycle {
    pub fn new(rides: Arc<dyn RideRepository>, bookings: Arc<dyn BookingRepository>) -> Self {
        Self {
            rides,
            bookings,
            page_size_limit: 100,
        }
    }

    pub fn with_page_size_limit(mut self, limit: u32) -> Self {
        self.page_size_limit = limit.max(1);
        self
    }

    /// Publishes a ride. It stays pending until the driver confirms it.
    pub async fn create_ride(&self, driver_id: Uuid, new_ride: NewRide) -> CoreResult<Ride> {
        if new_ride.total_seats < 1 {
            return Err(CoreError::InvalidRide("total seats must be at least 1".to_string()));
        }
        if new_ride.price_per_seat < 0 {
            return Err(CoreError::InvalidRide("price cannot be negative".to_string()));
        }
        if new_ride.pickup_location.trim().is_empty() || new_ride.drop_location.trim().is_empty() {
            return Err(CoreError::InvalidRide(
                "pickup and drop locations are required".to_string(),
            ));
        }
        parse_ride_time(&new_ride.time)?;

        let ride = Ride::new(driver_id, new_ride);
        self.rides.insert(&ride).await?;
        info!(ride_id = %ride.id, %driver_id, seats = ride.total_seats, "Ride created");
        Ok(ride)
    }

    pub async fn get_ride(&self, ride_id: Uuid) -> CoreResult<Ride> {
        self.rides
            .find(ride_id)
            .await?
            .ok_or(CoreError::RideNotFound(ride_id))
    }

    pub async fn list_open_rides(
        &self,
        filter: &RideFilter,
        page: Page,
    ) -> CoreResult<Paged<Ride>> {
        let page = page.clamp_limit(self.page_size_limit);
        Ok(self.rides.list_open(filter, page).await?)
    }

    pub async fn list_driver_rides(&self, driver_id: Uuid, page: Page) -> CoreResult<Paged<Ride>> {
        let page = page.clamp_limit(self.page_size_limit);
        Ok(self.rides.list_by_driver(driver_id, page).await?)
    }

    /// Opens a pending ride for booking. Only its driver may do this.
    pub async fn confirm(&self, ride_id: Uuid, requester: Uuid) -> CoreResult<Ride> {
        let ride = self.owned_ride(ride_id, requester, "confirm").await?;
        Self::check_confirmable(&ride)?;

        match self.rides.confirm(ride_id).await? {
            Some(confirmed) => {
                info!(%ride_id, "Ride confirmed and open for booking");
                Ok(confirmed)
            }
            None => {
                // Someone moved it between our read and the update.
                let current = self.get_ride(ride_id).await?;
                Self::check_confirmable(&current)?;
                Err(CoreError::RideNotOpen(current.status))
            }
        }
    }

    fn check_confirmable(ride: &Ride) -> CoreResult<()> {
        match ride.status {
            RideStatus::Pending => Ok(()),
            RideStatus::Open | RideStatus::Full => Err(CoreError::RideAlreadyOpen),
            status => Err(CoreError::RideNotOpen(status)),
        }
    }

    /// Keeps `status` consistent after a seat count change.
    pub async fn recompute_after_seat_change(&self, ride: Ride) -> CoreResult<Ride> {
        Ok(settle_status(self.rides.as_ref(), ride).await?)
    }

    /// Deletes a ride that has no confirmed bookings, cancelling the rest.
    ///
    /// The ride is withdrawn before confirmed bookings are counted. A driver
    /// confirmation racing with this call either commits before the count and
    /// blocks the delete, or sees the withdrawn ride and backs out. A refused
    /// delete reinstates the ride. Returns the number of bookings cancelled.
    pub async fn delete_ride(&self, ride_id: Uuid, requester: Uuid) -> CoreResult<u64> {
        let ride = self.owned_ride(ride_id, requester, "delete").await?;

        let withdrawn = self.rides.withdraw(ride_id).await?;
        if withdrawn.is_none() {
            debug!(%ride_id, status = %ride.status, "Ride already closed, deleting as is");
        }

        let confirmed = self
            .bookings
            .count_for_ride(ride_id, BookingStatus::Confirmed)
            .await?;
        if confirmed > 0 {
            if withdrawn.is_some() {
                self.rides.reinstate(ride_id).await?;
            }
            return Err(CoreError::HasConfirmedBookings(confirmed));
        }

        let cancelled = self.bookings.cancel_active_for_ride(ride_id).await?;
        if !self.rides.delete(ride_id).await? {
            warn!(%ride_id, "Ride vanished before deletion");
        }

        info!(%ride_id, cancelled, "Ride deleted");
        Ok(cancelled)
    }

    async fn owned_ride(&self, ride_id: Uuid, requester: Uuid, action: &str) -> CoreResult<Ride> {
        let ride = self.get_ride(ride_id).await?;
        if ride.driver_id != requester {
            warn!(%ride_id, %requester, "Rejected {} by non-owner", action);
            return Err(CoreError::Forbidden(format!("not authorized to {action} this ride")));
        }
        Ok(ride)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryBookingRepository, InMemoryRideRepository};
    use chrono::NaiveDate;

    fn lifecycle() -> (RideLifecycle, Arc<InMemoryRideRepository>) {
        let rides = Arc::new(InMemoryRideRepository::new());
        let bookings = Arc::new(InMemoryBookingRepository::new());
        (RideLifecycle::new(rides.clone(), bookings), rides)
    }

    fn new_ride(total_seats: i32, time: &str) -> NewRide {
        NewRide {
            pickup_location: "  Engineering Block ".into(),
            drop_location: "Railway Station".into(),
            date: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
            time: time.into(),
            price_per_seat: 120,
            total_seats,
        }
    }

    #[tokio::test]
    async fn test_create_and_confirm() {
        let (lifecycle, _) = lifecycle();
        let driver = Uuid::new_v4();

        let ride = lifecycle.create_ride(driver, new_ride(4, "7:45 AM")).await.unwrap();
        assert_eq!(ride.status, RideStatus::Pending);
        assert!(!ride.confirmed);
        assert_eq!(ride.available_seats, 4);
        assert_eq!(ride.pickup_location, "Engineering Block");

        assert!(matches!(
            lifecycle.confirm(ride.id, Uuid::new_v4()).await,
            Err(CoreError::Forbidden(_))
        ));

        let opened = lifecycle.confirm(ride.id, driver).await.unwrap();
        assert_eq!(opened.status, RideStatus::Open);
        assert!(opened.confirmed);

        assert!(matches!(
            lifecycle.confirm(ride.id, driver).await,
            Err(CoreError::RideAlreadyOpen)
        ));
    }

    #[tokio::test]
    async fn test_create_validates_input() {
        let (lifecycle, _) = lifecycle();
        let driver = Uuid::new_v4();
        assert!(matches!(
            lifecycle.create_ride(driver, new_ride(0, "7:45 AM")).await,
            Err(CoreError::InvalidRide(_))
        ));
        assert!(matches!(
            lifecycle.create_ride(driver, new_ride(2, "quarter past")).await,
            Err(CoreError::InvalidTime(_))
        ));
    }

    #[tokio::test]
    async fn test_recompute_never_touches_terminal_rides() {
        let (lifecycle, rides) = lifecycle();
        let driver = Uuid::new_v4();
        let ride = lifecycle.create_ride(driver, new_ride(1, "5:00 PM")).await.unwrap();
        lifecycle.confirm(ride.id, driver).await.unwrap();

        let emptied = rides.reserve_seats(ride.id, 1).await.unwrap().unwrap();
        let full = lifecycle.recompute_after_seat_change(emptied).await.unwrap();
        assert_eq!(full.status, RideStatus::Full);

        let withdrawn = rides.withdraw(ride.id).await.unwrap().unwrap();
        let released = rides.release_seats(ride.id, 1).await.unwrap().unwrap();
        assert_eq!(withdrawn.status, RideStatus::Cancelled);
        let still = lifecycle.recompute_after_seat_change(released).await.unwrap();
        assert_eq!(still.status, RideStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_listing_only_shows_bookable_rides() {
        let (lifecycle, _) = lifecycle();
        let driver = Uuid::new_v4();
        let pending = lifecycle.create_ride(driver, new_ride(2, "9:00 AM")).await.unwrap();
        let open = lifecycle.create_ride(driver, new_ride(2, "10:00 AM")).await.unwrap();
        lifecycle.confirm(open.id, driver).await.unwrap();

        let listed = lifecycle
            .list_open_rides(&RideFilter::default(), Page::default())
            .await
            .unwrap();
        assert_eq!(listed.total, 1);
        assert_eq!(listed.items[0].id, open.id);

        let mine = lifecycle.list_driver_rides(driver, Page::new(1, 1)).await.unwrap();
        assert_eq!(mine.total, 2);
        assert_eq!(mine.pages, 2);
        assert_eq!(mine.items.len(), 1);
        assert!(mine.items[0].id == open.id || mine.items[0].id == pending.id);
    }
}
