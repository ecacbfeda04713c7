use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{Ride, RideStatus};
use crate::repository::RideRepository;
use crate::ride::settle_status;
use crate::{CoreError, CoreResult};

/// Guarded seat counter on ride records.
///
/// Never reads or writes bookings. All changes go through the repository's
/// conditional updates, so concurrent callers need no coordination here.
#[derive(Clone)]
pub struct SeatLedger {
    rides: Arc<dyn RideRepository>,
}

impl SeatLedger {
    pub fn new(rides: Arc<dyn RideRepository>) -> Self {
        Self { rides }
    }

    /// Takes `seats` from an open ride, all or nothing.
    ///
    /// A failed conditional update is re-classified from a fresh read, so the
    /// loser of a race reports insufficiency instead of retrying. When the read
    /// shows enough seats, the status is settled and the update tried once more.
    pub async fn reserve(&self, ride_id: Uuid, seats: i32) -> CoreResult<Ride> {
        if seats < 1 {
            return Err(CoreError::InvalidSeatCount { requested: seats, max: i32::MAX });
        }

        let mut settled = false;
        loop {
            if let Some(ride) = self.rides.reserve_seats(ride_id, seats).await? {
                debug!(%ride_id, seats, available = ride.available_seats, "Seats reserved");
                return Ok(ride);
            }

            let current = self
                .rides
                .find(ride_id)
                .await?
                .ok_or(CoreError::RideNotFound(ride_id))?;

            // A full ride is still bookable in principle; report it as contention.
            if !matches!(current.status, RideStatus::Open | RideStatus::Full) {
                return Err(CoreError::RideNotOpen(current.status));
            }
            if current.available_seats < seats {
                debug!(
                    %ride_id,
                    seats,
                    available = current.available_seats,
                    "Reservation lost to contention"
                );
                return Err(CoreError::InsufficientSeats {
                    requested: seats,
                    available: current.available_seats,
                });
            }

            // Seats were returned but the ride still reads full, or the count
            // moved between the update and the read.
            if settled {
                return Err(CoreError::SeatsContended);
            }
            settled = true;
            settle_status(self.rides.as_ref(), current).await?;
        }
    }

    /// Returns `seats` to the ride and reopens it if it had filled up.
    ///
    /// Must be issued once per reservation; the count is still clamped to
    /// capacity. Returns `None` when the ride no longer exists. An error means
    /// the seats were not returned; once they are, a failed status update is
    /// only logged.
    pub async fn release(&self, ride_id: Uuid, seats: i32) -> CoreResult<Option<Ride>> {
        if seats < 1 {
            return Err(CoreError::InvalidSeatCount { requested: seats, max: i32::MAX });
        }

        let Some(ride) = self.rides.release_seats(ride_id, seats).await? else {
            warn!(%ride_id, seats, "Released seats for a ride that no longer exists");
            return Ok(None);
        };

        debug!(%ride_id, seats, available = ride.available_seats, "Seats released");
        match settle_status(self.rides.as_ref(), ride.clone()).await {
            Ok(settled) => Ok(Some(settled)),
            Err(e) => {
                warn!(%ride_id, "Failed to reopen ride after release: {}", e);
                Ok(Some(ride))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRideRepository;
    use crate::models::NewRide;
    use chrono::NaiveDate;

    async fn ledger_with_ride(
        total: i32,
        status: RideStatus,
    ) -> (SeatLedger, Arc<InMemoryRideRepository>, Uuid) {
        let repo = Arc::new(InMemoryRideRepository::new());
        let mut ride = Ride::new(
            Uuid::new_v4(),
            NewRide {
                pickup_location: "Library".into(),
                drop_location: "Bus Stand".into(),
                date: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
                time: "8:30 AM".into(),
                price_per_seat: 50,
                total_seats: total,
            },
        );
        ride.status = status;
        ride.confirmed = status != RideStatus::Pending;
        repo.insert(&ride).await.unwrap();
        (SeatLedger::new(repo.clone()), repo, ride.id)
    }

    #[tokio::test]
    async fn test_reserve_then_release_round_trip() {
        let (ledger, repo, ride_id) = ledger_with_ride(2, RideStatus::Open).await;

        let reserved = ledger.reserve(ride_id, 2).await.unwrap();
        assert_eq!(reserved.available_seats, 0);
        repo.mark_full(ride_id).await.unwrap();

        let released = ledger.release(ride_id, 2).await.unwrap().unwrap();
        assert_eq!(released.available_seats, 2);
        assert_eq!(released.status, RideStatus::Open);
    }

    #[tokio::test]
    async fn test_reserve_failures_are_classified() {
        let (ledger, _repo, ride_id) = ledger_with_ride(1, RideStatus::Open).await;
        match ledger.reserve(ride_id, 2).await {
            Err(CoreError::InsufficientSeats { requested: 2, available: 1 }) => {}
            other => panic!("unexpected {other:?}"),
        }

        let (pending, _repo, pending_id) = ledger_with_ride(3, RideStatus::Pending).await;
        assert!(matches!(
            pending.reserve(pending_id, 1).await,
            Err(CoreError::RideNotOpen(RideStatus::Pending))
        ));

        assert!(matches!(
            ledger.reserve(Uuid::new_v4(), 1).await,
            Err(CoreError::RideNotFound(_))
        ));
        assert!(matches!(
            ledger.reserve(ride_id, 0).await,
            Err(CoreError::InvalidSeatCount { .. })
        ));
    }

    #[tokio::test]
    async fn test_release_is_clamped_to_capacity() {
        let (ledger, _repo, ride_id) = ledger_with_ride(3, RideStatus::Open).await;
        ledger.reserve(ride_id, 1).await.unwrap();
        let ride = ledger.release(ride_id, 4).await.unwrap().unwrap();
        assert_eq!(ride.available_seats, 3);
        assert!(ledger.release(Uuid::new_v4(), 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reserve_settles_a_ride_still_marked_full() {
        let (ledger, repo, ride_id) = ledger_with_ride(2, RideStatus::Open).await;
        ledger.reserve(ride_id, 2).await.unwrap();
        repo.mark_full(ride_id).await.unwrap();

        // A release landed but the reopen has not run yet.
        repo.release_seats(ride_id, 1).await.unwrap();
        assert_eq!(repo.find(ride_id).await.unwrap().unwrap().status, RideStatus::Full);

        let ride = ledger.reserve(ride_id, 1).await.unwrap();
        assert_eq!(ride.available_seats, 0);
        assert_eq!(ride.status, RideStatus::Open);
    }
}
