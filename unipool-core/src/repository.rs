use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Booking, BookingStatus, Page, Paged, Ride, RideFilter};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage backend failure: {0}")]
    Backend(String),
    #[error("Record already exists: {0}")]
    Duplicate(Uuid),
    #[error("Stored record could not be decoded: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Ride storage.
///
/// Seat counts and status are never overwritten. Every mutation is a single
/// conditional update that either applies atomically and returns the
/// post-update ride, or matches nothing and returns `None`. Callers must
/// re-read to learn why a `None` happened.
#[async_trait]
pub trait RideRepository: Send + Sync {
    async fn insert(&self, ride: &Ride) -> StoreResult<()>;

    async fn find(&self, id: Uuid) -> StoreResult<Option<Ride>>;

    /// Confirmed open rides with seats left, by date then creation time.
    async fn list_open(&self, filter: &RideFilter, page: Page) -> StoreResult<Paged<Ride>>;

    /// Newest first.
    async fn list_by_driver(&self, driver_id: Uuid, page: Page) -> StoreResult<Paged<Ride>>;

    async fn list_all(&self) -> StoreResult<Vec<Ride>>;

    /// Decrements `available_seats` by `seats` where the ride is open and
    /// has at least that many seats left.
    async fn reserve_seats(&self, id: Uuid, seats: i32) -> StoreResult<Option<Ride>>;

    /// Increments `available_seats`, clamped to `total_seats`. Matches any existing ride.
    async fn release_seats(&self, id: Uuid, seats: i32) -> StoreResult<Option<Ride>>;

    /// open -> full where no seats are left.
    async fn mark_full(&self, id: Uuid) -> StoreResult<Option<Ride>>;

    /// full -> open where seats are left.
    async fn reopen(&self, id: Uuid) -> StoreResult<Option<Ride>>;

    /// pending -> open, setting `confirmed`.
    async fn confirm(&self, id: Uuid) -> StoreResult<Option<Ride>>;

    /// pending/open/full -> cancelled.
    async fn withdraw(&self, id: Uuid) -> StoreResult<Option<Ride>>;

    /// cancelled -> the status the seat count and `confirmed` flag imply:
    /// pending when unconfirmed, full at zero seats, open otherwise.
    async fn reinstate(&self, id: Uuid) -> StoreResult<Option<Ride>>;

    async fn delete(&self, id: Uuid) -> StoreResult<bool>;
}

/// Booking storage. Status changes are compare-and-set on `booking_status`.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn insert(&self, booking: &Booking) -> StoreResult<()>;

    async fn find(&self, id: Uuid) -> StoreResult<Option<Booking>>;

    /// Moves the booking to `to` only if it is still in `from`.
    async fn transition(
        &self,
        id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
    ) -> StoreResult<Option<Booking>>;

    async fn count_for_ride(&self, ride_id: Uuid, status: BookingStatus) -> StoreResult<u64>;

    /// Cancels every pending or confirmed booking of the ride, returning how many moved.
    async fn cancel_active_for_ride(&self, ride_id: Uuid) -> StoreResult<u64>;

    async fn list_for_ride(&self, ride_id: Uuid) -> StoreResult<Vec<Booking>>;

    /// Newest first.
    async fn list_by_student(&self, student_id: Uuid, page: Page) -> StoreResult<Paged<Booking>>;

    /// Newest first.
    async fn list_by_driver(&self, driver_id: Uuid, page: Page) -> StoreResult<Paged<Booking>>;
}
