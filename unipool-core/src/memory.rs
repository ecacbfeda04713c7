use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, RwLock};
use uuid::Uuid;

use crate::models::{Booking, BookingStatus, Page, Paged, Ride, RideFilter, RideStatus};
use crate::notify::{Contact, ContactDirectory};
use crate::repository::{BookingRepository, RideRepository, StoreError, StoreResult};

fn lock<T>(mutex: &Mutex<T>) -> StoreResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| StoreError::Backend("in-memory store lock poisoned".to_string()))
}

/// In-process ride documents. Each method holds the map lock for exactly one
/// document update, which gives the same single-document atomicity the
/// Postgres store gets from one `UPDATE ... WHERE` statement.
#[derive(Default)]
pub struct InMemoryRideRepository {
    rides: Mutex<HashMap<Uuid, Ride>>,
}

impl InMemoryRideRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `update` to the ride when `condition` holds.
    fn update_where(
        &self,
        id: Uuid,
        condition: impl FnOnce(&Ride) -> bool,
        update: impl FnOnce(&mut Ride),
    ) -> StoreResult<Option<Ride>> {
        let mut rides = lock(&self.rides)?;
        match rides.get_mut(&id) {
            Some(ride) if condition(ride) => {
                update(ride);
                ride.updated_at = Utc::now();
                Ok(Some(ride.clone()))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl RideRepository for InMemoryRideRepository {
    async fn insert(&self, ride: &Ride) -> StoreResult<()> {
        let mut rides = lock(&self.rides)?;
        if rides.contains_key(&ride.id) {
            return Err(StoreError::Duplicate(ride.id));
        }
        rides.insert(ride.id, ride.clone());
        Ok(())
    }

    async fn find(&self, id: Uuid) -> StoreResult<Option<Ride>> {
        Ok(lock(&self.rides)?.get(&id).cloned())
    }

    async fn list_open(&self, filter: &RideFilter, page: Page) -> StoreResult<Paged<Ride>> {
        let mut matching: Vec<Ride> = lock(&self.rides)?
            .values()
            .filter(|r| r.accepts_bookings() && r.available_seats > 0 && filter.matches(r))
            .cloned()
            .collect();
        matching.sort_by_key(|r| (r.date, r.created_at));
        Ok(Paged::from_sorted(matching, page))
    }

    async fn list_by_driver(&self, driver_id: Uuid, page: Page) -> StoreResult<Paged<Ride>> {
        let mut owned: Vec<Ride> = lock(&self.rides)?
            .values()
            .filter(|r| r.driver_id == driver_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(Paged::from_sorted(owned, page))
    }

    async fn list_all(&self) -> StoreResult<Vec<Ride>> {
        Ok(lock(&self.rides)?.values().cloned().collect())
    }

    async fn reserve_seats(&self, id: Uuid, seats: i32) -> StoreResult<Option<Ride>> {
        self.update_where(
            id,
            |r| r.status == RideStatus::Open && r.available_seats >= seats,
            |r| r.available_seats -= seats,
        )
    }

    async fn release_seats(&self, id: Uuid, seats: i32) -> StoreResult<Option<Ride>> {
        self.update_where(
            id,
            |_| true,
            |r| r.available_seats = r.available_seats.saturating_add(seats).min(r.total_seats),
        )
    }

    async fn mark_full(&self, id: Uuid) -> StoreResult<Option<Ride>> {
        self.update_where(
            id,
            |r| r.status == RideStatus::Open && r.available_seats == 0,
            |r| r.status = RideStatus::Full,
        )
    }

    async fn reopen(&self, id: Uuid) -> StoreResult<Option<Ride>> {
        self.update_where(
            id,
            |r| r.status == RideStatus::Full && r.available_seats > 0,
            |r| r.status = RideStatus::Open,
        )
    }

    async fn confirm(&self, id: Uuid) -> StoreResult<Option<Ride>> {
        self.update_where(
            id,
            |r| r.status == RideStatus::Pending,
            |r| {
                r.confirmed = true;
                r.status = RideStatus::Open;
            },
        )
    }

    async fn withdraw(&self, id: Uuid) -> StoreResult<Option<Ride>> {
        self.update_where(
            id,
            |r| !r.status.is_terminal(),
            |r| r.status = RideStatus::Cancelled,
        )
    }

    async fn reinstate(&self, id: Uuid) -> StoreResult<Option<Ride>> {
        self.update_where(
            id,
            |r| r.status == RideStatus::Cancelled,
            |r| {
                r.status = if !r.confirmed {
                    RideStatus::Pending
                } else if r.available_seats == 0 {
                    RideStatus::Full
                } else {
                    RideStatus::Open
                };
            },
        )
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        Ok(lock(&self.rides)?.remove(&id).is_some())
    }
}

#[derive(Default)]
pub struct InMemoryBookingRepository {
    bookings: Mutex<HashMap<Uuid, Booking>>,
}

impl InMemoryBookingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn newest_first(
        &self,
        keep: impl Fn(&Booking) -> bool,
        page: Page,
    ) -> StoreResult<Paged<Booking>> {
        let mut selected: Vec<Booking> = lock(&self.bookings)?
            .values()
            .filter(|b| keep(*b))
            .cloned()
            .collect();
        selected.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(Paged::from_sorted(selected, page))
    }
}

#[async_trait]
impl BookingRepository for InMemoryBookingRepository {
    async fn insert(&self, booking: &Booking) -> StoreResult<()> {
        let mut bookings = lock(&self.bookings)?;
        if bookings.contains_key(&booking.id) {
            return Err(StoreError::Duplicate(booking.id));
        }
        bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn find(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        Ok(lock(&self.bookings)?.get(&id).cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
    ) -> StoreResult<Option<Booking>> {
        let mut bookings = lock(&self.bookings)?;
        match bookings.get_mut(&id) {
            Some(booking) if booking.booking_status == from => {
                booking.booking_status = to;
                booking.updated_at = Utc::now();
                Ok(Some(booking.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn count_for_ride(&self, ride_id: Uuid, status: BookingStatus) -> StoreResult<u64> {
        Ok(lock(&self.bookings)?
            .values()
            .filter(|b| b.ride_id == ride_id && b.booking_status == status)
            .count() as u64)
    }

    async fn cancel_active_for_ride(&self, ride_id: Uuid) -> StoreResult<u64> {
        let mut bookings = lock(&self.bookings)?;
        let now = Utc::now();
        let mut cancelled = 0;
        for booking in bookings
            .values_mut()
            .filter(|b| b.ride_id == ride_id && b.booking_status.holds_seats())
        {
            booking.booking_status = BookingStatus::Cancelled;
            booking.updated_at = now;
            cancelled += 1;
        }
        Ok(cancelled)
    }

    async fn list_for_ride(&self, ride_id: Uuid) -> StoreResult<Vec<Booking>> {
        Ok(lock(&self.bookings)?
            .values()
            .filter(|b| b.ride_id == ride_id)
            .cloned()
            .collect())
    }

    async fn list_by_student(&self, student_id: Uuid, page: Page) -> StoreResult<Paged<Booking>> {
        self.newest_first(|b| b.student_id == student_id, page)
    }

    async fn list_by_driver(&self, driver_id: Uuid, page: Page) -> StoreResult<Paged<Booking>> {
        self.newest_first(|b| b.driver_id == driver_id, page)
    }
}

/// Contact details keyed by user id, for development and tests.
#[derive(Default)]
pub struct InMemoryContactDirectory {
    contacts: RwLock<HashMap<Uuid, Contact>>,
}

impl InMemoryContactDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, contact: Contact) -> StoreResult<()> {
        self.contacts
            .write()
            .map_err(|_| StoreError::Backend("contact directory lock poisoned".to_string()))?
            .insert(contact.user_id, contact);
        Ok(())
    }
}

#[async_trait]
impl ContactDirectory for InMemoryContactDirectory {
    async fn contact(&self, user_id: Uuid) -> StoreResult<Option<Contact>> {
        Ok(self
            .contacts
            .read()
            .map_err(|_| StoreError::Backend("contact directory lock poisoned".to_string()))?
            .get(&user_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewRide;
    use chrono::NaiveDate;

    fn open_ride(total: i32) -> Ride {
        let mut ride = Ride::new(
            Uuid::new_v4(),
            NewRide {
                pickup_location: "Hostel 4".into(),
                drop_location: "City Mall".into(),
                date: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
                time: "6:00 PM".into(),
                price_per_seat: 80,
                total_seats: total,
            },
        );
        ride.status = RideStatus::Open;
        ride.confirmed = true;
        ride
    }

    #[tokio::test]
    async fn test_conditional_ride_updates() {
        let repo = InMemoryRideRepository::new();
        let ride = open_ride(2);
        repo.insert(&ride).await.unwrap();
        assert!(matches!(repo.insert(&ride).await, Err(StoreError::Duplicate(_))));

        assert!(repo.reserve_seats(ride.id, 3).await.unwrap().is_none());
        let after = repo.reserve_seats(ride.id, 2).await.unwrap().unwrap();
        assert_eq!(after.available_seats, 0);

        assert!(repo.reopen(ride.id).await.unwrap().is_none());
        assert_eq!(repo.mark_full(ride.id).await.unwrap().unwrap().status, RideStatus::Full);
        assert!(repo.reserve_seats(ride.id, 1).await.unwrap().is_none());

        // Clamped to capacity.
        let released = repo.release_seats(ride.id, 5).await.unwrap().unwrap();
        assert_eq!(released.available_seats, 2);
        assert_eq!(repo.reopen(ride.id).await.unwrap().unwrap().status, RideStatus::Open);
        assert!(repo.confirm(ride.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_release_saturates_at_capacity() {
        let repo = InMemoryRideRepository::new();
        let ride = open_ride(3);
        repo.insert(&ride).await.unwrap();
        repo.reserve_seats(ride.id, 1).await.unwrap();

        let released = repo.release_seats(ride.id, i32::MAX).await.unwrap().unwrap();
        assert_eq!(released.available_seats, 3);
    }

    #[tokio::test]
    async fn test_reinstate_derives_status() {
        let repo = InMemoryRideRepository::new();
        let ride = open_ride(2);
        repo.insert(&ride).await.unwrap();

        assert!(repo.reinstate(ride.id).await.unwrap().is_none());

        repo.reserve_seats(ride.id, 2).await.unwrap();
        repo.withdraw(ride.id).await.unwrap();
        assert!(repo.reserve_seats(ride.id, 1).await.unwrap().is_none());
        assert_eq!(repo.reinstate(ride.id).await.unwrap().unwrap().status, RideStatus::Full);

        let mut unconfirmed = open_ride(2);
        unconfirmed.status = RideStatus::Pending;
        unconfirmed.confirmed = false;
        repo.insert(&unconfirmed).await.unwrap();
        repo.withdraw(unconfirmed.id).await.unwrap();
        let back = repo.reinstate(unconfirmed.id).await.unwrap().unwrap();
        assert_eq!(back.status, RideStatus::Pending);
    }

    #[tokio::test]
    async fn test_booking_compare_and_set() {
        let repo = InMemoryBookingRepository::new();
        let ride = open_ride(3);
        let departs = ride.date.and_hms_opt(18, 0, 0).unwrap();
        let booking = Booking::new(&ride, Uuid::new_v4(), 1, departs);
        repo.insert(&booking).await.unwrap();

        let moved = repo
            .transition(booking.id, BookingStatus::Pending, BookingStatus::Confirmed)
            .await
            .unwrap();
        assert_eq!(moved.unwrap().booking_status, BookingStatus::Confirmed);

        let stale = repo
            .transition(booking.id, BookingStatus::Pending, BookingStatus::Cancelled)
            .await
            .unwrap();
        assert!(stale.is_none());

        assert_eq!(repo.cancel_active_for_ride(ride.id).await.unwrap(), 1);
        assert_eq!(repo.count_for_ride(ride.id, BookingStatus::Cancelled).await.unwrap(), 1);
    }
}
