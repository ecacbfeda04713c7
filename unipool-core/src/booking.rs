use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use unipool_shared::{LifecycleEvent, LifecycleEventKind};

use crate::ledger::SeatLedger;
use crate::models::{Booking, BookingAction, BookingStatus, Page, Paged, RideStatus};
use crate::notify::EventPublisher;
use crate::repository::{BookingRepository, RideRepository, StoreResult};
use crate::ride::RideLifecycle;
use crate::schedule::ride_date_time;
use crate::{CoreError, CoreResult};

pub const DEFAULT_MAX_SEATS_PER_BOOKING: i32 = 8;

const RELEASE_ATTEMPTS: u32 = 3;
const RELEASE_BACKOFF: Duration = Duration::from_millis(50);

/// The booking state machine.
///
/// Seats are charged when a booking is created and handed back exactly once
/// when it leaves pending/confirmed for cancelled or rejected. Status changes
/// are compare-and-set against the status this call observed, so at most one
/// concurrent transition commits per booking.
#[derive(Clone)]
pub struct BookingLifecycle {
    rides: Arc<dyn RideRepository>,
    bookings: Arc<dyn BookingRepository>,
    ledger: SeatLedger,
    ride_lifecycle: RideLifecycle,
    publisher: EventPublisher,
    max_seats: i32,
    page_size_limit: u32,
}

impl BookingLifecycle {
    pub fn new(
        rides: Arc<dyn RideRepository>,
        bookings: Arc<dyn BookingRepository>,
        publisher: EventPublisher,
    ) -> Self {
        Self {
            ledger: SeatLedger::new(rides.clone()),
            ride_lifecycle: RideLifecycle::new(rides.clone(), bookings.clone()),
            rides,
            bookings,
            publisher,
            max_seats: DEFAULT_MAX_SEATS_PER_BOOKING,
            page_size_limit: 100,
        }
    }

    pub fn with_max_seats(mut self, max_seats: i32) -> Self {
        self.max_seats = max_seats.max(1);
        self
    }

    pub fn with_page_size_limit(mut self, limit: u32) -> Self {
        self.page_size_limit = limit.max(1);
        self
    }

    /// Reserves seats on an open ride and records a pending booking.
    pub async fn create_booking(
        &self,
        ride_id: Uuid,
        student_id: Uuid,
        seats: i32,
    ) -> CoreResult<Booking> {
        if seats < 1 || seats > self.max_seats {
            return Err(CoreError::InvalidSeatCount { requested: seats, max: self.max_seats });
        }

        let ride = self
            .rides
            .find(ride_id)
            .await?
            .ok_or(CoreError::RideNotFound(ride_id))?;
        if !ride.confirmed {
            return Err(CoreError::RideNotConfirmed);
        }
        if !matches!(ride.status, RideStatus::Open | RideStatus::Full) {
            return Err(CoreError::RideNotOpen(ride.status));
        }
        // A full ride with seats back is still waiting on its reopen; the
        // ledger settles that.
        if ride.available_seats < seats {
            return Err(CoreError::InsufficientSeats {
                requested: seats,
                available: ride.available_seats,
            });
        }

        // Parse before touching the ledger so a bad time never holds seats.
        let departs_at = ride_date_time(ride.date, &ride.time)?;

        let reserved = self.ledger.reserve(ride_id, seats).await?;
        let booking = Booking::new(&reserved, student_id, seats, departs_at);

        if let Err(e) = self.bookings.insert(&booking).await {
            error!(
                %ride_id,
                %student_id,
                seats,
                "Failed to record booking, returning seats: {}",
                e
            );
            self.return_seats(&booking).await;
            return Err(e.into());
        }

        // A delete may have withdrawn the ride after the reservation and
        // cascaded before this insert landed.
        match self.ride_withdrawn(ride_id).await {
            Ok(true) => {
                warn!(
                    booking_id = %booking.id,
                    %ride_id,
                    "Ride withdrawn while booking, backing out"
                );
                let backed_out = self
                    .bookings
                    .transition(booking.id, BookingStatus::Pending, BookingStatus::Cancelled)
                    .await?;
                if backed_out.is_some() {
                    self.return_seats(&booking).await;
                }
                return Err(CoreError::RideNotOpen(RideStatus::Cancelled));
            }
            Ok(false) => {}
            Err(e) => warn!(%ride_id, "Could not re-check ride after booking: {}", e),
        }

        // The booking is committed; a failed status update only delays `full`.
        if let Err(e) = self.ride_lifecycle.recompute_after_seat_change(reserved).await {
            warn!(%ride_id, "Failed to settle ride status after reservation: {}", e);
        }

        info!(booking_id = %booking.id, %ride_id, %student_id, seats, "Booking created");
        self.emit(LifecycleEventKind::BookingRequested, &booking, booking.driver_id, student_id);
        Ok(booking)
    }

    /// Student withdraws their own booking.
    pub async fn cancel_booking(&self, booking_id: Uuid, requester: Uuid) -> CoreResult<Booking> {
        let booking = self.find(booking_id).await?;
        if booking.student_id != requester {
            warn!(%booking_id, %requester, "Rejected cancel by non-owner");
            return Err(CoreError::Forbidden("not authorized to cancel this booking".to_string()));
        }

        let cancelled = self.transition(booking, BookingAction::Cancel).await?;
        self.emit(LifecycleEventKind::BookingCancelled, &cancelled, cancelled.driver_id, requester);
        Ok(cancelled)
    }

    /// Driver accepts a pending booking. Seats are already held, so capacity
    /// is not checked again.
    ///
    /// The ride is read again after the commit. If a delete withdrew it in the
    /// meantime, the booking goes back to pending and the confirmation fails,
    /// so a delete never cascades over a confirmation it did not count.
    pub async fn confirm_booking(&self, booking_id: Uuid, requester: Uuid) -> CoreResult<Booking> {
        let booking = self.driver_owned(booking_id, requester, BookingAction::Confirm).await?;
        if self.ride_withdrawn(booking.ride_id).await? {
            return Err(CoreError::RideNotOpen(RideStatus::Cancelled));
        }

        let confirmed = self.transition(booking, BookingAction::Confirm).await?;

        match self.ride_withdrawn(confirmed.ride_id).await {
            Ok(true) => {
                warn!(
                    %booking_id,
                    ride_id = %confirmed.ride_id,
                    "Ride withdrawn while confirming, backing out"
                );
                self.bookings
                    .transition(confirmed.id, BookingStatus::Confirmed, BookingStatus::Pending)
                    .await?;
                return Err(CoreError::RideNotOpen(RideStatus::Cancelled));
            }
            Ok(false) => {}
            Err(e) => warn!(%booking_id, "Could not re-check ride after confirmation: {}", e),
        }

        let student_id = confirmed.student_id;
        self.emit(LifecycleEventKind::BookingConfirmed, &confirmed, student_id, requester);
        Ok(confirmed)
    }

    /// Driver declines a pending or confirmed booking.
    pub async fn reject_booking(&self, booking_id: Uuid, requester: Uuid) -> CoreResult<Booking> {
        let booking = self.driver_owned(booking_id, requester, BookingAction::Reject).await?;
        let rejected = self.transition(booking, BookingAction::Reject).await?;
        self.emit(LifecycleEventKind::BookingRejected, &rejected, rejected.student_id, requester);
        Ok(rejected)
    }

    pub async fn get_booking(&self, booking_id: Uuid) -> CoreResult<Booking> {
        self.find(booking_id).await
    }

    pub async fn list_student_bookings(
        &self,
        student_id: Uuid,
        page: Page,
    ) -> CoreResult<Paged<Booking>> {
        let page = page.clamp_limit(self.page_size_limit);
        Ok(self.bookings.list_by_student(student_id, page).await?)
    }

    pub async fn list_driver_bookings(
        &self,
        driver_id: Uuid,
        page: Page,
    ) -> CoreResult<Paged<Booking>> {
        let page = page.clamp_limit(self.page_size_limit);
        Ok(self.bookings.list_by_driver(driver_id, page).await?)
    }

    /// Applies `action` through the transition table, committing with a
    /// compare-and-set on the observed status.
    ///
    /// When another transition wins the race the booking is re-read and the
    /// action re-evaluated against the new status. Every table move heads
    /// towards a terminal state, so this settles within a few rounds.
    async fn transition(&self, mut booking: Booking, action: BookingAction) -> CoreResult<Booking> {
        loop {
            let from = booking.booking_status;
            let to = from.apply(action).ok_or_else(|| refusal(from, action))?;

            match self.bookings.transition(booking.id, from, to).await? {
                Some(updated) => {
                    info!(booking_id = %updated.id, %from, %to, "Booking transition committed");
                    if from.holds_seats() && !to.holds_seats() {
                        self.return_seats(&updated).await;
                    }
                    return Ok(updated);
                }
                None => {
                    warn!(
                        booking_id = %booking.id,
                        %from,
                        %action,
                        "Booking changed concurrently, re-evaluating"
                    );
                    booking = self.find(booking.id).await?;
                }
            }
        }
    }

    /// Hands a booking's seats back to its ride, retrying store failures.
    ///
    /// The booking has already stopped holding the seats, so a final failure
    /// is logged for the ledger audit instead of failing the caller.
    async fn return_seats(&self, booking: &Booking) {
        for attempt in 1..=RELEASE_ATTEMPTS {
            match self.ledger.release(booking.ride_id, booking.seats_booked).await {
                Ok(_) => return,
                Err(e) if attempt < RELEASE_ATTEMPTS => {
                    warn!(
                        booking_id = %booking.id,
                        ride_id = %booking.ride_id,
                        attempt,
                        "Seat release failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(RELEASE_BACKOFF * attempt).await;
                }
                Err(e) => error!(
                    booking_id = %booking.id,
                    ride_id = %booking.ride_id,
                    seats = booking.seats_booked,
                    "Seat release failed after {} attempts, ride ledger is short: {}",
                    RELEASE_ATTEMPTS,
                    e
                ),
            }
        }
    }

    /// True when the ride is gone or cancelled.
    async fn ride_withdrawn(&self, ride_id: Uuid) -> StoreResult<bool> {
        Ok(match self.rides.find(ride_id).await? {
            Some(ride) => ride.status == RideStatus::Cancelled,
            None => true,
        })
    }

    async fn find(&self, booking_id: Uuid) -> CoreResult<Booking> {
        self.bookings
            .find(booking_id)
            .await?
            .ok_or(CoreError::BookingNotFound(booking_id))
    }

    async fn driver_owned(
        &self,
        booking_id: Uuid,
        requester: Uuid,
        action: BookingAction,
    ) -> CoreResult<Booking> {
        let booking = self.find(booking_id).await?;
        if booking.driver_id != requester {
            warn!(
                %booking_id,
                %requester,
                "Rejected {} by a driver who does not own the ride",
                action
            );
            return Err(CoreError::Forbidden(format!("not authorized to {action} this booking")));
        }
        Ok(booking)
    }

    fn emit(
        &self,
        kind: LifecycleEventKind,
        booking: &Booking,
        recipient_id: Uuid,
        actor_id: Uuid,
    ) {
        self.publisher.publish(LifecycleEvent {
            kind,
            booking_id: booking.id,
            ride_id: booking.ride_id,
            recipient_id,
            actor_id,
            seats: booking.seats_booked,
            pickup_location: booking.pickup_location.clone(),
            drop_location: booking.drop_location.clone(),
            timestamp: Utc::now().timestamp(),
        });
    }
}

/// Error for an action the table has no row for.
fn refusal(status: BookingStatus, action: BookingAction) -> CoreError {
    match action {
        BookingAction::Cancel if status.is_terminal() => CoreError::AlreadyTerminal(status),
        _ => CoreError::InvalidTransition { from: status, action },
    }
}
