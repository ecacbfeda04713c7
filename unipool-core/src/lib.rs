pub mod models;
pub mod repository;
pub mod memory;
pub mod schedule;
pub mod ledger;
pub mod ride;
pub mod booking;
pub mod notify;

pub use booking::BookingLifecycle;
pub use ledger::SeatLedger;
pub use models::{
    Booking, BookingAction, BookingStatus, NewRide, Page, Paged, PaymentStatus, Ride, RideFilter,
    RideStatus,
};
pub use notify::EventPublisher;
pub use repository::{BookingRepository, RideRepository, StoreError};
pub use ride::RideLifecycle;

use uuid::Uuid;

/// How a caller should react to a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed input. Fix the request, do not retry it as is.
    Validation,
    /// Lost a race or hit a lifecycle guard. Re-fetch and retry with updated assumptions.
    Conflict,
    /// Wrong owner or role.
    Authorization,
    NotFound,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Seats must be between 1 and {max}, got {requested}")]
    InvalidSeatCount { requested: i32, max: i32 },
    #[error("Invalid ride time {0:?}, expected HH:MM with optional AM/PM")]
    InvalidTime(String),
    #[error("Invalid ride: {0}")]
    InvalidRide(String),
    #[error("Ride not found: {0}")]
    RideNotFound(Uuid),
    #[error("Booking not found: {0}")]
    BookingNotFound(Uuid),
    #[error("Not authorized: {0}")]
    Forbidden(String),
    #[error("Ride is not confirmed yet")]
    RideNotConfirmed,
    #[error("Ride is not available for booking (status {0})")]
    RideNotOpen(RideStatus),
    #[error("Ride is already open")]
    RideAlreadyOpen,
    #[error("Only {available} seat(s) available, requested {requested}")]
    InsufficientSeats { requested: i32, available: i32 },
    #[error("Seat count changed while booking, try again")]
    SeatsContended,
    #[error("Booking is already {0}")]
    AlreadyTerminal(BookingStatus),
    #[error("Cannot {action} a booking that is {from}")]
    InvalidTransition { from: BookingStatus, action: BookingAction },
    #[error("Ride has {0} confirmed booking(s), cancel the ride instead")]
    HasConfirmedBookings(u64),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CoreError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CoreError::InvalidSeatCount { .. }
            | CoreError::InvalidTime(_)
            | CoreError::InvalidRide(_) => ErrorClass::Validation,
            CoreError::RideNotFound(_) | CoreError::BookingNotFound(_) => ErrorClass::NotFound,
            CoreError::Forbidden(_) => ErrorClass::Authorization,
            CoreError::RideNotConfirmed
            | CoreError::RideNotOpen(_)
            | CoreError::RideAlreadyOpen
            | CoreError::InsufficientSeats { .. }
            | CoreError::SeatsContended
            | CoreError::AlreadyTerminal(_)
            | CoreError::InvalidTransition { .. }
            | CoreError::HasConfirmedBookings(_) => ErrorClass::Conflict,
            CoreError::Store(_) => ErrorClass::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Conflict
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
