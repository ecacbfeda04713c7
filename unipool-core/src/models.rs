use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
#[error("Unknown status: {0}")]
pub struct UnknownStatus(pub String);

/// Availability of a ride
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RideStatus {
    Pending,
    Open,
    Full,
    Cancelled,
    Completed,
}

impl RideStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Pending => "pending",
            RideStatus::Open => "open",
            RideStatus::Full => "full",
            RideStatus::Cancelled => "cancelled",
            RideStatus::Completed => "completed",
        }
    }

    /// Cancelled and completed rides never move again on seat changes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RideStatus::Cancelled | RideStatus::Completed)
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RideStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RideStatus::Pending),
            "open" => Ok(RideStatus::Open),
            "full" => Ok(RideStatus::Full),
            "cancelled" => Ok(RideStatus::Cancelled),
            "completed" => Ok(RideStatus::Completed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Rejected,
    Completed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Cancelled | BookingStatus::Rejected | BookingStatus::Completed
        )
    }

    /// Seats are charged against the ride from creation until the booking
    /// leaves these states.
    pub fn holds_seats(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    /// Looks the move up in [`TRANSITIONS`]. `None` means the table has no row for it.
    pub fn apply(self, action: BookingAction) -> Option<BookingStatus> {
        TRANSITIONS
            .iter()
            .find(|(from, on, _)| *from == self && *on == action)
            .map(|(_, _, to)| *to)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            "rejected" => Ok(BookingStatus::Rejected),
            "completed" => Ok(BookingStatus::Completed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Actions that move an existing booking.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BookingAction {
    /// Student withdraws.
    Cancel,
    /// Driver declines.
    Reject,
    /// Driver accepts.
    Confirm,
}

impl fmt::Display for BookingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BookingAction::Cancel => "cancel",
            BookingAction::Reject => "reject",
            BookingAction::Confirm => "confirm",
        })
    }
}

/// Every permitted booking move. Anything not listed is refused.
pub const TRANSITIONS: &[(BookingStatus, BookingAction, BookingStatus)] = &[
    (BookingStatus::Pending, BookingAction::Cancel, BookingStatus::Cancelled),
    (BookingStatus::Confirmed, BookingAction::Cancel, BookingStatus::Cancelled),
    (BookingStatus::Pending, BookingAction::Reject, BookingStatus::Rejected),
    (BookingStatus::Confirmed, BookingAction::Reject, BookingStatus::Rejected),
    (BookingStatus::Pending, BookingAction::Confirm, BookingStatus::Confirmed),
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Driver input for publishing a ride
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRide {
    pub pickup_location: String,
    pub drop_location: String,
    pub date: NaiveDate,
    /// Wall clock departure, e.g. "10:00 AM"
    pub time: String,
    pub price_per_seat: i32,
    pub total_seats: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ride {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub pickup_location: String,
    pub drop_location: String,
    pub date: NaiveDate,
    pub time: String,
    pub price_per_seat: i32,
    pub total_seats: i32,
    pub available_seats: i32,
    pub status: RideStatus,
    pub confirmed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ride {
    /// A freshly published ride waits for its driver to confirm it.
    pub fn new(driver_id: Uuid, new_ride: NewRide) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            driver_id,
            pickup_location: new_ride.pickup_location.trim().to_string(),
            drop_location: new_ride.drop_location.trim().to_string(),
            date: new_ride.date,
            time: new_ride.time.trim().to_string(),
            price_per_seat: new_ride.price_per_seat,
            total_seats: new_ride.total_seats,
            available_seats: new_ride.total_seats,
            status: RideStatus::Pending,
            confirmed: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn accepts_bookings(&self) -> bool {
        self.confirmed && self.status == RideStatus::Open
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub student_id: Uuid,
    pub driver_id: Uuid,
    pub seats_booked: i32,
    // Snapshots taken at creation; later ride edits do not touch them.
    pub pickup_location: String,
    pub drop_location: String,
    pub ride_date_time: NaiveDateTime,
    pub booking_status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn new(
        ride: &Ride,
        student_id: Uuid,
        seats_booked: i32,
        ride_date_time: NaiveDateTime,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            ride_id: ride.id,
            student_id,
            driver_id: ride.driver_id,
            seats_booked,
            pickup_location: ride.pickup_location.clone(),
            drop_location: ride.drop_location.clone(),
            ride_date_time,
            booking_status: BookingStatus::Pending,
            payment_status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Search criteria for rides that students can book
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RideFilter {
    pub date: Option<NaiveDate>,
    pub pickup_location: Option<String>,
    pub drop_location: Option<String>,
}

impl RideFilter {
    /// Case-insensitive substring match on locations, exact match on date.
    pub fn matches(&self, ride: &Ride) -> bool {
        fn contains(haystack: &str, needle: &Option<String>) -> bool {
            needle
                .as_deref()
                .map_or(true, |n| haystack.to_lowercase().contains(&n.to_lowercase()))
        }

        self.date.map_or(true, |d| d == ride.date)
            && contains(&ride.pickup_location, &self.pickup_location)
            && contains(&ride.drop_location, &self.drop_location)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page {
    /// 1-based
    pub page: u32,
    pub limit: u32,
}

impl Page {
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.max(1),
        }
    }

    pub fn clamp_limit(self, max: u32) -> Self {
        Self::new(self.page, self.limit.min(max.max(1)))
    }

    pub fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.limit as u64
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub pages: u32,
}

impl<T> Paged<T> {
    pub fn new(items: Vec<T>, total: u64, page: Page) -> Self {
        Self {
            items,
            total,
            page: page.page,
            pages: total.div_ceil(page.limit as u64) as u32,
        }
    }

    /// Cuts one page out of an already ordered result set.
    pub fn from_sorted(all: Vec<T>, page: Page) -> Self {
        let total = all.len() as u64;
        let items = all
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit as usize)
            .collect();
        Self::new(items, total, page)
    }
}
