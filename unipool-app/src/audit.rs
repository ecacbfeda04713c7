use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use unipool_core::{BookingRepository, Ride, RideRepository, RideStatus, StoreError};

/// One inconsistency found on a ride. Reported only, never repaired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    /// `available + held != total`.
    SeatImbalance { available: i32, held: i32, total: i32 },
    /// Status disagrees with the seat count.
    StatusMismatch { status: RideStatus, available: i32 },
    /// Bookable status on a ride the driver never confirmed.
    UnconfirmedOpen { status: RideStatus },
    /// Pending or confirmed bookings left on a cancelled ride.
    ActiveBookingsOnCancelledRide { count: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct RideFinding {
    pub ride_id: Uuid,
    pub finding: Finding,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct AuditReport {
    pub rides_checked: usize,
    pub findings: Vec<RideFinding>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Checks every ride's seat count against its active bookings.
pub async fn audit_ledger(
    rides: &dyn RideRepository,
    bookings: &dyn BookingRepository,
) -> Result<AuditReport, StoreError> {
    let mut report = AuditReport::default();

    for ride in rides.list_all().await? {
        let active: Vec<i32> = bookings
            .list_for_ride(ride.id)
            .await?
            .iter()
            .filter(|b| b.booking_status.holds_seats())
            .map(|b| b.seats_booked)
            .collect();

        for finding in check_ride(&ride, &active) {
            warn!(ride_id = %ride.id, ?finding, "Ledger inconsistency");
            report.findings.push(RideFinding { ride_id: ride.id, finding });
        }
        report.rides_checked += 1;
    }

    info!(
        rides = report.rides_checked,
        findings = report.findings.len(),
        "Ledger audit finished"
    );
    Ok(report)
}

fn check_ride(ride: &Ride, active: &[i32]) -> Vec<Finding> {
    let mut findings = Vec::new();

    if ride.status == RideStatus::Cancelled {
        if !active.is_empty() {
            findings.push(Finding::ActiveBookingsOnCancelledRide { count: active.len() });
        }
        return findings;
    }
    if ride.status.is_terminal() {
        return findings;
    }

    let held: i32 = active.iter().sum();
    if ride.available_seats + held != ride.total_seats {
        findings.push(Finding::SeatImbalance {
            available: ride.available_seats,
            held,
            total: ride.total_seats,
        });
    }

    let stuck = match ride.status {
        RideStatus::Full => ride.available_seats != 0,
        RideStatus::Open => ride.available_seats == 0,
        _ => false,
    };
    if stuck {
        findings.push(Finding::StatusMismatch {
            status: ride.status,
            available: ride.available_seats,
        });
    }

    if matches!(ride.status, RideStatus::Open | RideStatus::Full) && !ride.confirmed {
        findings.push(Finding::UnconfirmedOpen { status: ride.status });
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::Arc;
    use unipool_core::memory::{InMemoryBookingRepository, InMemoryRideRepository};
    use unipool_core::{BookingLifecycle, EventPublisher, NewRide, RideLifecycle};

    fn new_ride(total_seats: i32) -> NewRide {
        NewRide {
            pickup_location: "Hostel Block C".into(),
            drop_location: "Railway Station".into(),
            date: NaiveDate::from_ymd_opt(2024, 3, 12).unwrap(),
            time: "6:00 PM".into(),
            price_per_seat: 80,
            total_seats,
        }
    }

    #[tokio::test]
    async fn test_clean_after_lifecycle_operations() {
        let rides = Arc::new(InMemoryRideRepository::new());
        let bookings = Arc::new(InMemoryBookingRepository::new());
        let ride_lifecycle = RideLifecycle::new(rides.clone(), bookings.clone());
        let booking_lifecycle =
            BookingLifecycle::new(rides.clone(), bookings.clone(), EventPublisher::disabled());

        let driver = Uuid::new_v4();
        let ride = ride_lifecycle.create_ride(driver, new_ride(3)).await.unwrap();
        ride_lifecycle.confirm(ride.id, driver).await.unwrap();

        let a = booking_lifecycle.create_booking(ride.id, Uuid::new_v4(), 2).await.unwrap();
        booking_lifecycle.create_booking(ride.id, Uuid::new_v4(), 1).await.unwrap();
        booking_lifecycle.reject_booking(a.id, driver).await.unwrap();

        let report = audit_ledger(rides.as_ref(), bookings.as_ref()).await.unwrap();
        assert_eq!(report.rides_checked, 1);
        assert!(report.is_clean(), "{:?}", report.findings);
    }

    #[tokio::test]
    async fn test_reports_without_repairing() {
        let rides = InMemoryRideRepository::new();
        let bookings = InMemoryBookingRepository::new();

        let mut ride = Ride::new(Uuid::new_v4(), new_ride(4));
        ride.status = RideStatus::Full;
        ride.available_seats = 1;
        rides.insert(&ride).await.unwrap();

        let report = audit_ledger(&rides, &bookings).await.unwrap();
        let findings: Vec<_> = report.findings.iter().map(|f| f.finding.clone()).collect();
        assert_eq!(
            findings,
            vec![
                Finding::SeatImbalance { available: 1, held: 0, total: 4 },
                Finding::StatusMismatch { status: RideStatus::Full, available: 1 },
                Finding::UnconfirmedOpen { status: RideStatus::Full },
            ]
        );

        let stored = rides.find(ride.id).await.unwrap().unwrap();
        assert_eq!(stored.available_seats, 1);
        assert_eq!(stored.status, RideStatus::Full);
    }

    #[test]
    fn test_cancelled_ride_only_flags_active_bookings() {
        let mut ride = Ride::new(Uuid::new_v4(), new_ride(4));
        ride.status = RideStatus::Cancelled;
        ride.available_seats = 1;

        assert!(check_ride(&ride, &[]).is_empty());
        assert_eq!(
            check_ride(&ride, &[2, 1]),
            vec![Finding::ActiveBookingsOnCancelledRide { count: 2 }]
        );
    }
}
