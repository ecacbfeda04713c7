use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

/// What happened to a booking. Each kind has a fixed recipient side:
/// requests and cancellations go to the driver, decisions go to the student.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventKind {
    BookingRequested,
    BookingCancelled,
    BookingConfirmed,
    BookingRejected,
}

impl LifecycleEventKind {
    /// Tag carried in the push metadata `type` field.
    pub fn type_tag(&self) -> &'static str {
        match self {
            LifecycleEventKind::BookingRequested => "new_booking",
            LifecycleEventKind::BookingCancelled => "booking_cancelled",
            LifecycleEventKind::BookingConfirmed => "booking_confirmed",
            LifecycleEventKind::BookingRejected => "booking_rejected",
        }
    }
}

/// Emitted after a booking transition has committed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LifecycleEvent {
    pub kind: LifecycleEventKind,
    pub booking_id: Uuid,
    pub ride_id: Uuid,
    /// User who should be told.
    pub recipient_id: Uuid,
    /// User whose action caused the event.
    pub actor_id: Uuid,
    pub seats: i32,
    pub pickup_location: String,
    pub drop_location: String,
    pub timestamp: i64,
}

impl LifecycleEvent {
    pub fn title(&self) -> &'static str {
        match self.kind {
            LifecycleEventKind::BookingRequested => "New Booking Request",
            LifecycleEventKind::BookingCancelled => "Booking Cancelled",
            LifecycleEventKind::BookingConfirmed => "Booking Confirmed!",
            LifecycleEventKind::BookingRejected => "Booking Rejected",
        }
    }

    /// Human readable message. `actor_name` falls back to a generic label
    /// when the directory has no name for the actor.
    pub fn body(&self, actor_name: Option<&str>) -> String {
        let route = format!("from {} to {}", self.pickup_location, self.drop_location);
        match self.kind {
            LifecycleEventKind::BookingRequested => format!(
                "{} booked {} seat(s) for your ride {}",
                actor_name.unwrap_or("A student"),
                self.seats,
                route
            ),
            LifecycleEventKind::BookingCancelled => format!(
                "{} cancelled their booking for {} seat(s) {}",
                actor_name.unwrap_or("A student"),
                self.seats,
                route
            ),
            LifecycleEventKind::BookingConfirmed => format!(
                "Your booking for {} seat(s) {} has been confirmed by {}",
                self.seats,
                route,
                actor_name.unwrap_or("Driver")
            ),
            LifecycleEventKind::BookingRejected => format!(
                "Your booking request for {} seat(s) {} has been rejected by {}",
                self.seats,
                route,
                actor_name.unwrap_or("Driver")
            ),
        }
    }

    pub fn metadata(&self) -> serde_json::Value {
        json!({
            "type": self.kind.type_tag(),
            "bookingId": self.booking_id.to_string(),
            "rideId": self.ride_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: LifecycleEventKind) -> LifecycleEvent {
        LifecycleEvent {
            kind,
            booking_id: Uuid::new_v4(),
            ride_id: Uuid::new_v4(),
            recipient_id: Uuid::new_v4(),
            actor_id: Uuid::new_v4(),
            seats: 2,
            pickup_location: "Main Gate".to_string(),
            drop_location: "Central Station".to_string(),
            timestamp: 0,
        }
    }

    #[test]
    fn test_body_falls_back_to_generic_actor() {
        let requested = event(LifecycleEventKind::BookingRequested);
        assert_eq!(
            requested.body(None),
            "A student booked 2 seat(s) for your ride from Main Gate to Central Station"
        );

        let confirmed = event(LifecycleEventKind::BookingConfirmed);
        assert!(confirmed.body(Some("Asha")).ends_with("confirmed by Asha"));
    }

    #[test]
    fn test_metadata_carries_ids() {
        let rejected = event(LifecycleEventKind::BookingRejected);
        let meta = rejected.metadata();
        assert_eq!(meta["type"], "booking_rejected");
        assert_eq!(meta["bookingId"], rejected.booking_id.to_string());
        assert_eq!(meta["rideId"], rejected.ride_id.to_string());
    }
}
