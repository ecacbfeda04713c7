//! Departure time handling.
//!
//! Rides store their date and a driver-entered wall clock string separately.
//! Bookings need a single instant, built from calendar components rather than
//! by gluing strings together, so no timezone conversion ever happens.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Meridiem {
    Am,
    Pm,
}

/// Parses "H:MM" or "HH:MM" with an optional AM/PM suffix (any case).
///
/// Hours must be 1-12. 12 AM is midnight, PM adds twelve to every hour but 12.
pub fn parse_ride_time(input: &str) -> CoreResult<NaiveTime> {
    let invalid = || CoreError::InvalidTime(input.to_string());

    let upper = input.trim().to_ascii_uppercase();
    let (clock, meridiem) = if let Some(rest) = upper.strip_suffix("AM") {
        (rest.trim_end(), Some(Meridiem::Am))
    } else if let Some(rest) = upper.strip_suffix("PM") {
        (rest.trim_end(), Some(Meridiem::Pm))
    } else {
        (upper.as_str(), None)
    };

    let (hour, minute) = clock.split_once(':').ok_or_else(invalid)?;
    let digits = |s: &str, max_len: usize| {
        !s.is_empty() && s.len() <= max_len && s.bytes().all(|b| b.is_ascii_digit())
    };
    if !digits(hour, 2) || !digits(minute, 2) || minute.len() != 2 {
        return Err(invalid());
    }

    let hour: u32 = hour.parse().map_err(|_| invalid())?;
    let minute: u32 = minute.parse().map_err(|_| invalid())?;
    if !(1..=12).contains(&hour) || minute > 59 {
        return Err(invalid());
    }

    let hour24 = match meridiem {
        Some(Meridiem::Am) if hour == 12 => 0,
        Some(Meridiem::Pm) if hour != 12 => hour + 12,
        _ => hour,
    };

    NaiveTime::from_hms_opt(hour24, minute, 0).ok_or_else(invalid)
}

/// Combines the ride date with its departure time.
pub fn ride_date_time(date: NaiveDate, time: &str) -> CoreResult<NaiveDateTime> {
    Ok(date.and_time(parse_ride_time(time)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    fn hm(input: &str) -> (u32, u32) {
        let t = parse_ride_time(input).unwrap();
        (t.hour(), t.minute())
    }

    #[test]
    fn test_meridiem_conversion() {
        assert_eq!(hm("12:30 AM"), (0, 30));
        assert_eq!(hm("12:30 PM"), (12, 30));
        assert_eq!(hm("1:15 PM"), (13, 15));
        assert_eq!(hm("10:00 am"), (10, 0));
        assert_eq!(hm("11:45pm"), (23, 45));
        assert_eq!(hm(" 7:05 "), (7, 5));
    }

    #[test]
    fn test_rejects_malformed_input() {
        let malformed = [
            "noon", "", "10", "13:00", "0:30 AM", "10:60 PM", "10:5 PM", "ab:cd", "10:00:00",
            "-1:00 PM", "PM",
        ];
        for bad in malformed {
            match parse_ride_time(bad) {
                Err(CoreError::InvalidTime(raw)) => assert_eq!(raw, bad),
                other => panic!("{bad:?} should be rejected, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_combines_calendar_components() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let at = ride_date_time(date, "12:30 AM").unwrap();
        assert_eq!((at.year(), at.month(), at.day()), (2024, 3, 10));
        assert_eq!((at.hour(), at.minute()), (0, 30));

        assert!(matches!(ride_date_time(date, "noon"), Err(CoreError::InvalidTime(_))));
    }
}
