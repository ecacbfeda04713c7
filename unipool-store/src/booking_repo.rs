use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use unipool_core::repository::{BookingRepository, StoreResult};
use unipool_core::{Booking, BookingStatus, Page, Paged, StoreError};

use crate::db_err;

const BOOKING_COLUMNS: &str = "id, ride_id, student_id, driver_id, seats_booked, \
     pickup_location, drop_location, ride_date_time, booking_status, payment_status, \
     created_at, updated_at";

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    ride_id: Uuid,
    student_id: Uuid,
    driver_id: Uuid,
    seats_booked: i32,
    pickup_location: String,
    drop_location: String,
    ride_date_time: NaiveDateTime,
    booking_status: String,
    payment_status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let corrupt = |e: unipool_core::models::UnknownStatus| {
            StoreError::Corrupt(format!("booking {}: {}", row.id, e))
        };
        Ok(Booking {
            id: row.id,
            ride_id: row.ride_id,
            student_id: row.student_id,
            driver_id: row.driver_id,
            seats_booked: row.seats_booked,
            pickup_location: row.pickup_location,
            drop_location: row.drop_location,
            ride_date_time: row.ride_date_time,
            booking_status: row.booking_status.parse().map_err(corrupt)?,
            payment_status: row.payment_status.parse().map_err(corrupt)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn decode_all(rows: Vec<BookingRow>) -> StoreResult<Vec<Booking>> {
    rows.into_iter().map(Booking::try_from).collect()
}

pub struct PgBookingRepository {
    pool: PgPool,
}

impl PgBookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// One page of bookings where `owner_column = $1`, newest first.
    async fn newest_first(
        &self,
        owner_column: &str,
        owner: Uuid,
        page: Page,
    ) -> StoreResult<Paged<Booking>> {
        let count = format!("SELECT COUNT(*) FROM bookings WHERE {owner_column} = $1");
        let total: i64 = sqlx::query_scalar(&count)
            .bind(owner)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        let sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE {owner_column} = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(owner)
            .bind(page.limit as i64)
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(Paged::new(decode_all(rows)?, total as u64, page))
    }
}

#[async_trait]
impl BookingRepository for PgBookingRepository {
    async fn insert(&self, booking: &Booking) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO bookings (id, ride_id, student_id, driver_id, seats_booked,
                                  pickup_location, drop_location, ride_date_time,
                                  booking_status, payment_status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(booking.id)
        .bind(booking.ride_id)
        .bind(booking.student_id)
        .bind(booking.driver_id)
        .bind(booking.seats_booked)
        .bind(&booking.pickup_location)
        .bind(&booking.drop_location)
        .bind(booking.ride_date_time)
        .bind(booking.booking_status.as_str())
        .bind(booking.payment_status.as_str())
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::Duplicate(booking.id))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    async fn find(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1");
        sqlx::query_as::<_, BookingRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(Booking::try_from)
            .transpose()
    }

    async fn transition(
        &self,
        id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
    ) -> StoreResult<Option<Booking>> {
        let sql = format!(
            "UPDATE bookings SET booking_status = $3, updated_at = now() \
             WHERE id = $1 AND booking_status = $2 RETURNING {BOOKING_COLUMNS}"
        );
        sqlx::query_as::<_, BookingRow>(&sql)
            .bind(id)
            .bind(from.as_str())
            .bind(to.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(Booking::try_from)
            .transpose()
    }

    async fn count_for_ride(&self, ride_id: Uuid, status: BookingStatus) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM bookings WHERE ride_id = $1 AND booking_status = $2",
        )
        .bind(ride_id)
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(count as u64)
    }

    async fn cancel_active_for_ride(&self, ride_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE bookings SET booking_status = 'cancelled', updated_at = now()
            WHERE ride_id = $1 AND booking_status IN ('pending', 'confirmed')
            "#,
        )
        .bind(ride_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn list_for_ride(&self, ride_id: Uuid) -> StoreResult<Vec<Booking>> {
        let sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE ride_id = $1 ORDER BY created_at"
        );
        let rows = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(ride_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        decode_all(rows)
    }

    async fn list_by_student(&self, student_id: Uuid, page: Page) -> StoreResult<Paged<Booking>> {
        self.newest_first("student_id", student_id, page).await
    }

    async fn list_by_driver(&self, driver_id: Uuid, page: Page) -> StoreResult<Paged<Booking>> {
        self.newest_first("driver_id", driver_id, page).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use unipool_core::PaymentStatus;

    fn row(booking_status: &str, payment_status: &str) -> BookingRow {
        let now = Utc::now();
        BookingRow {
            id: Uuid::new_v4(),
            ride_id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
            driver_id: Uuid::new_v4(),
            seats_booked: 2,
            pickup_location: "Hostel".into(),
            drop_location: "Station".into(),
            ride_date_time: NaiveDate::from_ymd_opt(2024, 3, 10)
                .unwrap()
                .and_hms_opt(17, 45, 0)
                .unwrap(),
            booking_status: booking_status.into(),
            payment_status: payment_status.into(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_row_decoding() {
        let booking = Booking::try_from(row("confirmed", "paid")).unwrap();
        assert_eq!(booking.booking_status, BookingStatus::Confirmed);
        assert_eq!(booking.payment_status, PaymentStatus::Paid);

        for (booking_status, payment_status) in [("accepted", "paid"), ("pending", "refunded")] {
            let decoded = Booking::try_from(row(booking_status, payment_status));
            assert!(matches!(decoded, Err(StoreError::Corrupt(_))));
        }
    }
}
