use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use unipool_core::repository::{RideRepository, StoreResult};
use unipool_core::{Page, Paged, Ride, RideFilter, StoreError};

use crate::db_err;

const RIDE_COLUMNS: &str = "id, driver_id, pickup_location, drop_location, ride_date, ride_time, \
     price_per_seat, total_seats, available_seats, status, confirmed, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct RideRow {
    id: Uuid,
    driver_id: Uuid,
    pickup_location: String,
    drop_location: String,
    ride_date: NaiveDate,
    ride_time: String,
    price_per_seat: i32,
    total_seats: i32,
    available_seats: i32,
    status: String,
    confirmed: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RideRow> for Ride {
    type Error = StoreError;

    fn try_from(row: RideRow) -> Result<Self, Self::Error> {
        Ok(Ride {
            id: row.id,
            driver_id: row.driver_id,
            pickup_location: row.pickup_location,
            drop_location: row.drop_location,
            date: row.ride_date,
            time: row.ride_time,
            price_per_seat: row.price_per_seat,
            total_seats: row.total_seats,
            available_seats: row.available_seats,
            status: row
                .status
                .parse()
                .map_err(|e| StoreError::Corrupt(format!("ride {}: {}", row.id, e)))?,
            confirmed: row.confirmed,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn like_pattern(fragment: &str) -> String {
    let escaped = fragment
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn push_open_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &RideFilter) {
    qb.push(" WHERE confirmed AND status = 'open' AND available_seats > 0");
    if let Some(date) = filter.date {
        qb.push(" AND ride_date = ").push_bind(date);
    }
    if let Some(pickup) = &filter.pickup_location {
        qb.push(" AND pickup_location ILIKE ").push_bind(like_pattern(pickup));
    }
    if let Some(drop) = &filter.drop_location {
        qb.push(" AND drop_location ILIKE ").push_bind(like_pattern(drop));
    }
}

/// Rides in Postgres. Every status or seat mutation is one conditional
/// `UPDATE ... RETURNING`, so row-level locking is the only synchronisation.
pub struct PgRideRepository {
    pool: PgPool,
}

impl PgRideRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs `UPDATE rides SET {set} WHERE id = $1 AND {condition}` and maps the returned row.
    async fn update_where(
        &self,
        id: Uuid,
        set: &str,
        condition: &str,
        seats: Option<i32>,
    ) -> StoreResult<Option<Ride>> {
        let sql = format!(
            "UPDATE rides SET {set}, updated_at = now() \
             WHERE id = $1 AND {condition} RETURNING {RIDE_COLUMNS}"
        );
        let mut query = sqlx::query_as::<_, RideRow>(&sql).bind(id);
        if let Some(seats) = seats {
            query = query.bind(seats);
        }
        query
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(Ride::try_from)
            .transpose()
    }
}

#[async_trait]
impl RideRepository for PgRideRepository {
    async fn insert(&self, ride: &Ride) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO rides (id, driver_id, pickup_location, drop_location, ride_date, ride_time,
                               price_per_seat, total_seats, available_seats, status, confirmed,
                               created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(ride.id)
        .bind(ride.driver_id)
        .bind(&ride.pickup_location)
        .bind(&ride.drop_location)
        .bind(ride.date)
        .bind(&ride.time)
        .bind(ride.price_per_seat)
        .bind(ride.total_seats)
        .bind(ride.available_seats)
        .bind(ride.status.as_str())
        .bind(ride.confirmed)
        .bind(ride.created_at)
        .bind(ride.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::Duplicate(ride.id))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    async fn find(&self, id: Uuid) -> StoreResult<Option<Ride>> {
        let sql = format!("SELECT {RIDE_COLUMNS} FROM rides WHERE id = $1");
        sqlx::query_as::<_, RideRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(Ride::try_from)
            .transpose()
    }

    async fn list_open(&self, filter: &RideFilter, page: Page) -> StoreResult<Paged<Ride>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM rides");
        push_open_filter(&mut count, filter);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {RIDE_COLUMNS} FROM rides"));
        push_open_filter(&mut select, filter);
        select
            .push(" ORDER BY ride_date ASC, created_at ASC LIMIT ")
            .push_bind(page.limit as i64)
            .push(" OFFSET ")
            .push_bind(page.offset() as i64);
        let rows: Vec<RideRow> = select
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let rides = rows.into_iter().map(Ride::try_from).collect::<StoreResult<Vec<_>>>()?;
        Ok(Paged::new(rides, total as u64, page))
    }

    async fn list_by_driver(&self, driver_id: Uuid, page: Page) -> StoreResult<Paged<Ride>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rides WHERE driver_id = $1")
            .bind(driver_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        let sql = format!(
            "SELECT {RIDE_COLUMNS} FROM rides WHERE driver_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query_as::<_, RideRow>(&sql)
            .bind(driver_id)
            .bind(page.limit as i64)
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let rides = rows.into_iter().map(Ride::try_from).collect::<StoreResult<Vec<_>>>()?;
        Ok(Paged::new(rides, total as u64, page))
    }

    async fn list_all(&self) -> StoreResult<Vec<Ride>> {
        let sql = format!("SELECT {RIDE_COLUMNS} FROM rides ORDER BY created_at");
        sqlx::query_as::<_, RideRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?
            .into_iter()
            .map(Ride::try_from)
            .collect()
    }

    async fn reserve_seats(&self, id: Uuid, seats: i32) -> StoreResult<Option<Ride>> {
        self.update_where(
            id,
            "available_seats = available_seats - $2",
            "status = 'open' AND available_seats >= $2",
            Some(seats),
        )
        .await
    }

    async fn release_seats(&self, id: Uuid, seats: i32) -> StoreResult<Option<Ride>> {
        self.update_where(
            id,
            "available_seats = LEAST(available_seats::bigint + $2, total_seats)::integer",
            "TRUE",
            Some(seats),
        )
        .await
    }

    async fn mark_full(&self, id: Uuid) -> StoreResult<Option<Ride>> {
        self.update_where(id, "status = 'full'", "status = 'open' AND available_seats = 0", None)
            .await
    }

    async fn reopen(&self, id: Uuid) -> StoreResult<Option<Ride>> {
        self.update_where(id, "status = 'open'", "status = 'full' AND available_seats > 0", None)
            .await
    }

    async fn confirm(&self, id: Uuid) -> StoreResult<Option<Ride>> {
        self.update_where(id, "confirmed = TRUE, status = 'open'", "status = 'pending'", None)
            .await
    }

    async fn withdraw(&self, id: Uuid) -> StoreResult<Option<Ride>> {
        self.update_where(
            id,
            "status = 'cancelled'",
            "status IN ('pending', 'open', 'full')",
            None,
        )
        .await
    }

    async fn reinstate(&self, id: Uuid) -> StoreResult<Option<Ride>> {
        self.update_where(
            id,
            "status = CASE WHEN NOT confirmed THEN 'pending' \
                      WHEN available_seats = 0 THEN 'full' ELSE 'open' END",
            "status = 'cancelled'",
            None,
        )
        .await
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM rides WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }
}
