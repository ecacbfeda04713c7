pub mod app_config;
pub mod database;
pub mod ride_repo;
pub mod booking_repo;
pub mod contact_repo;
pub mod push;

pub use booking_repo::PgBookingRepository;
pub use contact_repo::PgContactDirectory;
pub use database::DbClient;
pub use push::ExpoPushClient;
pub use ride_repo::PgRideRepository;

use unipool_core::StoreError;

pub(crate) fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}
