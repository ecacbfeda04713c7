use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use unipool_core::notify::{Contact, ContactDirectory};
use unipool_core::repository::StoreResult;

use crate::db_err;

#[derive(sqlx::FromRow)]
struct ContactRow {
    user_id: Uuid,
    name: Option<String>,
    notification_token: Option<String>,
}

/// Read-only view of `user_contacts`.
pub struct PgContactDirectory {
    pool: PgPool,
}

impl PgContactDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContactDirectory for PgContactDirectory {
    async fn contact(&self, user_id: Uuid) -> StoreResult<Option<Contact>> {
        let row = sqlx::query_as::<_, ContactRow>(
            "SELECT user_id, name, notification_token FROM user_contacts WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(|r| Contact {
            user_id: r.user_id,
            name: r.name,
            notification_token: r.notification_token,
        }))
    }
}
