use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use unipool_shared::LifecycleEvent;

use crate::repository::StoreResult;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Push delivery failed: {0}")]
    Delivery(String),
    #[error("Push service rejected message: {0}")]
    Rejected(String),
}

/// Outbound push delivery.
///
/// Implementations treat a missing or blank token as a successful no-op.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(
        &self,
        recipient_token: Option<&str>,
        title: &str,
        body: &str,
        metadata: &serde_json::Value,
    ) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    pub user_id: Uuid,
    pub name: Option<String>,
    pub notification_token: Option<String>,
}

/// Resolves user ids to display names and push tokens.
#[async_trait]
pub trait ContactDirectory: Send + Sync {
    async fn contact(&self, user_id: Uuid) -> StoreResult<Option<Contact>>;
}

/// Hands committed lifecycle events to the delivery worker.
///
/// Publishing never blocks and never fails the caller: if the worker is gone
/// the event is logged and dropped.
#[derive(Clone)]
pub struct EventPublisher {
    tx: Option<mpsc::UnboundedSender<LifecycleEvent>>,
}

impl EventPublisher {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Publisher that discards everything, for deployments without notifications.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn publish(&self, event: LifecycleEvent) {
        match &self.tx {
            Some(tx) => {
                if let Err(e) = tx.send(event) {
                    warn!(
                        booking_id = %e.0.booking_id,
                        "Notification worker stopped, dropping {:?} event",
                        e.0.kind
                    );
                }
            }
            None => debug!(
                booking_id = %event.booking_id,
                "Notifications disabled, skipping {:?}",
                event.kind
            ),
        }
    }
}
