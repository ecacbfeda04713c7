use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use unipool_core::notify::{Contact, ContactDirectory, NotificationDispatcher};
use unipool_shared::LifecycleEvent;

/// Drains lifecycle events and pushes them to their recipients.
///
/// Delivery failures are logged and dropped. The task ends once every
/// publisher has been dropped and the queue is empty.
pub fn start_notification_worker(
    mut rx: UnboundedReceiver<LifecycleEvent>,
    directory: Arc<dyn ContactDirectory>,
    dispatcher: Arc<dyn NotificationDispatcher>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Notification worker started");

        while let Some(event) = rx.recv().await {
            deliver(&event, directory.as_ref(), dispatcher.as_ref()).await;
        }

        info!("Notification worker stopped, channel closed");
    })
}

async fn deliver(
    event: &LifecycleEvent,
    directory: &dyn ContactDirectory,
    dispatcher: &dyn NotificationDispatcher,
) {
    let recipient = lookup(directory, event.recipient_id).await;
    let actor = lookup(directory, event.actor_id).await;

    let token = recipient.as_ref().and_then(|c| c.notification_token.as_deref());
    let actor_name = actor.as_ref().and_then(|c| c.name.as_deref());

    let result = dispatcher
        .notify(token, event.title(), &event.body(actor_name), &event.metadata())
        .await;

    match result {
        Ok(()) => info!(
            booking_id = %event.booking_id,
            recipient_id = %event.recipient_id,
            "Delivered {} notification",
            event.kind.type_tag()
        ),
        Err(e) => error!(
            booking_id = %event.booking_id,
            recipient_id = %event.recipient_id,
            "Failed to deliver {} notification: {}",
            event.kind.type_tag(),
            e
        ),
    }
}

async fn lookup(directory: &dyn ContactDirectory, user_id: Uuid) -> Option<Contact> {
    match directory.contact(user_id).await {
        Ok(contact) => contact,
        Err(e) => {
            warn!(%user_id, "Contact lookup failed: {}", e);
            None
        }
    }
}
