use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use unipool_core::notify::{NotificationDispatcher, NotifyError};

use crate::app_config::NotificationConfig;

#[derive(Serialize)]
struct PushMessage<'a> {
    to: &'a str,
    sound: &'a str,
    title: &'a str,
    body: &'a str,
    data: &'a serde_json::Value,
    priority: &'a str,
}

#[derive(Deserialize)]
struct PushResponse {
    data: PushTicket,
}

#[derive(Deserialize)]
struct PushTicket {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

/// Expo push API client.
#[derive(Clone)]
pub struct ExpoPushClient {
    client: Client,
    push_url: String,
}

impl ExpoPushClient {
    pub fn new(config: &NotificationConfig) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        Ok(Self {
            client,
            push_url: config.push_url.clone(),
        })
    }
}

#[async_trait]
impl NotificationDispatcher for ExpoPushClient {
    async fn notify(
        &self,
        recipient_token: Option<&str>,
        title: &str,
        body: &str,
        metadata: &serde_json::Value,
    ) -> Result<(), NotifyError> {
        let Some(token) = recipient_token.map(str::trim).filter(|t| !t.is_empty()) else {
            debug!(title, "No push token for recipient, skipping");
            return Ok(());
        };

        let message = PushMessage {
            to: token,
            sound: "default",
            title,
            body,
            data: metadata,
            priority: "high",
        };

        let response = self
            .client
            .post(&self.push_url)
            .header("accept", "application/json")
            .json(&message)
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(NotifyError::Delivery(format!("HTTP {}: {}", status.as_u16(), text)));
        }

        let ticket = response
            .json::<PushResponse>()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?
            .data;

        if ticket.status != "ok" {
            return Err(NotifyError::Rejected(
                ticket.message.unwrap_or_else(|| ticket.status.clone()),
            ));
        }

        debug!(title, "Push notification accepted");
        Ok(())
    }
}
