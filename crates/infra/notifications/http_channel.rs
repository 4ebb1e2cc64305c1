use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::domain::repositories::notification_channel::{Notification, NotificationChannel};

/// Posts notifications as JSON to the delivery service that owns push, SMS
/// and email fan-out.
pub struct HttpNotificationChannel {
    http: reqwest::Client,
    endpoint: url::Url,
}

#[derive(Serialize)]
struct NotificationEnvelope<'a> {
    user_id: Uuid,
    #[serde(flatten)]
    notification: &'a Notification,
}

impl HttpNotificationChannel {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = url::Url::parse(endpoint).context("invalid NOTIFICATION_WEBHOOK_URL")?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build notification http client")?;
        Ok(Self { http, endpoint })
    }
}

#[async_trait]
impl NotificationChannel for HttpNotificationChannel {
    async fn send(&self, user_id: Uuid, notification: Notification) -> Result<()> {
        let resp = self
            .http
            .post(self.endpoint.clone())
            .json(&NotificationEnvelope {
                user_id,
                notification: &notification,
            })
            .send()
            .await
            .context("notification request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            warn!(
                %user_id,
                kind = %notification.kind,
                %status,
                "notifications: delivery rejected"
            );
            anyhow::bail!("notification delivery failed with status {status}");
        }

        Ok(())
    }
}
