use anyhow::Result;
use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::domain::repositories::notification_channel::{Notification, NotificationChannel};

/// Used when no delivery service is configured. Only metadata is logged; the
/// body may carry a verification code.
#[derive(Debug, Default)]
pub struct LogNotificationChannel;

#[async_trait]
impl NotificationChannel for LogNotificationChannel {
    async fn send(&self, user_id: Uuid, notification: Notification) -> Result<()> {
        info!(
            %user_id,
            kind = %notification.kind,
            booking_id = ?notification.booking_id,
            "notifications: delivery skipped, no channel configured"
        );
        Ok(())
    }
}
