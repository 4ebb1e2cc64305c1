use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Notification {
    pub kind: String,
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<Uuid>,
}

/// Out-of-band delivery to a user (push, SMS, email). Failures are reported
/// to the caller, who decides whether they matter.
#[automock]
#[async_trait]
pub trait NotificationChannel {
    async fn send(&self, user_id: Uuid, notification: Notification) -> Result<()>;
}
