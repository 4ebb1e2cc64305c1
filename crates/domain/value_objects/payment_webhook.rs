use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Provider event as delivered to the webhook endpoint, after the signature
/// has been checked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentWebhookEvent {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: PaymentWebhookData,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentWebhookData {
    pub object: serde_json::Value,
}

impl PaymentWebhookEvent {
    pub fn object_id(&self) -> Option<&str> {
        self.data.object.get("id").and_then(|value| value.as_str())
    }

    /// The PaymentIntent the event is about. Charge events carry it in a
    /// separate field.
    pub fn payment_intent_id(&self) -> Option<&str> {
        if self.event_type.starts_with("payment_intent.") {
            return self.object_id();
        }
        self.data
            .object
            .get("payment_intent")
            .and_then(|value| value.as_str())
    }

    pub fn metadata_booking_id(&self) -> Option<Uuid> {
        self.data
            .object
            .get("metadata")
            .and_then(|metadata| metadata.get("booking_id"))
            .and_then(|value| value.as_str())
            .and_then(|value| Uuid::parse_str(value).ok())
    }

    pub fn failure_message(&self) -> Option<&str> {
        self.data
            .object
            .get("last_payment_error")
            .and_then(|error| error.get("message"))
            .and_then(|value| value.as_str())
    }
}

/// What the webhook processor did with one event. `Failed` is recorded as a
/// webhook failure and still acknowledged to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed,
    Failed(String),
}
