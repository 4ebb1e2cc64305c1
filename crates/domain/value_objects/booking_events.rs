use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BookingEventKind {
    BookingCreated,
    BookingConfirmed,
    BookingCancelled,
    BookingExpired,
    BookingNoShow,
    BookingCompleted,
    PaymentAuthorized,
    PaymentCaptured,
    PaymentReleased,
    PaymentRefunded,
    VerificationWindowOpened,
    PartyVerified,
    VerificationCompleted,
    VerificationExpired,
    VerificationExtended,
    BookingRequestCreated,
    BookingRequestAccepted,
    BookingRequestRejected,
    BookingRequestCancelled,
    BookingRequestExpired,
    /// Public: a companion's calendar changed.
    AvailabilityChanged,
}

impl BookingEventKind {
    pub fn is_public(&self) -> bool {
        matches!(self, BookingEventKind::AvailabilityChanged)
    }
}

/// Wire shape pushed to live connections.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BookingEvent {
    #[serde(rename = "type")]
    pub kind: BookingEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<Uuid>,
    pub data: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl BookingEvent {
    pub fn new(kind: BookingEventKind, booking_id: Option<Uuid>, data: serde_json::Value) -> Self {
        Self {
            kind,
            booking_id,
            data,
            occurred_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_serializes_with_snake_case_type() {
        let booking_id = Uuid::new_v4();
        let event = BookingEvent::new(
            BookingEventKind::BookingNoShow,
            Some(booking_id),
            json!({ "status": "no_show" }),
        );

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "booking_no_show");
        assert_eq!(value["booking_id"], booking_id.to_string());
        assert_eq!(value["data"]["status"], "no_show");
    }
}
