use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    domain::{
        entities::bookings::BookingEntity,
        value_objects::booking_events::{BookingEvent, BookingEventKind},
    },
    realtime::connection_registry::{ConnectionRegistry, LiveSender},
};

/// Best-effort fan-out of booking events to live connections. Never blocks
/// and never fails: an offline user or a full connection buffer just means
/// the event is dropped and the client catches up on its next fetch.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl EventBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Sends the event to the booking's client and companion. Returns how many
    /// connections accepted it.
    pub fn emit_to_parties(
        &self,
        booking: &BookingEntity,
        kind: BookingEventKind,
        data: serde_json::Value,
    ) -> usize {
        let event = BookingEvent::new(kind, Some(booking.id), data);
        self.emit_to_users(&[booking.client_id, booking.companion_id], &event)
    }

    pub fn emit_to_users(&self, user_ids: &[Uuid], event: &BookingEvent) -> usize {
        let Some(payload) = encode(event) else {
            return 0;
        };

        user_ids
            .iter()
            .flat_map(|user_id| self.registry.lookup(*user_id))
            .filter(|sender| deliver(sender, &payload))
            .count()
    }

    pub fn broadcast_public(&self, event: &BookingEvent) -> usize {
        let Some(payload) = encode(event) else {
            return 0;
        };

        self.registry
            .all()
            .iter()
            .filter(|sender| deliver(sender, &payload))
            .count()
    }

    pub fn availability_changed(
        &self,
        companion_id: Uuid,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> usize {
        let event = BookingEvent::new(
            BookingEventKind::AvailabilityChanged,
            None,
            json!({
                "companion_id": companion_id,
                "starts_at": starts_at,
                "ends_at": ends_at,
            }),
        );
        self.broadcast_public(&event)
    }
}

fn encode(event: &BookingEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(payload) => Some(payload),
        Err(err) => {
            warn!(kind = ?event.kind, error = %err, "broadcaster: failed to encode event");
            None
        }
    }
}

fn deliver(sender: &LiveSender, payload: &str) -> bool {
    match sender.try_send(payload.to_string()) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            debug!("broadcaster: connection buffer full, event dropped");
            false
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        realtime::connection_registry::CONNECTION_BUFFER, testing::fixtures::booking_fixture,
    };

    #[test]
    fn party_events_reach_exactly_the_two_parties() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = EventBroadcaster::new(Arc::clone(&registry));
        let booking = booking_fixture(Utc::now());

        let (_, mut client_rx) = registry.add(booking.client_id);
        let (_, mut companion_rx) = registry.add(booking.companion_id);
        let (_, mut bystander_rx) = registry.add(Uuid::new_v4());

        let delivered = broadcaster.emit_to_parties(
            &booking,
            BookingEventKind::BookingConfirmed,
            json!({ "status": "confirmed" }),
        );

        assert_eq!(delivered, 2);
        let message: serde_json::Value =
            serde_json::from_str(&client_rx.try_recv().unwrap()).unwrap();
        assert_eq!(message["type"], "booking_confirmed");
        assert_eq!(message["booking_id"], booking.id.to_string());
        assert!(companion_rx.try_recv().is_ok());
        assert!(bystander_rx.try_recv().is_err());
    }

    #[test]
    fn offline_parties_are_skipped() {
        let broadcaster = EventBroadcaster::new(Arc::new(ConnectionRegistry::new()));
        let booking = booking_fixture(Utc::now());

        let delivered =
            broadcaster.emit_to_parties(&booking, BookingEventKind::BookingExpired, json!({}));
        assert_eq!(delivered, 0);
    }

    #[test]
    fn availability_is_broadcast_to_everyone() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = EventBroadcaster::new(Arc::clone(&registry));
        let (_, mut first) = registry.add(Uuid::new_v4());
        let (_, mut second) = registry.add(Uuid::new_v4());

        let now = Utc::now();
        assert_eq!(broadcaster.availability_changed(Uuid::new_v4(), now, now), 2);
        assert!(first.try_recv().unwrap().contains("availability_changed"));
        assert!(second.try_recv().is_ok());
    }

    #[test]
    fn full_buffer_drops_without_blocking() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = EventBroadcaster::new(Arc::clone(&registry));
        let booking = booking_fixture(Utc::now());
        let (_, _client_rx) = registry.add(booking.client_id);

        for _ in 0..CONNECTION_BUFFER {
            broadcaster.emit_to_parties(&booking, BookingEventKind::PartyVerified, json!({}));
        }
        let delivered =
            broadcaster.emit_to_parties(&booking, BookingEventKind::PartyVerified, json!({}));
        assert_eq!(delivered, 0);
    }
}
