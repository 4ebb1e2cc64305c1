use anyhow::Result;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    domain::value_objects::enums::{
        booking_statuses::BookingStatus, meeting_types::MeetingType, parties::Party,
        payment_statuses::PaymentStatus,
    },
    infra::db::postgres::schema::bookings,
    utils::geo::Coordinates,
};

#[derive(Debug, Clone, PartialEq, Serialize, Identifiable, Selectable, Queryable)]
#[diesel(table_name = bookings)]
pub struct BookingEntity {
    pub id: Uuid,
    pub client_id: Uuid,
    pub companion_id: Uuid,
    pub booking_request_id: Option<Uuid>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub timezone: String,
    pub base_amount_minor: i64,
    pub extra_amount_minor: i64,
    pub currency: String,
    pub status: String,
    pub payment_status: String,
    #[serde(skip_serializing)]
    pub payment_method_ref: Option<String>,
    pub payment_intent_id: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub payment_released_at: Option<DateTime<Utc>>,
    pub transfer_id: Option<String>,
    pub transfer_status: Option<String>,
    pub refund_id: Option<String>,
    pub cancelled_by: Option<String>,
    pub cancellation_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Set when a scheduler hit a failure no retry can fix; such rows are
    /// skipped by every scan.
    pub blocked_at: Option<DateTime<Utc>>,
    pub blocked_reason: Option<String>,
    pub meeting_type: String,
    pub meeting_location: Option<String>,
    pub meeting_location_lat: Option<f64>,
    pub meeting_location_lon: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BookingEntity {
    pub fn status(&self) -> Result<BookingStatus> {
        self.status.parse()
    }

    pub fn payment_status(&self) -> Result<PaymentStatus> {
        self.payment_status.parse()
    }

    pub fn meeting_type(&self) -> Result<MeetingType> {
        self.meeting_type.parse()
    }

    pub fn total_amount_minor(&self) -> i64 {
        self.base_amount_minor + self.extra_amount_minor
    }

    pub fn party_of(&self, user_id: Uuid) -> Option<Party> {
        if user_id == self.client_id {
            Some(Party::Client)
        } else if user_id == self.companion_id {
            Some(Party::Companion)
        } else {
            None
        }
    }

    pub fn user_for(&self, party: Party) -> Uuid {
        match party {
            Party::Client => self.client_id,
            Party::Companion => self.companion_id,
        }
    }

    pub fn meeting_point(&self) -> Option<Coordinates> {
        match (self.meeting_location_lat, self.meeting_location_lon) {
            (Some(lat), Some(lon)) => Some(Coordinates { lat, lon }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = bookings)]
pub struct InsertBookingEntity {
    pub client_id: Uuid,
    pub companion_id: Uuid,
    pub booking_request_id: Option<Uuid>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub timezone: String,
    pub base_amount_minor: i64,
    pub extra_amount_minor: i64,
    pub currency: String,
    pub status: String,
    pub payment_status: String,
    pub payment_method_ref: Option<String>,
    pub meeting_type: String,
    pub meeting_location: Option<String>,
    pub meeting_location_lat: Option<f64>,
    pub meeting_location_lon: Option<f64>,
}

/// Columns a transition may write. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq, AsChangeset)]
#[diesel(table_name = bookings)]
pub struct BookingChangeset {
    pub status: Option<String>,
    pub payment_status: Option<String>,
    pub payment_intent_id: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub payment_released_at: Option<DateTime<Utc>>,
    pub transfer_id: Option<String>,
    pub transfer_status: Option<String>,
    pub refund_id: Option<String>,
    pub cancelled_by: Option<String>,
    pub cancellation_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub blocked_at: Option<DateTime<Utc>>,
    pub blocked_reason: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl BookingChangeset {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            updated_at: Some(now),
            ..Default::default()
        }
    }

    pub fn status(mut self, status: BookingStatus) -> Self {
        self.status = Some(status.to_string());
        self
    }

    pub fn payment_status(mut self, payment_status: PaymentStatus) -> Self {
        self.payment_status = Some(payment_status.to_string());
        self
    }
}
