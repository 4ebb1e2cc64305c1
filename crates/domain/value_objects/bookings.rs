use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    domain::{
        entities::{booking_verifications::BookingVerificationEntity, bookings::BookingEntity},
        value_objects::{enums::meeting_types::MeetingType, meeting_phase::MeetingPhase},
    },
};

pub const MIN_DURATION_MINUTES: i32 = 15;
pub const MAX_DURATION_MINUTES: i32 = 12 * 60;

/// When and where a meeting happens, as entered by the client in their own
/// timezone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeetingSlotModel {
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM` or `HH:MM:SS`
    pub start_time: String,
    /// IANA name, e.g. `Asia/Bangkok`.
    pub timezone: String,
    pub duration_minutes: i32,
    #[serde(default)]
    pub meeting_type: MeetingType,
    pub meeting_location: Option<String>,
    pub meeting_location_lat: Option<f64>,
    pub meeting_location_lon: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateBookingModel {
    pub companion_id: Uuid,
    #[serde(flatten)]
    pub slot: MeetingSlotModel,
    pub base_amount_minor: i64,
    #[serde(default)]
    pub extra_amount_minor: i64,
    pub currency: String,
    pub payment_method_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateBookingRequestModel {
    pub companion_id: Uuid,
    #[serde(flatten)]
    pub slot: MeetingSlotModel,
    pub proposed_amount_minor: i64,
    pub currency: String,
    pub payment_method_ref: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CancelBookingModel {
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BookingDto {
    #[serde(flatten)]
    pub booking: BookingEntity,
    pub phase: MeetingPhase,
}

impl BookingDto {
    pub fn new(
        booking: BookingEntity,
        verification: Option<&BookingVerificationEntity>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        let phase = MeetingPhase::derive(&booking, verification, now);
        Self { booking, phase }
    }
}
