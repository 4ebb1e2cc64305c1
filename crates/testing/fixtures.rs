use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::domain::{
    entities::{
        booking_requests::BookingRequestEntity, booking_verifications::BookingVerificationEntity,
        bookings::BookingEntity,
    },
    value_objects::enums::{
        booking_request_statuses::BookingRequestStatus, booking_statuses::BookingStatus,
        meeting_types::MeetingType, payment_statuses::PaymentStatus,
        verification_statuses::VerificationStatus,
    },
};

/// Siam Paragon, Bangkok.
pub const MEETING_LAT: f64 = 13.7462;
pub const MEETING_LON: f64 = 100.5347;

/// A pending, unpaid, one-hour in-person booking.
pub fn booking_fixture(starts_at: DateTime<Utc>) -> BookingEntity {
    let now = Utc::now();
    BookingEntity {
        id: Uuid::new_v4(),
        client_id: Uuid::new_v4(),
        companion_id: Uuid::new_v4(),
        booking_request_id: None,
        starts_at,
        ends_at: starts_at + Duration::minutes(60),
        duration_minutes: 60,
        timezone: "Asia/Bangkok".to_string(),
        base_amount_minor: 150_000,
        extra_amount_minor: 0,
        currency: "THB".to_string(),
        status: BookingStatus::Pending.to_string(),
        payment_status: PaymentStatus::Unpaid.to_string(),
        payment_method_ref: Some("pm_card_visa".to_string()),
        payment_intent_id: None,
        confirmed_at: None,
        paid_at: None,
        completed_at: None,
        payment_released_at: None,
        transfer_id: None,
        transfer_status: None,
        refund_id: None,
        cancelled_by: None,
        cancellation_reason: None,
        cancelled_at: None,
        blocked_at: None,
        blocked_reason: None,
        meeting_type: MeetingType::InPerson.to_string(),
        meeting_location: Some("Siam Paragon, main entrance".to_string()),
        meeting_location_lat: Some(MEETING_LAT),
        meeting_location_lon: Some(MEETING_LON),
        created_at: now,
        updated_at: now,
    }
}

/// A confirmed booking with an authorized hold.
pub fn confirmed_booking_fixture(starts_at: DateTime<Utc>) -> BookingEntity {
    let mut booking = booking_fixture(starts_at);
    booking.status = BookingStatus::Confirmed.to_string();
    booking.payment_status = PaymentStatus::Authorized.to_string();
    booking.payment_intent_id = Some(format!("pi_{}", booking.id.simple()));
    booking.confirmed_at = Some(Utc::now());
    booking
}

/// A pending verification window with no codes issued yet.
pub fn verification_fixture(booking_id: Uuid, expires_at: DateTime<Utc>) -> BookingVerificationEntity {
    let now = Utc::now();
    BookingVerificationEntity {
        id: Uuid::new_v4(),
        booking_id,
        client_otp_hash: None,
        companion_otp_hash: None,
        client_otp_generated_at: None,
        companion_otp_generated_at: None,
        client_otp_sent_at: None,
        companion_otp_sent_at: None,
        client_failed_attempts: 0,
        companion_failed_attempts: 0,
        client_verified_at: None,
        companion_verified_at: None,
        client_verification_lat: None,
        client_verification_lon: None,
        companion_verification_lat: None,
        companion_verification_lon: None,
        expires_at,
        extension_requested_by: None,
        extended_at: None,
        verification_status: VerificationStatus::Pending.to_string(),
        both_verified_at: None,
        created_at: now,
        updated_at: now,
    }
}

/// A pending two-hour virtual booking request.
pub fn booking_request_fixture(
    starts_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> BookingRequestEntity {
    let now = Utc::now();
    BookingRequestEntity {
        id: Uuid::new_v4(),
        client_id: Uuid::new_v4(),
        companion_id: Uuid::new_v4(),
        starts_at,
        ends_at: starts_at + Duration::minutes(120),
        duration_minutes: 120,
        timezone: "Asia/Bangkok".to_string(),
        proposed_amount_minor: 300_000,
        currency: "THB".to_string(),
        meeting_type: MeetingType::Virtual.to_string(),
        meeting_location: None,
        meeting_location_lat: None,
        meeting_location_lon: None,
        payment_method_ref: Some("pm_card_visa".to_string()),
        message: None,
        status: BookingRequestStatus::Pending.to_string(),
        payment_status: PaymentStatus::Unpaid.to_string(),
        expires_at,
        responded_at: None,
        booking_id: None,
        created_at: now,
        updated_at: now,
    }
}
