use booking_core::{
    domain::repositories::bookings::BookingRepository, usecases::errors::BookingError,
};
use chrono::{DateTime, Utc};
use tracing::{error, warn};
use uuid::Uuid;

pub mod complete_bookings;
pub mod expire_booking_requests;
pub mod expire_bookings;
pub mod expire_verifications;
pub mod issue_verification_codes;
pub mod release_payments;

/// Upper bound on row ids carried in a pass result for logging.
const MAX_REPORTED_IDS: usize = 20;

/// Parks a booking whose failure no retry can fix, so it stops occupying a
/// slot at the head of every following scan. Returns whether the booking is
/// now blocked.
async fn block_on_integrity_failure(
    bookings: &(dyn BookingRepository + Send + Sync),
    booking_id: Uuid,
    err: &BookingError,
    now: DateTime<Utc>,
) -> bool {
    let BookingError::DataIntegrity(reason) = err else {
        return false;
    };

    match bookings.block(booking_id, reason.clone(), now).await {
        Ok(_) => {
            error!(
                %booking_id,
                %reason,
                "scheduler: booking blocked, needs manual repair"
            );
            true
        }
        Err(block_err) => {
            warn!(%booking_id, error = %block_err, "scheduler: failed to block booking");
            false
        }
    }
}
