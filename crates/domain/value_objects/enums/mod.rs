pub mod booking_request_statuses;
pub mod booking_statuses;
pub mod cancelled_by;
pub mod meeting_types;
pub mod parties;
pub mod payment_statuses;
pub mod verification_statuses;
