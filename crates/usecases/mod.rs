pub mod booking_lifecycle;
pub mod booking_requests;
pub mod errors;
pub mod payment_coordinator;
pub mod payment_webhook;
pub mod verification;
