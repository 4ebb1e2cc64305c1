pub mod booking_requests;
pub mod booking_verifications;
pub mod bookings;
pub mod webhook_failures;
