pub mod booking_requests;
pub mod booking_verifications;
pub mod bookings;
pub mod notification_channel;
pub mod payment_gateway;
pub mod webhook_failures;
