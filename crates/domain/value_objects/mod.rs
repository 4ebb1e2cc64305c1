pub mod booking_events;
pub mod booking_rules;
pub mod bookings;
pub mod enums;
pub mod meeting_phase;
pub mod payment_webhook;
pub mod transitions;
pub mod verification;
