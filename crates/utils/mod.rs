pub mod geo;
pub mod otp;
pub mod time;
