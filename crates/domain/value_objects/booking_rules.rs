use chrono::{DateTime, Duration, Utc};

/// Timing and tolerance knobs shared by the request handlers and the
/// schedulers. Loaded from the environment at startup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookingRules {
    pub verification_radius_meters: f64,
    /// The verification window opens this long before the meeting starts.
    pub otp_lead: Duration,
    /// Codes stay valid this long after the meeting start.
    pub otp_valid_after_start: Duration,
    pub verification_extension: Duration,
    pub otp_max_failed_attempts: i32,
    pub no_show_grace: Duration,
    pub dispute_window: Duration,
    pub booking_expiry_threshold: Duration,
    pub booking_request_ttl: Duration,
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            verification_radius_meters: 50.0,
            otp_lead: Duration::minutes(30),
            otp_valid_after_start: Duration::minutes(10),
            verification_extension: Duration::minutes(10),
            otp_max_failed_attempts: 5,
            no_show_grace: Duration::minutes(15),
            dispute_window: Duration::hours(48),
            booking_expiry_threshold: Duration::zero(),
            booking_request_ttl: Duration::hours(24),
        }
    }
}

impl BookingRules {
    pub fn window_opens_at(&self, starts_at: DateTime<Utc>) -> DateTime<Utc> {
        starts_at - self.otp_lead
    }

    pub fn window_closes_at(&self, starts_at: DateTime<Utc>) -> DateTime<Utc> {
        starts_at + self.otp_valid_after_start
    }

    /// Pending bookings that started at or before this instant are expired.
    pub fn expiry_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.booking_expiry_threshold
    }

    /// Confirmed bookings that started at or before this instant without ever
    /// opening a verification window are no-shows.
    pub fn no_show_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.no_show_grace
    }

    /// Completed bookings finished at or before this instant are out of the
    /// dispute window.
    pub fn release_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.dispute_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn window_brackets_the_meeting_start() {
        let rules = BookingRules::default();
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 18, 0, 0).unwrap();

        assert_eq!(
            rules.window_opens_at(start),
            Utc.with_ymd_and_hms(2026, 3, 1, 17, 30, 0).unwrap()
        );
        assert_eq!(
            rules.window_closes_at(start),
            Utc.with_ymd_and_hms(2026, 3, 1, 18, 10, 0).unwrap()
        );
    }

    #[test]
    fn release_cutoff_honours_dispute_window() {
        let rules = BookingRules::default();
        let now = Utc.with_ymd_and_hms(2026, 3, 3, 12, 0, 0).unwrap();

        assert_eq!(
            rules.release_cutoff(now),
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
        );
    }
}
