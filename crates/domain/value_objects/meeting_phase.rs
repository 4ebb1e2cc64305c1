use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{
    entities::{booking_verifications::BookingVerificationEntity, bookings::BookingEntity},
    value_objects::enums::booking_statuses::BookingStatus,
};

/// Where a booking stands from the parties' point of view. Only `status` is
/// stored; everything finer grained is derived from the verification
/// timestamps here and nowhere else.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MeetingPhase {
    AwaitingApproval,
    Scheduled,
    VerificationOpen,
    /// Both parties verified and the meeting has not reached its end time.
    InProgress,
    /// Both parties verified and the end time has passed; waiting for the
    /// completion sweep or a manual close.
    AwaitingCompletion,
    /// The window closed without both parties verifying; the booking is about
    /// to be resolved as a no-show.
    VerificationLapsed,
    Closed,
}

impl MeetingPhase {
    pub fn derive(
        booking: &BookingEntity,
        verification: Option<&BookingVerificationEntity>,
        now: DateTime<Utc>,
    ) -> Self {
        match booking.status().ok() {
            Some(BookingStatus::Pending) => MeetingPhase::AwaitingApproval,
            Some(BookingStatus::Confirmed) => match verification {
                None => MeetingPhase::Scheduled,
                Some(v) if v.both_verified_at.is_some() => {
                    if now < booking.ends_at {
                        MeetingPhase::InProgress
                    } else {
                        MeetingPhase::AwaitingCompletion
                    }
                }
                Some(v) if v.is_window_open(now) => MeetingPhase::VerificationOpen,
                Some(_) => MeetingPhase::VerificationLapsed,
            },
            _ => MeetingPhase::Closed,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, MeetingPhase::InProgress)
    }
}
