use crate::domain::{
    entities::{
        booking_requests::BookingRequestEntity, booking_verifications::BookingVerificationEntity,
        bookings::BookingEntity,
    },
    value_objects::enums::{booking_statuses::BookingStatus, payment_statuses::PaymentStatus},
};

/// Result of a conditional update. `Stale` means the row no longer matched
/// the expected state: another actor got there first and the caller should
/// treat its intent as already handled.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome<T> {
    Applied(T),
    Stale,
}

impl<T> TransitionOutcome<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }

    pub fn applied(self) -> Option<T> {
        match self {
            TransitionOutcome::Applied(value) => Some(value),
            TransitionOutcome::Stale => None,
        }
    }
}

impl<T> From<Option<T>> for TransitionOutcome<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => TransitionOutcome::Applied(value),
            None => TransitionOutcome::Stale,
        }
    }
}

/// Expected current state of a booking row for a conditional update.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingGuard {
    pub statuses: Vec<BookingStatus>,
    pub payment_statuses: Vec<PaymentStatus>,
    /// Additionally require `payment_released_at IS NULL`.
    pub unreleased: bool,
}

impl BookingGuard {
    pub fn status(status: BookingStatus) -> Self {
        Self::statuses(&[status])
    }

    pub fn statuses(statuses: &[BookingStatus]) -> Self {
        Self {
            statuses: statuses.to_vec(),
            payment_statuses: PaymentStatus::ALL.to_vec(),
            unreleased: false,
        }
    }

    pub fn payment(mut self, payment_statuses: &[PaymentStatus]) -> Self {
        self.payment_statuses = payment_statuses.to_vec();
        self
    }

    pub fn unreleased(mut self) -> Self {
        self.unreleased = true;
        self
    }

    pub fn matches(&self, booking: &BookingEntity) -> bool {
        let status_ok = booking
            .status()
            .map(|status| self.statuses.contains(&status))
            .unwrap_or(false);
        let payment_ok = booking
            .payment_status()
            .map(|status| self.payment_statuses.contains(&status))
            .unwrap_or(false);

        status_ok && payment_ok && (!self.unreleased || booking.payment_released_at.is_none())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertBookingOutcome {
    Inserted(BookingEntity),
    /// The companion already holds a pending or confirmed booking overlapping
    /// the requested range.
    Overlap,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmOutcome {
    Confirmed(BookingEntity),
    Stale,
    /// Another confirmed booking of the same companion overlaps this one.
    Overlap,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AcceptRequestOutcome {
    Accepted {
        request: BookingRequestEntity,
        booking: BookingEntity,
    },
    Stale,
    Overlap,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PartyVerificationOutcome {
    /// This party is verified, the other one is still outstanding.
    Recorded(BookingVerificationEntity),
    /// This submission completed the pair; `both_verified_at` is now set.
    BothVerified(BookingVerificationEntity),
    Stale,
}
