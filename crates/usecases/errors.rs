use thiserror::Error;

use crate::domain::value_objects::verification::VerificationRejection;

/// Failures a booking use case reports to its caller. A conditional update
/// that lost a race is not one of them: that is `TransitionOutcome::Stale`.
#[derive(Debug, Error)]
pub enum BookingError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("not allowed for this user")]
    Forbidden,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    #[error("companion already has a booking overlapping this time")]
    Conflict,
    #[error("verification rejected: {0}")]
    Rejected(#[from] VerificationRejection),
    #[error("payment provider call failed: {0}")]
    ExternalProvider(anyhow::Error),
    #[error("data integrity violation: {0}")]
    DataIntegrity(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type UseCaseResult<T> = std::result::Result<T, BookingError>;

impl BookingError {
    pub fn invalid_transition(action: &str, status: impl std::fmt::Display) -> Self {
        BookingError::InvalidTransition(format!("cannot {action} a booking that is {status}"))
    }

    /// HTTP status the API answers with.
    pub fn status_code(&self) -> u16 {
        match self {
            BookingError::NotFound(_) => 404,
            BookingError::Forbidden => 403,
            BookingError::InvalidInput(_) => 400,
            BookingError::InvalidTransition(_) | BookingError::Conflict => 409,
            BookingError::Rejected(_) => 422,
            BookingError::ExternalProvider(_) => 502,
            BookingError::DataIntegrity(_) | BookingError::Internal(_) => 500,
        }
    }

    /// Whether the message can be shown to the caller as it is.
    pub fn is_client_facing(&self) -> bool {
        self.status_code() < 500
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_mistakes_are_4xx_and_our_failures_are_5xx() {
        assert_eq!(BookingError::NotFound("booking").status_code(), 404);
        assert_eq!(BookingError::Conflict.status_code(), 409);
        assert_eq!(
            BookingError::Rejected(VerificationRejection::OutOfRange).status_code(),
            422
        );
        assert!(!BookingError::DataIntegrity("paid without intent".into()).is_client_facing());
        assert!(!BookingError::ExternalProvider(anyhow::anyhow!("timeout")).is_client_facing());
    }
}
