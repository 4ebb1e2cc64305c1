use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::value_objects::{enums::parties::Party, meeting_phase::MeetingPhase};

/// Why a verification attempt was turned down. Only the attempt counter is
/// touched when this is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum VerificationRejection {
    #[error("verification window is not open")]
    WindowNotOpen,
    #[error("verification code has expired")]
    CodeExpired,
    #[error("verification code is incorrect")]
    InvalidCode,
    #[error("too many failed attempts")]
    TooManyAttempts,
    #[error("current location is required for in-person meetings")]
    LocationRequired,
    #[error("current location is too far from the meeting point")]
    OutOfRange,
    #[error("already verified")]
    AlreadyVerified,
    #[error("extension already used")]
    ExtensionUsed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmitVerificationModel {
    pub code: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VerificationStatusDto {
    pub booking_id: Uuid,
    pub phase: MeetingPhase,
    pub you: Party,
    pub you_verified_at: Option<DateTime<Utc>>,
    pub other_party_verified: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub both_verified_at: Option<DateTime<Utc>>,
    pub can_extend: bool,
}
