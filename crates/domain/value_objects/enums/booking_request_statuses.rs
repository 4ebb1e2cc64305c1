use std::{fmt::Display, str::FromStr};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingRequestStatus {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
    Expired,
}

impl BookingRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingRequestStatus::Pending => "pending",
            BookingRequestStatus::Accepted => "accepted",
            BookingRequestStatus::Rejected => "rejected",
            BookingRequestStatus::Cancelled => "cancelled",
            BookingRequestStatus::Expired => "expired",
        }
    }

    pub fn is_companion_response(&self) -> bool {
        matches!(
            self,
            BookingRequestStatus::Accepted | BookingRequestStatus::Rejected
        )
    }
}

impl Display for BookingRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingRequestStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(BookingRequestStatus::Pending),
            "accepted" => Ok(BookingRequestStatus::Accepted),
            "rejected" => Ok(BookingRequestStatus::Rejected),
            "cancelled" => Ok(BookingRequestStatus::Cancelled),
            "expired" => Ok(BookingRequestStatus::Expired),
            other => Err(anyhow!("unknown booking request status: {other}")),
        }
    }
}
