use std::{fmt::Display, str::FromStr};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
    Expired,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 6] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
        BookingStatus::NoShow,
        BookingStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::NoShow => "no_show",
            BookingStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed
                | BookingStatus::Cancelled
                | BookingStatus::NoShow
                | BookingStatus::Expired
        )
    }

    /// Statuses that occupy the companion's calendar.
    pub fn holding() -> [BookingStatus; 2] {
        [BookingStatus::Pending, BookingStatus::Confirmed]
    }
}

impl Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "completed" => Ok(BookingStatus::Completed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            "no_show" => Ok(BookingStatus::NoShow),
            "expired" => Ok(BookingStatus::Expired),
            other => Err(anyhow!("unknown booking status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_are_exactly_the_four_end_states() {
        let terminal: Vec<_> = BookingStatus::ALL
            .into_iter()
            .filter(BookingStatus::is_terminal)
            .collect();

        assert_eq!(
            terminal,
            vec![
                BookingStatus::Completed,
                BookingStatus::Cancelled,
                BookingStatus::NoShow,
                BookingStatus::Expired
            ]
        );
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!("in_progress".parse::<BookingStatus>().is_err());
        assert_eq!(
            "no_show".parse::<BookingStatus>().unwrap(),
            BookingStatus::NoShow
        );
    }
}
