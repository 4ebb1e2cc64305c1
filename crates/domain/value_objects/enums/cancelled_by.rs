use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    Client,
    Companion,
    System,
}

impl Display for CancelledBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            CancelledBy::Client => "client",
            CancelledBy::Companion => "companion",
            CancelledBy::System => "system",
        };
        write!(f, "{}", value)
    }
}
