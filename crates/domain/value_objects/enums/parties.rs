use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// One side of a booking.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    Client,
    Companion,
}

impl Party {
    pub fn as_str(&self) -> &'static str {
        match self {
            Party::Client => "client",
            Party::Companion => "companion",
        }
    }

    pub fn other(&self) -> Party {
        match self {
            Party::Client => Party::Companion,
            Party::Companion => Party::Client,
        }
    }
}

impl Display for Party {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
