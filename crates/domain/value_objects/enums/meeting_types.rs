use std::{fmt::Display, str::FromStr};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

#[derive(Default, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MeetingType {
    #[default]
    InPerson,
    Virtual,
}

impl MeetingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeetingType::InPerson => "in_person",
            MeetingType::Virtual => "virtual",
        }
    }

    pub fn requires_proximity(&self) -> bool {
        matches!(self, MeetingType::InPerson)
    }
}

impl Display for MeetingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MeetingType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "in_person" => Ok(MeetingType::InPerson),
            "virtual" => Ok(MeetingType::Virtual),
            other => Err(anyhow!("unknown meeting type: {other}")),
        }
    }
}
