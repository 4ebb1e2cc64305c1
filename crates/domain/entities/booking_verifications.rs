use anyhow::Result;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    domain::value_objects::enums::{
        parties::Party, verification_statuses::VerificationStatus,
    },
    infra::db::postgres::schema::booking_verifications,
};

#[derive(Debug, Clone, PartialEq, Serialize, Identifiable, Selectable, Queryable)]
#[diesel(table_name = booking_verifications)]
pub struct BookingVerificationEntity {
    pub id: Uuid,
    pub booking_id: Uuid,
    #[serde(skip_serializing)]
    pub client_otp_hash: Option<String>,
    #[serde(skip_serializing)]
    pub companion_otp_hash: Option<String>,
    pub client_otp_generated_at: Option<DateTime<Utc>>,
    pub companion_otp_generated_at: Option<DateTime<Utc>>,
    pub client_otp_sent_at: Option<DateTime<Utc>>,
    pub companion_otp_sent_at: Option<DateTime<Utc>>,
    pub client_failed_attempts: i32,
    pub companion_failed_attempts: i32,
    pub client_verified_at: Option<DateTime<Utc>>,
    pub companion_verified_at: Option<DateTime<Utc>>,
    pub client_verification_lat: Option<f64>,
    pub client_verification_lon: Option<f64>,
    pub companion_verification_lat: Option<f64>,
    pub companion_verification_lon: Option<f64>,
    pub expires_at: DateTime<Utc>,
    pub extension_requested_by: Option<String>,
    pub extended_at: Option<DateTime<Utc>>,
    pub verification_status: String,
    pub both_verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BookingVerificationEntity {
    pub fn status(&self) -> Result<VerificationStatus> {
        self.verification_status.parse()
    }

    pub fn verified_at(&self, party: Party) -> Option<DateTime<Utc>> {
        match party {
            Party::Client => self.client_verified_at,
            Party::Companion => self.companion_verified_at,
        }
    }

    pub fn otp_hash(&self, party: Party) -> Option<&str> {
        match party {
            Party::Client => self.client_otp_hash.as_deref(),
            Party::Companion => self.companion_otp_hash.as_deref(),
        }
    }

    pub fn otp_sent_at(&self, party: Party) -> Option<DateTime<Utc>> {
        match party {
            Party::Client => self.client_otp_sent_at,
            Party::Companion => self.companion_otp_sent_at,
        }
    }

    pub fn failed_attempts(&self, party: Party) -> i32 {
        match party {
            Party::Client => self.client_failed_attempts,
            Party::Companion => self.companion_failed_attempts,
        }
    }

    pub fn is_window_open(&self, now: DateTime<Utc>) -> bool {
        self.both_verified_at.is_none() && now < self.expires_at
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = booking_verifications)]
pub struct InsertBookingVerificationEntity {
    pub booking_id: Uuid,
    pub client_otp_hash: Option<String>,
    pub companion_otp_hash: Option<String>,
    pub client_otp_generated_at: Option<DateTime<Utc>>,
    pub companion_otp_generated_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub verification_status: String,
}
