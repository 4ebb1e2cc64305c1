use anyhow::Result;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    domain::value_objects::enums::booking_request_statuses::BookingRequestStatus,
    infra::db::postgres::schema::booking_requests,
};

#[derive(Debug, Clone, PartialEq, Serialize, Identifiable, Selectable, Queryable)]
#[diesel(table_name = booking_requests)]
pub struct BookingRequestEntity {
    pub id: Uuid,
    pub client_id: Uuid,
    pub companion_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub timezone: String,
    pub proposed_amount_minor: i64,
    pub currency: String,
    pub meeting_type: String,
    pub meeting_location: Option<String>,
    pub meeting_location_lat: Option<f64>,
    pub meeting_location_lon: Option<f64>,
    #[serde(skip_serializing)]
    pub payment_method_ref: Option<String>,
    pub message: Option<String>,
    pub status: String,
    pub payment_status: String,
    pub expires_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub booking_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BookingRequestEntity {
    pub fn status(&self) -> Result<BookingRequestStatus> {
        self.status.parse()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = booking_requests)]
pub struct InsertBookingRequestEntity {
    pub client_id: Uuid,
    pub companion_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub timezone: String,
    pub proposed_amount_minor: i64,
    pub currency: String,
    pub meeting_type: String,
    pub meeting_location: Option<String>,
    pub meeting_location_lat: Option<f64>,
    pub meeting_location_lon: Option<f64>,
    pub payment_method_ref: Option<String>,
    pub message: Option<String>,
    pub status: String,
    pub payment_status: String,
    pub expires_at: DateTime<Utc>,
}
