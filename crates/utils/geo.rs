use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Error, PartialEq)]
#[error("invalid coordinates ({lat}, {lon})")]
pub struct InvalidCoordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> Result<Self, InvalidCoordinates> {
        let valid = lat.is_finite()
            && lon.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lon);
        if !valid {
            return Err(InvalidCoordinates { lat, lon });
        }
        Ok(Self { lat, lon })
    }

    /// Both halves present and valid, both absent, or an error.
    pub fn from_parts(
        lat: Option<f64>,
        lon: Option<f64>,
    ) -> Result<Option<Self>, InvalidCoordinates> {
        match (lat, lon) {
            (Some(lat), Some(lon)) => Coordinates::new(lat, lon).map(Some),
            (None, None) => Ok(None),
            (lat, lon) => Err(InvalidCoordinates {
                lat: lat.unwrap_or(f64::NAN),
                lon: lon.unwrap_or(f64::NAN),
            }),
        }
    }
}

/// Great-circle distance in meters (haversine).
pub fn haversine_meters(a: Coordinates, b: Coordinates) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin()
}

pub fn within_radius(a: Coordinates, b: Coordinates, radius_meters: f64) -> bool {
    haversine_meters(a, b) <= radius_meters
}
