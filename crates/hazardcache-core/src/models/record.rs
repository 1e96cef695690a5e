use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A coordinate pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// True when both coordinates are finite and within the WGS84 ranges.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Parse a `"lat,lon"` pair, tolerating surrounding whitespace.
    pub fn parse(s: &str) -> Option<Self> {
        let (lat, lon) = s.split_once(',')?;
        let position = Self::new(lat.trim().parse().ok()?, lon.trim().parse().ok()?);
        position.is_valid().then_some(position)
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.5}, {:.5}", self.latitude, self.longitude)
    }
}

/// A cached geotagged record. Ids are assigned by the store and never reused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: u64,
    pub latitude: f64,
    pub longitude: f64,
    pub label: String,
}

impl Record {
    pub fn position(&self) -> Position {
        Position::new(self.latitude, self.longitude)
    }
}

/// A validated record that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub latitude: f64,
    pub longitude: f64,
    pub label: String,
}

impl NewRecord {
    pub(crate) fn into_record(self, id: u64) -> Record {
        Record {
            id,
            latitude: self.latitude,
            longitude: self.longitude,
            label: self.label,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MalformedRecord {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("latitude out of range: {0}")]
    InvalidLatitude(f64),

    #[error("longitude out of range: {0}")]
    InvalidLongitude(f64),

    #[error("label is empty")]
    EmptyLabel,
}

/// An unvalidated entry as produced by a fetch collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub label: Option<String>,
}

impl RawRecord {
    pub fn new(latitude: f64, longitude: f64, label: impl Into<String>) -> Self {
        Self {
            latitude: Some(latitude),
            longitude: Some(longitude),
            label: Some(label.into()),
        }
    }

    pub fn validate(self) -> Result<NewRecord, MalformedRecord> {
        let latitude = self
            .latitude
            .ok_or(MalformedRecord::MissingField("latitude"))?;
        let longitude = self
            .longitude
            .ok_or(MalformedRecord::MissingField("longitude"))?;
        let label = self.label.ok_or(MalformedRecord::MissingField("label"))?;

        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(MalformedRecord::InvalidLatitude(latitude));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(MalformedRecord::InvalidLongitude(longitude));
        }

        let label = label.trim().to_string();
        if label.is_empty() {
            return Err(MalformedRecord::EmptyLabel);
        }

        Ok(NewRecord {
            latitude,
            longitude,
            label,
        })
    }
}
