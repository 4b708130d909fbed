use async_trait::async_trait;
use thiserror::Error;

/// Platform failure to produce a fix, carrying the platform's message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct GeoError(pub String);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    /// Accuracy radius in meters, when the platform reports one.
    pub accuracy: Option<f64>,
}

impl Position {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            accuracy: None,
        }
    }
}

/// One-shot, high-accuracy position source.
#[async_trait]
pub trait Geolocator: Send + Sync {
    async fn current_position(&self) -> Result<Position, GeoError>;
}

/// Always reports the same position. For field tests without a receiver.
#[derive(Debug, Clone)]
pub struct FixedGeolocator {
    position: Position,
}

impl FixedGeolocator {
    pub fn new(position: Position) -> Self {
        Self { position }
    }
}

#[async_trait]
impl Geolocator for FixedGeolocator {
    async fn current_position(&self) -> Result<Position, GeoError> {
        Ok(self.position)
    }
}
