//! Telemetry ingestion types - the wire contract with the acquisition layer

mod simulator;

pub use simulator::{FleetSimulator, JsonlSource, TelemetrySource};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why an inbound event was rejected at the ingestion boundary
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TelemetryError {
    #[error("vehicle_id must not be empty")]
    EmptyVehicleId,

    #[error("route_id must not be empty")]
    EmptyRouteId,

    #[error("unknown route_id: {0}")]
    UnknownRoute(String),

    #[error("{field} is not a finite number: {value}")]
    NonFinite { field: &'static str, value: f64 },

    #[error("{field} out of range: {value} (expected {min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{field} must be non-negative: {value}")]
    Negative { field: &'static str, value: f64 },

    #[error("capacity_kg must be positive: {0}")]
    NonPositiveCapacity(f64),
}

/// One GPS/OBD sample for one vehicle at one instant.
///
/// `distance_km` is the distance covered since the vehicle's previous
/// report, not an odometer value. `cargo_temp_c` is only meaningful for
/// cold-chain cargo and may be absent even then (probe dropout).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub vehicle_id: String,
    pub route_id: String,
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmph: f64,
    pub distance_km: f64,
    pub load_kg: f64,
    pub capacity_kg: f64,
    pub is_cold_chain: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cargo_temp_c: Option<f64>,
}

impl TelemetryEvent {
    /// Checks the data contract. A malformed event is rejected whole,
    /// never partially processed.
    pub fn validate(&self) -> Result<(), TelemetryError> {
        if self.vehicle_id.trim().is_empty() {
            return Err(TelemetryError::EmptyVehicleId);
        }
        if self.route_id.trim().is_empty() {
            return Err(TelemetryError::EmptyRouteId);
        }

        finite("latitude", self.latitude)?;
        finite("longitude", self.longitude)?;
        finite("speed_kmph", self.speed_kmph)?;
        finite("distance_km", self.distance_km)?;
        finite("load_kg", self.load_kg)?;
        finite("capacity_kg", self.capacity_kg)?;
        if let Some(temp) = self.cargo_temp_c {
            finite("cargo_temp_c", temp)?;
        }

        in_range("latitude", self.latitude, -90.0, 90.0)?;
        in_range("longitude", self.longitude, -180.0, 180.0)?;

        non_negative("speed_kmph", self.speed_kmph)?;
        non_negative("distance_km", self.distance_km)?;
        non_negative("load_kg", self.load_kg)?;

        if self.capacity_kg <= 0.0 {
            return Err(TelemetryError::NonPositiveCapacity(self.capacity_kg));
        }

        Ok(())
    }
}

fn finite(field: &'static str, value: f64) -> Result<(), TelemetryError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(TelemetryError::NonFinite { field, value })
    }
}

fn in_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), TelemetryError> {
    if value < min || value > max {
        Err(TelemetryError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    } else {
        Ok(())
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), TelemetryError> {
    if value < 0.0 {
        Err(TelemetryError::Negative { field, value })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TelemetryEvent {
        TelemetryEvent {
            vehicle_id: "TRK-DL-001".to_string(),
            route_id: "delhi_mumbai".to_string(),
            timestamp: Utc::now(),
            latitude: 28.6139,
            longitude: 77.2090,
            speed_kmph: 64.0,
            distance_km: 0.036,
            load_kg: 18000.0,
            capacity_kg: 25000.0,
            is_cold_chain: false,
            cargo_temp_c: None,
        }
    }

    #[test]
    fn valid_event_passes() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn empty_vehicle_id_rejected() {
        let mut event = sample();
        event.vehicle_id = "   ".to_string();
        assert_eq!(event.validate(), Err(TelemetryError::EmptyVehicleId));
    }

    #[test]
    fn non_finite_speed_rejected() {
        let mut event = sample();
        event.speed_kmph = f64::NAN;
        assert!(matches!(
            event.validate(),
            Err(TelemetryError::NonFinite {
                field: "speed_kmph",
                ..
            })
        ));
    }

    #[test]
    fn out_of_range_latitude_rejected() {
        let mut event = sample();
        event.latitude = 91.2;
        assert!(matches!(
            event.validate(),
            Err(TelemetryError::OutOfRange {
                field: "latitude",
                ..
            })
        ));
    }

    #[test]
    fn negative_distance_rejected() {
        let mut event = sample();
        event.distance_km = -0.5;
        assert!(matches!(
            event.validate(),
            Err(TelemetryError::Negative {
                field: "distance_km",
                ..
            })
        ));
    }

    #[test]
    fn zero_capacity_rejected() {
        let mut event = sample();
        event.capacity_kg = 0.0;
        assert_eq!(
            event.validate(),
            Err(TelemetryError::NonPositiveCapacity(0.0))
        );
    }

    #[test]
    fn cold_chain_without_probe_reading_is_still_valid() {
        let mut event = sample();
        event.is_cold_chain = true;
        event.cargo_temp_c = None;
        assert!(event.validate().is_ok());
    }

    #[test]
    fn cargo_temp_round_trips_through_json() {
        let mut event = sample();
        event.is_cold_chain = true;
        event.cargo_temp_c = Some(-18.4);
        let json = serde_json::to_string(&event).unwrap();
        let back: TelemetryEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.cargo_temp_c, Some(-18.4));
        assert!(back.is_cold_chain);
    }

    #[test]
    fn absent_cargo_temp_is_omitted_from_json() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(!json.contains("cargo_temp_c"));
    }
}
