// Copyright (c) 2026 RoutePulse Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/routepulse/routepulse-rs

//! Corridor reference geometry
//!
//! Fixed highway corridors as waypoint polylines, plus the great-circle
//! math used for deviation checks and remaining-distance estimates. The
//! table is read-only after load and shared across all vehicle workers.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Mean Earth radius used by the Haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// One corridor vertex in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl Waypoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Great-circle distance between two points in km.
pub fn haversine_km(a: Waypoint, b: Waypoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Result of projecting a position onto a corridor polyline.
#[derive(Debug, Clone, Copy)]
pub struct NearestPoint {
    /// Index of the nearest polyline segment.
    pub segment: usize,
    /// Fraction along that segment, clamped to [0, 1].
    pub fraction: f64,
    /// Great-circle offset from the position to the projection, km.
    pub offset_km: f64,
    /// Corridor distance from the origin to the projection, km.
    pub traveled_km: f64,
}

/// Whether a position is inside the deviation threshold of its corridor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviationStatus {
    OnRoute,
    Deviated { offset_km: f64 },
}

impl DeviationStatus {
    /// Strictly greater-than: an offset exactly at the threshold does
    /// not count as a deviation.
    pub fn from_offset(offset_km: f64, threshold_km: f64) -> Self {
        if offset_km > threshold_km {
            Self::Deviated { offset_km }
        } else {
            Self::OnRoute
        }
    }

    pub fn is_deviated(&self) -> bool {
        matches!(self, Self::Deviated { .. })
    }
}

impl fmt::Display for DeviationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnRoute => write!(f, "OK"),
            Self::Deviated { offset_km } => write!(f, "ROUTE_DEVIATION:{offset_km:.2}"),
        }
    }
}

/// A fixed freight corridor between two cities.
#[derive(Debug, Clone)]
pub struct Corridor {
    pub route_id: String,
    /// Historical fleet-average emission on this corridor, kg CO2/km.
    /// Source: NLP 2022 Annex C freight emission baselines.
    pub baseline_co2_per_km: f64,
    waypoints: Vec<Waypoint>,
    cumulative_km: Vec<f64>,
}

impl Corridor {
    pub fn new(route_id: &str, points: &[(f64, f64)], baseline_co2_per_km: f64) -> Self {
        let waypoints: Vec<Waypoint> = points
            .iter()
            .map(|&(lat, lon)| Waypoint::new(lat, lon))
            .collect();

        let mut cumulative_km = Vec::with_capacity(waypoints.len());
        let mut total = 0.0;
        for i in 0..waypoints.len() {
            if i > 0 {
                total += haversine_km(waypoints[i - 1], waypoints[i]);
            }
            cumulative_km.push(total);
        }

        Self {
            route_id: route_id.to_string(),
            baseline_co2_per_km,
            waypoints,
            cumulative_km,
        }
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    /// Total corridor length along the polyline, km.
    pub fn length_km(&self) -> f64 {
        self.cumulative_km.last().copied().unwrap_or(0.0)
    }

    /// Projects a position onto the nearest polyline segment.
    ///
    /// Projection is segment-to-point, not nearest-waypoint, so a truck
    /// midway along a long sparse segment does not read as kilometres
    /// off route.
    pub fn nearest_point(&self, position: Waypoint) -> NearestPoint {
        if self.waypoints.len() < 2 {
            let offset_km = self
                .waypoints
                .first()
                .map(|&wp| haversine_km(position, wp))
                .unwrap_or(f64::INFINITY);
            return NearestPoint {
                segment: 0,
                fraction: 0.0,
                offset_km,
                traveled_km: 0.0,
            };
        }

        // Local equirectangular plane around the position; good to well
        // under 1% at corridor-segment scale, and the final offset is
        // re-measured with Haversine anyway.
        let cos_lat = position.latitude.to_radians().cos();
        let project = |wp: Waypoint| -> (f64, f64) {
            let x = (wp.longitude - position.longitude).to_radians() * cos_lat * EARTH_RADIUS_KM;
            let y = (wp.latitude - position.latitude).to_radians() * EARTH_RADIUS_KM;
            (x, y)
        };

        let mut best = NearestPoint {
            segment: 0,
            fraction: 0.0,
            offset_km: f64::INFINITY,
            traveled_km: 0.0,
        };

        for (i, pair) in self.waypoints.windows(2).enumerate() {
            let (ax, ay) = project(pair[0]);
            let (bx, by) = project(pair[1]);
            let dx = bx - ax;
            let dy = by - ay;
            let len2 = dx * dx + dy * dy;

            // The position sits at the plane origin, so the projection
            // parameter is -(a . d) / |d|^2.
            let fraction = if len2 <= f64::EPSILON {
                0.0
            } else {
                (-(ax * dx + ay * dy) / len2).clamp(0.0, 1.0)
            };

            let nearest = Waypoint::new(
                pair[0].latitude + fraction * (pair[1].latitude - pair[0].latitude),
                pair[0].longitude + fraction * (pair[1].longitude - pair[0].longitude),
            );
            let offset_km = haversine_km(position, nearest);

            if offset_km < best.offset_km {
                let seg_km = self.cumulative_km[i + 1] - self.cumulative_km[i];
                best = NearestPoint {
                    segment: i,
                    fraction,
                    offset_km,
                    traveled_km: self.cumulative_km[i] + fraction * seg_km,
                };
            }
        }

        best
    }

    /// Offset from the corridor, km.
    pub fn deviation_km(&self, position: Waypoint) -> f64 {
        self.nearest_point(position).offset_km
    }

    /// Corridor distance still ahead of the given position, km.
    pub fn remaining_km(&self, position: Waypoint) -> f64 {
        (self.length_km() - self.nearest_point(position).traveled_km).max(0.0)
    }

    /// Position at the given corridor distance, clamped to the ends.
    pub fn point_at_km(&self, km: f64) -> Waypoint {
        if self.waypoints.is_empty() {
            return Waypoint::new(0.0, 0.0);
        }
        if self.waypoints.len() == 1 || km <= 0.0 {
            return self.waypoints[0];
        }
        let length = self.length_km();
        if km >= length {
            return self.waypoints[self.waypoints.len() - 1];
        }

        for i in 1..self.cumulative_km.len() {
            if km <= self.cumulative_km[i] {
                let seg_km = self.cumulative_km[i] - self.cumulative_km[i - 1];
                let fraction = if seg_km <= f64::EPSILON {
                    0.0
                } else {
                    (km - self.cumulative_km[i - 1]) / seg_km
                };
                let a = self.waypoints[i - 1];
                let b = self.waypoints[i];
                return Waypoint::new(
                    a.latitude + fraction * (b.latitude - a.latitude),
                    a.longitude + fraction * (b.longitude - a.longitude),
                );
            }
        }

        self.waypoints[self.waypoints.len() - 1]
    }
}

/// All known corridors, keyed by route id. Built once at startup.
#[derive(Debug, Clone, Default)]
pub struct CorridorTable {
    corridors: HashMap<String, Corridor>,
}

impl CorridorTable {
    /// The three national-highway corridors the fleet runs today.
    pub fn builtin() -> Self {
        let mut table = Self::default();
        table.insert(Corridor::new(
            "delhi_mumbai",
            &[
                (28.6139, 77.2090),
                (27.4924, 77.6737),
                (27.1767, 78.0081),
                (26.2183, 78.1828),
                (23.2599, 77.4126),
                (22.7196, 76.1320),
                (22.3072, 73.1812),
                (19.0760, 72.8777),
            ],
            1.32,
        ));
        table.insert(Corridor::new(
            "chennai_bangalore",
            &[
                (13.0827, 80.2707),
                (12.9165, 79.1325),
                (12.5186, 78.2137),
                (12.9716, 77.5946),
            ],
            1.28,
        ));
        table.insert(Corridor::new(
            "kolkata_patna",
            &[
                (22.5726, 88.3639),
                (23.6889, 86.9661),
                (24.7914, 84.9994),
                (25.5941, 85.1376),
            ],
            1.35,
        ));
        table
    }

    pub fn insert(&mut self, corridor: Corridor) {
        self.corridors.insert(corridor.route_id.clone(), corridor);
    }

    pub fn get(&self, route_id: &str) -> Option<&Corridor> {
        self.corridors.get(route_id)
    }

    pub fn contains(&self, route_id: &str) -> bool {
        self.corridors.contains_key(route_id)
    }

    pub fn len(&self) -> usize {
        self.corridors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corridors.is_empty()
    }

    pub fn route_ids(&self) -> impl Iterator<Item = &str> {
        self.corridors.keys().map(String::as_str)
    }
}
