//! Per-vehicle window aggregation
//!
//! A tumbling window accumulates per-event CO2, distance, fuel and
//! speed totals and closes on epoch-aligned boundaries. A sliding span
//! keeps the last few closed totals as a ring; its mean is the trailing
//! baseline the anomaly detector compares fresh windows against.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::co2::{fuel_equivalent_liters, round3};
use crate::routes::Waypoint;
use crate::telemetry::TelemetryEvent;

/// Finalized totals for one closed tumbling window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowTotals {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub co2_kg: f64,
    pub distance_km: f64,
    pub fuel_liters: f64,
    pub event_count: u32,
    pub avg_speed_kmph: f64,
}

/// A closed window paired with the trailing baseline it should be
/// judged against: the mean CO2 of the prior closed windows still
/// inside the sliding span. `None` when no prior history exists.
#[derive(Debug, Clone)]
pub struct ClosedWindow {
    pub totals: WindowTotals,
    pub baseline_co2_kg: Option<f64>,
}

/// What applying one event did to the vehicle's windows.
#[derive(Debug)]
pub enum ApplyOutcome {
    /// Folded into the open window.
    Accumulated,
    /// The event crossed a boundary: the open window closed and the
    /// event seeded the window for its own aligned slot.
    Closed(ClosedWindow),
    /// Timestamp behind the open window start. Dropped and counted,
    /// never merged into a closed window.
    LateDropped,
}

/// All mutable pipeline state for one vehicle. Owned by exactly one
/// worker; nothing here is shared.
#[derive(Debug)]
pub struct VehicleWindowState {
    vehicle_id: String,
    route_id: String,
    tumbling: Duration,
    sliding: Duration,
    /// Historical corridor average, kg CO2 per km, for savings accounting.
    baseline_co2_per_km: f64,

    window_start: Option<DateTime<Utc>>,
    co2_kg: f64,
    distance_km: f64,
    fuel_liters: f64,
    speed_sum: f64,
    event_count: u32,

    /// Closed totals inside the sliding span, oldest first. Pruned on
    /// every close, so the ring never exceeds sliding/tumbling entries.
    closed: VecDeque<WindowTotals>,

    last_position: Option<Waypoint>,
    last_event_at: Option<DateTime<Utc>>,
    co2_saved_kg: f64,
    late_drops: u64,
}

impl VehicleWindowState {
    pub fn new(
        vehicle_id: &str,
        route_id: &str,
        tumbling_secs: u64,
        sliding_secs: u64,
        baseline_co2_per_km: f64,
    ) -> Self {
        Self {
            vehicle_id: vehicle_id.to_string(),
            route_id: route_id.to_string(),
            tumbling: Duration::seconds(tumbling_secs.max(1) as i64),
            sliding: Duration::seconds(sliding_secs.max(1) as i64),
            baseline_co2_per_km,
            window_start: None,
            co2_kg: 0.0,
            distance_km: 0.0,
            fuel_liters: 0.0,
            speed_sum: 0.0,
            event_count: 0,
            closed: VecDeque::new(),
            last_position: None,
            last_event_at: None,
            co2_saved_kg: 0.0,
            late_drops: 0,
        }
    }

    /// Applies one validated event with its precomputed CO2 estimate.
    ///
    /// Events must arrive in non-decreasing timestamp order for this
    /// vehicle; anything behind the open window start is late.
    pub fn apply(&mut self, event: &TelemetryEvent, co2_kg: f64) -> ApplyOutcome {
        let ts = event.timestamp;

        let start = match self.window_start {
            Some(start) => start,
            None => {
                let aligned = self.align(ts);
                self.window_start = Some(aligned);
                aligned
            }
        };

        if ts < start {
            self.late_drops += 1;
            return ApplyOutcome::LateDropped;
        }

        let outcome = if ts >= start + self.tumbling {
            let closed = self.close_open_window(start);
            let new_start = self.align(ts);
            self.window_start = Some(new_start);
            self.evict_aged(new_start);
            ApplyOutcome::Closed(closed)
        } else {
            ApplyOutcome::Accumulated
        };

        self.accumulate(event, co2_kg);
        outcome
    }

    fn accumulate(&mut self, event: &TelemetryEvent, co2_kg: f64) {
        self.co2_kg += co2_kg;
        self.distance_km += event.distance_km;
        self.fuel_liters += fuel_equivalent_liters(co2_kg);
        self.speed_sum += event.speed_kmph;
        self.event_count += 1;

        let saved = self.baseline_co2_per_km * event.distance_km - co2_kg;
        if saved > 0.0 {
            self.co2_saved_kg += saved;
        }

        if self.route_id != event.route_id {
            self.route_id = event.route_id.clone();
        }
        self.last_position = Some(Waypoint::new(event.latitude, event.longitude));
        self.last_event_at = Some(event.timestamp);
    }

    fn close_open_window(&mut self, start: DateTime<Utc>) -> ClosedWindow {
        let avg_speed = if self.event_count > 0 {
            round1(self.speed_sum / self.event_count as f64)
        } else {
            0.0
        };
        let totals = WindowTotals {
            window_start: start,
            window_end: start + self.tumbling,
            co2_kg: round3(self.co2_kg),
            distance_km: round3(self.distance_km),
            fuel_liters: round3(self.fuel_liters),
            event_count: self.event_count,
            avg_speed_kmph: avg_speed,
        };

        // Baseline before the push: the window under evaluation never
        // counts toward its own baseline.
        let baseline_co2_kg = self.sliding_baseline();

        self.closed.push_back(totals.clone());
        self.co2_kg = 0.0;
        self.distance_km = 0.0;
        self.fuel_liters = 0.0;
        self.speed_sum = 0.0;
        self.event_count = 0;

        ClosedWindow {
            totals,
            baseline_co2_kg,
        }
    }

    fn evict_aged(&mut self, open_start: DateTime<Utc>) {
        let cutoff = open_start - self.sliding;
        while let Some(front) = self.closed.front() {
            if front.window_start < cutoff {
                self.closed.pop_front();
            } else {
                break;
            }
        }
    }

    fn align(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let len = self.tumbling.num_seconds();
        let secs = ts.timestamp();
        let aligned = secs - secs.rem_euclid(len);
        DateTime::from_timestamp(aligned, 0).unwrap_or(ts)
    }

    /// Mean CO2 of the closed windows currently in the sliding span.
    pub fn sliding_baseline(&self) -> Option<f64> {
        if self.closed.is_empty() {
            return None;
        }
        let sum: f64 = self.closed.iter().map(|w| w.co2_kg).sum();
        Some(sum / self.closed.len() as f64)
    }

    pub fn vehicle_id(&self) -> &str {
        &self.vehicle_id
    }

    pub fn route_id(&self) -> &str {
        &self.route_id
    }

    pub fn open_window_start(&self) -> Option<DateTime<Utc>> {
        self.window_start
    }

    /// Most recent closed totals, if any window has closed yet.
    pub fn last_closed(&self) -> Option<&WindowTotals> {
        self.closed.back()
    }

    pub fn last_position(&self) -> Option<Waypoint> {
        self.last_position
    }

    pub fn last_event_at(&self) -> Option<DateTime<Utc>> {
        self.last_event_at
    }

    /// Cumulative CO2 saved against the corridor's historical baseline.
    pub fn co2_saved_kg(&self) -> f64 {
        self.co2_saved_kg
    }

    pub fn late_drops(&self) -> u64 {
        self.late_drops
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
