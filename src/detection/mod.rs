//! Anomaly detection - level-triggered alert predicates
//!
//! Predicates are pure functions of current state, re-evaluated on
//! every check. The core never de-duplicates: a consumer that wants
//! edge-triggered started/cleared semantics diffs consecutive
//! evaluations itself.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::analysis::ClosedWindow;
use crate::config::AlertConfig;
use crate::telemetry::TelemetryEvent;

/// Alert kinds in the operator-facing wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    HighEmissionAlert,
    ColdChainBreach,
    Overload,
    RouteDeviation,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::HighEmissionAlert => "HIGH_EMISSION_ALERT",
            Self::ColdChainBreach => "COLD_CHAIN_BREACH",
            Self::Overload => "OVERLOAD",
            Self::RouteDeviation => "ROUTE_DEVIATION",
        };
        f.write_str(name)
    }
}

/// An immutable alert fact. Alerts are derived, never mutated; each
/// evaluation that finds a predicate true emits a fresh one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub vehicle_id: String,
    pub kind: AlertKind,
    pub detected_at: DateTime<Utc>,
    pub detail: String,
}

impl Alert {
    pub fn new(
        vehicle_id: &str,
        kind: AlertKind,
        detected_at: DateTime<Utc>,
        detail: String,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            vehicle_id: vehicle_id.to_string(),
            kind,
            detected_at,
            detail,
        }
    }
}

/// Outcome of the emission-spike predicate for one closed window.
#[derive(Debug)]
pub enum SpikeCheck {
    Fired(Alert),
    Normal,
    /// No prior closed windows to compare against. The check is
    /// skipped, which is not a false negative.
    InsufficientBaseline,
}

/// Evaluates the alert predicates. Stateless apart from thresholds;
/// safe to keep one per vehicle worker.
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    spike_multiplier: f64,
    cold_chain_sla_c: f64,
    cold_chain_tolerance_c: f64,
}

impl AnomalyDetector {
    pub fn new(config: &AlertConfig) -> Self {
        Self {
            spike_multiplier: config.emission_spike_multiplier,
            cold_chain_sla_c: config.cold_chain_sla_c,
            cold_chain_tolerance_c: config.cold_chain_tolerance_c,
        }
    }

    /// Emission spike: the closed window total strictly exceeds the
    /// multiplier times the trailing baseline. Exactly at the boundary
    /// does not fire.
    pub fn check_emission_spike(&self, vehicle_id: &str, closed: &ClosedWindow) -> SpikeCheck {
        let baseline = match closed.baseline_co2_kg {
            Some(baseline) => baseline,
            None => return SpikeCheck::InsufficientBaseline,
        };

        let current = closed.totals.co2_kg;
        if current > self.spike_multiplier * baseline {
            let detail = format!(
                "window CO2 {current:.3} kg exceeds {:.1}x trailing baseline {baseline:.3} kg",
                self.spike_multiplier
            );
            SpikeCheck::Fired(Alert::new(
                vehicle_id,
                AlertKind::HighEmissionAlert,
                closed.totals.window_end,
                detail,
            ))
        } else {
            SpikeCheck::Normal
        }
    }

    /// Cold-chain SLA: fires strictly above sla + tolerance. A probe
    /// dropout (no reading on a cold-chain vehicle) skips the check.
    pub fn check_cold_chain(&self, event: &TelemetryEvent) -> Option<Alert> {
        if !event.is_cold_chain {
            return None;
        }
        let temp = event.cargo_temp_c?;
        let limit = self.cold_chain_sla_c + self.cold_chain_tolerance_c;
        if temp > limit {
            let detail = format!(
                "cargo at {temp:.1} C against {:.1} C SLA ({:.1} C tolerance)",
                self.cold_chain_sla_c, self.cold_chain_tolerance_c
            );
            Some(Alert::new(
                &event.vehicle_id,
                AlertKind::ColdChainBreach,
                event.timestamp,
                detail,
            ))
        } else {
            None
        }
    }

    /// Overload is surfaced continuously while the signed percentage
    /// is positive, not as a one-shot edge.
    pub fn check_overload(&self, event: &TelemetryEvent) -> Option<Alert> {
        let pct = overload_pct(event.load_kg, event.capacity_kg);
        if pct > 0.0 {
            let detail = format!(
                "load {:.0} kg is {pct:.2}% over rated capacity {:.0} kg",
                event.load_kg, event.capacity_kg
            );
            Some(Alert::new(
                &event.vehicle_id,
                AlertKind::Overload,
                event.timestamp,
                detail,
            ))
        } else {
            None
        }
    }

    /// Builds the deviation alert once the route checker has measured
    /// an offset past the threshold.
    pub fn route_deviation(
        &self,
        vehicle_id: &str,
        at: DateTime<Utc>,
        offset_km: f64,
    ) -> Alert {
        Alert::new(
            vehicle_id,
            AlertKind::RouteDeviation,
            at,
            format!("{offset_km:.2} km off assigned corridor"),
        )
    }
}

/// Signed percentage over (positive) or under (negative) rated
/// capacity. The raw signed value is always reported; only positive
/// values alert.
pub fn overload_pct(load_kg: f64, capacity_kg: f64) -> f64 {
    (load_kg - capacity_kg) / capacity_kg.max(1.0) * 100.0
}

/// Bounded in-memory ring of recent alerts for operator tooling.
#[derive(Debug)]
pub struct AlertLog {
    recent: Mutex<VecDeque<Alert>>,
    capacity: usize,
}

impl AlertLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            recent: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, alert: Alert) {
        let mut recent = self.recent.lock();
        if recent.len() == self.capacity {
            recent.pop_front();
        }
        recent.push_back(alert);
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<Alert> {
        let recent = self.recent.lock();
        recent.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.recent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.lock().is_empty()
    }
}
