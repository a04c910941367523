// Copyright (c) 2026 RoutePulse Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/routepulse/routepulse-rs

//! Telemetry sources: fleet simulator for demo mode and JSONL replay

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rand_distr::Normal;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::TelemetryEvent;
use crate::config::SimulatorConfig;
use crate::routes::{Corridor, CorridorTable};

/// Anything that yields telemetry events in per-vehicle timestamp order.
/// Returning `None` ends the pipeline.
#[async_trait]
pub trait TelemetrySource: Send {
    async fn next_event(&mut self) -> Option<TelemetryEvent>;
}

/// vehicle_id, route_id, load_kg, capacity_kg, cold chain, cruise km/h.
/// TRK-DL-003 runs over its rated capacity on purpose.
const ROSTER: [(&str, &str, f64, f64, bool, f64); 10] = [
    ("TRK-DL-001", "delhi_mumbai", 18_500.0, 25_000.0, false, 72.0),
    ("TRK-DL-002", "delhi_mumbai", 14_200.0, 25_000.0, true, 68.0),
    ("TRK-DL-003", "delhi_mumbai", 28_000.0, 26_500.0, false, 64.0),
    ("TRK-DL-004", "delhi_mumbai", 9_800.0, 16_000.0, false, 78.0),
    ("TRK-CH-001", "chennai_bangalore", 11_000.0, 16_000.0, false, 70.0),
    ("TRK-CH-002", "chennai_bangalore", 12_500.0, 18_000.0, true, 66.0),
    ("TRK-CH-003", "chennai_bangalore", 15_800.0, 25_000.0, false, 74.0),
    ("TRK-KL-001", "kolkata_patna", 13_600.0, 18_000.0, true, 62.0),
    ("TRK-KL-002", "kolkata_patna", 21_000.0, 25_000.0, false, 70.0),
    ("TRK-KL-003", "kolkata_patna", 7_400.0, 12_000.0, false, 76.0),
];

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Cruising,
    /// High speed plus detour distance, enough to trip the spike check.
    Spiking,
    /// Position wanders off the corridor polyline.
    Drifting,
    /// Reefer temperature climbs past the cold-chain limit.
    WarmUp,
}

struct TruckState {
    vehicle_id: String,
    route_id: String,
    load_kg: f64,
    capacity_kg: f64,
    is_cold_chain: bool,
    cruise_kmph: f64,
    progress_km: f64,
    outbound: bool,
    phase: Phase,
    phase_left: u8,
    cargo_temp_c: f64,
}

/// Simulates a small freight fleet moving along the built-in corridors.
///
/// Every truck emits one event per tick interval; anomaly phases are
/// injected at random so every detector fires during a demo run. A
/// fixed seed makes the generated stream reproducible.
pub struct FleetSimulator {
    ticker: Interval,
    rng: ChaCha8Rng,
    corridors: Arc<CorridorTable>,
    trucks: Vec<TruckState>,
    cursor: usize,
    dt_hours: f64,
    anomaly_probability: f64,
}

impl FleetSimulator {
    pub fn new(config: &SimulatorConfig, corridors: Arc<CorridorTable>) -> Self {
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let period = Duration::from_millis(config.interval_ms.max(1));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let trucks: Vec<TruckState> = ROSTER
            .iter()
            .enumerate()
            .filter_map(|(i, &(vehicle_id, route_id, load_kg, capacity_kg, cold, cruise_kmph))| {
                let Some(corridor) = corridors.get(route_id) else {
                    warn!("roster truck {vehicle_id} references unknown corridor {route_id}");
                    return None;
                };
                // spread the fleet out along its corridor
                let progress_km = corridor.length_km() * ((i as f64 * 0.173) % 0.9);
                Some(TruckState {
                    vehicle_id: vehicle_id.to_string(),
                    route_id: route_id.to_string(),
                    load_kg,
                    capacity_kg,
                    is_cold_chain: cold,
                    cruise_kmph,
                    progress_km,
                    outbound: true,
                    phase: Phase::Cruising,
                    phase_left: 0,
                    cargo_temp_c: -18.5,
                })
            })
            .collect();

        info!(
            "fleet simulator ready: {} trucks, {}ms tick",
            trucks.len(),
            period.as_millis()
        );
        Self {
            ticker,
            rng,
            corridors,
            trucks,
            cursor: 0,
            dt_hours: period.as_millis() as f64 / 3_600_000.0,
            anomaly_probability: config.anomaly_probability.clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
impl TelemetrySource for FleetSimulator {
    async fn next_event(&mut self) -> Option<TelemetryEvent> {
        if self.trucks.is_empty() {
            return None;
        }
        // one tick per full roster round
        if self.cursor == 0 {
            self.ticker.tick().await;
        }
        let index = self.cursor;
        self.cursor = (self.cursor + 1) % self.trucks.len();

        let corridors = Arc::clone(&self.corridors);
        let dt_hours = self.dt_hours;
        let anomaly_probability = self.anomaly_probability;
        let truck = &mut self.trucks[index];
        let corridor = corridors.get(&truck.route_id)?;
        Some(advance_truck(
            &mut self.rng,
            truck,
            corridor,
            dt_hours,
            anomaly_probability,
        ))
    }
}

fn advance_truck(
    rng: &mut ChaCha8Rng,
    truck: &mut TruckState,
    corridor: &Corridor,
    dt_hours: f64,
    anomaly_probability: f64,
) -> TelemetryEvent {
    if truck.phase == Phase::Cruising && rng.gen::<f64>() < anomaly_probability {
        truck.phase = if truck.is_cold_chain && rng.gen_bool(0.4) {
            Phase::WarmUp
        } else if rng.gen_bool(0.5) {
            Phase::Spiking
        } else {
            Phase::Drifting
        };
        truck.phase_left = rng.gen_range(3..8);
        debug!("{} entering {:?} phase", truck.vehicle_id, truck.phase);
    }

    let speed_kmph = match truck.phase {
        Phase::Spiking => rng.gen_range(95.0..115.0),
        _ => {
            let noise = rng.sample::<f64, _>(Normal::new(0.0, 4.0).unwrap());
            (truck.cruise_kmph + noise).clamp(20.0, 120.0)
        }
    };
    let mut distance_km = speed_kmph * dt_hours;
    if truck.phase == Phase::Spiking {
        // detour burns extra distance at high speed
        distance_km *= rng.gen_range(1.8..3.0);
    }

    // ping-pong along the corridor
    if truck.outbound {
        truck.progress_km += distance_km;
        if truck.progress_km >= corridor.length_km() {
            truck.progress_km = corridor.length_km();
            truck.outbound = false;
        }
    } else {
        truck.progress_km -= distance_km;
        if truck.progress_km <= 0.0 {
            truck.progress_km = 0.0;
            truck.outbound = true;
        }
    }

    let on_route = corridor.point_at_km(truck.progress_km);
    let longitude = on_route.longitude + rng.gen_range(-0.002..0.002);
    let mut latitude = on_route.latitude + rng.gen_range(-0.002..0.002);
    if truck.phase == Phase::Drifting {
        // 0.02 degrees of latitude is a bit over 2 km
        let side = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        latitude += side * rng.gen_range(0.02..0.05);
    }

    let cargo_temp_c = if truck.is_cold_chain {
        truck.cargo_temp_c = match truck.phase {
            Phase::WarmUp => (truck.cargo_temp_c + rng.gen_range(0.8..1.6)).min(-11.0),
            _ => rng.sample::<f64, _>(Normal::new(-18.5, 0.4).unwrap()),
        };
        Some(truck.cargo_temp_c)
    } else {
        None
    };

    if truck.phase_left > 0 {
        truck.phase_left -= 1;
        if truck.phase_left == 0 {
            truck.phase = Phase::Cruising;
        }
    }

    TelemetryEvent {
        vehicle_id: truck.vehicle_id.clone(),
        route_id: truck.route_id.clone(),
        timestamp: Utc::now(),
        latitude,
        longitude,
        speed_kmph,
        distance_km,
        load_kg: truck.load_kg,
        capacity_kg: truck.capacity_kg,
        is_cold_chain: truck.is_cold_chain,
        cargo_temp_c,
    }
}

/// Replays recorded telemetry from a JSONL file, one event per line.
/// Malformed lines are logged and skipped rather than ending the run.
pub struct JsonlSource {
    lines: Lines<BufReader<File>>,
    path: PathBuf,
    skipped: u64,
}

impl JsonlSource {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .await
            .with_context(|| format!("opening telemetry replay {}", path.display()))?;
        info!("replaying telemetry from {}", path.display());
        Ok(Self {
            lines: BufReader::new(file).lines(),
            path,
            skipped: 0,
        })
    }
}

#[async_trait]
impl TelemetrySource for JsonlSource {
    async fn next_event(&mut self) -> Option<TelemetryEvent> {
        loop {
            match self.lines.next_line().await {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<TelemetryEvent>(trimmed) {
                        Ok(event) => return Some(event),
                        Err(err) => {
                            self.skipped += 1;
                            warn!(
                                "skipping malformed line in {}: {err}",
                                self.path.display()
                            );
                        }
                    }
                }
                Ok(None) => {
                    if self.skipped > 0 {
                        info!(
                            "replay of {} finished, {} malformed lines skipped",
                            self.path.display(),
                            self.skipped
                        );
                    }
                    return None;
                }
                Err(err) => {
                    warn!("read error on {}: {err}", self.path.display());
                    return None;
                }
            }
        }
    }
}
