//! Pipeline orchestration - ingest loop and per-vehicle workers
//!
//! The pipeline is partitioned by vehicle: one task owns one vehicle's
//! window state, fed through a bounded queue that preserves per-vehicle
//! event order. No state is shared between workers; corridor geometry
//! and thresholds are read-only.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{EventBus, PipelineStats};
use crate::analysis::co2;
use crate::analysis::{
    estimate_co2_kg, eta_seconds, smoothed_speed, ApplyOutcome, ClosedWindow, VehicleWindowState,
};
use crate::config::Config;
use crate::detection::{overload_pct, Alert, AlertLog, AnomalyDetector, SpikeCheck};
use crate::routes::{CorridorTable, DeviationStatus, Waypoint};
use crate::streaming::{FleetSnapshot, VehicleStatus};
use crate::telemetry::{TelemetryError, TelemetryEvent, TelemetrySource};

/// Read-only context shared by the ingest loop and every worker.
#[derive(Clone)]
struct WorkerContext {
    config: Arc<Config>,
    corridors: Arc<CorridorTable>,
    bus: Arc<EventBus>,
    stats: Arc<PipelineStats>,
    alert_log: Arc<AlertLog>,
}

struct WorkerHandle {
    tx: mpsc::Sender<TelemetryEvent>,
    join: JoinHandle<()>,
}

/// Validates inbound telemetry, fans it out to one worker per vehicle,
/// and joins the workers on shutdown.
pub struct PipelineEngine {
    ctx: WorkerContext,
}

impl PipelineEngine {
    pub fn new(
        config: Arc<Config>,
        corridors: Arc<CorridorTable>,
        bus: Arc<EventBus>,
        stats: Arc<PipelineStats>,
        alert_log: Arc<AlertLog>,
    ) -> Self {
        Self {
            ctx: WorkerContext {
                config,
                corridors,
                bus,
                stats,
                alert_log,
            },
        }
    }

    /// Runs until the source is exhausted or shutdown is signalled,
    /// then drains and joins every vehicle worker.
    pub async fn run(
        &self,
        mut source: Box<dyn TelemetrySource>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        info!(
            "pipeline engine starting, {} corridors loaded",
            self.ctx.corridors.len()
        );
        let mut workers: HashMap<String, WorkerHandle> = HashMap::new();

        loop {
            tokio::select! {
                maybe = source.next_event() => {
                    match maybe {
                        Some(event) => self.dispatch(event, &mut workers).await,
                        None => {
                            info!("telemetry source exhausted");
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("pipeline engine shutting down...");
                    break;
                }
            }
        }

        // Dropping each sender lets its worker drain the queue and exit.
        let joins: Vec<JoinHandle<()>> = workers
            .into_values()
            .map(|handle| {
                drop(handle.tx);
                handle.join
            })
            .collect();
        join_all(joins).await;
        info!("all vehicle workers stopped");
        Ok(())
    }

    async fn dispatch(&self, event: TelemetryEvent, workers: &mut HashMap<String, WorkerHandle>) {
        if let Err(err) = event.validate() {
            self.ctx.stats.record_rejected();
            warn!(
                "rejected event from {} at {}: {err}",
                event.vehicle_id, event.timestamp
            );
            return;
        }
        if !self.ctx.corridors.contains(&event.route_id) {
            self.ctx.stats.record_rejected();
            let err = TelemetryError::UnknownRoute(event.route_id.clone());
            warn!(
                "rejected event from {} at {}: {err}",
                event.vehicle_id, event.timestamp
            );
            return;
        }

        self.ctx.stats.record_ingested();
        self.ctx.bus.publish_event(event.clone());

        let vehicle_id = event.vehicle_id.clone();
        if let Some(handle) = workers.get(&vehicle_id) {
            match handle.tx.send(event).await {
                Ok(()) => {}
                Err(returned) => {
                    // worker evicted itself while idle; start fresh
                    debug!("worker for {vehicle_id} is gone, respawning");
                    workers.remove(&vehicle_id);
                    let event = returned.0;
                    let handle = self.spawn_worker(&vehicle_id, &event.route_id);
                    let _ = handle.tx.send(event).await;
                    workers.insert(vehicle_id, handle);
                }
            }
            return;
        }

        let handle = self.spawn_worker(&vehicle_id, &event.route_id);
        let _ = handle.tx.send(event).await;
        workers.insert(vehicle_id, handle);
    }

    fn spawn_worker(&self, vehicle_id: &str, route_id: &str) -> WorkerHandle {
        let depth = self.ctx.config.engine.worker_queue_depth.max(1);
        let (tx, rx) = mpsc::channel(depth);
        let ctx = self.ctx.clone();
        let vehicle = vehicle_id.to_string();
        let route = route_id.to_string();

        self.ctx.stats.record_worker_spawned();
        debug!("spawning worker for {vehicle} on {route}");
        let join = tokio::spawn(run_vehicle_worker(ctx, vehicle, route, rx));
        WorkerHandle { tx, join }
    }
}

async fn run_vehicle_worker(
    ctx: WorkerContext,
    vehicle_id: String,
    route_id: String,
    mut rx: mpsc::Receiver<TelemetryEvent>,
) {
    let baseline = ctx
        .corridors
        .get(&route_id)
        .map(|c| c.baseline_co2_per_km)
        .unwrap_or(0.0);
    let mut state = VehicleWindowState::new(
        &vehicle_id,
        &route_id,
        ctx.config.windows.tumbling_secs,
        ctx.config.windows.sliding_secs,
        baseline,
    );
    let detector = AnomalyDetector::new(&ctx.config.alerts);
    let idle = Duration::from_secs(ctx.config.engine.idle_evict_secs.max(1));

    loop {
        match timeout(idle, rx.recv()).await {
            Ok(Some(event)) => process_event(&ctx, &detector, &mut state, &event),
            Ok(None) => break,
            Err(_) => {
                info!(
                    "evicting idle vehicle {vehicle_id} after {}s without events",
                    idle.as_secs()
                );
                ctx.stats.record_worker_evicted();
                break;
            }
        }
    }

    if state.late_drops() > 0 {
        debug!(
            "{vehicle_id}: dropped {} late events this run",
            state.late_drops()
        );
    }
}

fn process_event(
    ctx: &WorkerContext,
    detector: &AnomalyDetector,
    state: &mut VehicleWindowState,
    event: &TelemetryEvent,
) {
    let co2_kg = estimate_co2_kg(
        event.distance_km,
        event.load_kg,
        event.capacity_kg,
        event.speed_kmph,
        event.is_cold_chain,
    );

    let closed = match state.apply(event, co2_kg) {
        ApplyOutcome::LateDropped => {
            ctx.stats.record_late_drop();
            debug!(
                "late event from {} at {} dropped",
                event.vehicle_id, event.timestamp
            );
            return;
        }
        ApplyOutcome::Accumulated => None,
        ApplyOutcome::Closed(closed) => Some(closed),
    };

    // cold-chain and overload are checked on every event
    if let Some(alert) = detector.check_cold_chain(event) {
        emit_alert(ctx, alert);
    }
    if let Some(alert) = detector.check_overload(event) {
        emit_alert(ctx, alert);
    }

    let deviation = check_deviation(ctx, event);
    if let DeviationStatus::Deviated { offset_km } = deviation {
        emit_alert(
            ctx,
            detector.route_deviation(&event.vehicle_id, event.timestamp, offset_km),
        );
    }

    if let Some(closed) = closed {
        ctx.stats.record_window_closed();
        let status = match detector.check_emission_spike(&event.vehicle_id, &closed) {
            SpikeCheck::Fired(alert) => {
                emit_alert(ctx, alert);
                VehicleStatus::HighEmissionAlert
            }
            SpikeCheck::Normal => VehicleStatus::Normal,
            SpikeCheck::InsufficientBaseline => {
                ctx.stats.record_spike_check_skipped();
                VehicleStatus::Normal
            }
        };
        publish_snapshot(ctx, state, event, &closed, status, deviation);
    }
}

fn check_deviation(ctx: &WorkerContext, event: &TelemetryEvent) -> DeviationStatus {
    let position = Waypoint::new(event.latitude, event.longitude);
    match ctx.corridors.get(&event.route_id) {
        Some(corridor) => DeviationStatus::from_offset(
            corridor.deviation_km(position),
            ctx.config.routes.deviation_threshold_km,
        ),
        None => DeviationStatus::OnRoute,
    }
}

fn publish_snapshot(
    ctx: &WorkerContext,
    state: &VehicleWindowState,
    event: &TelemetryEvent,
    closed: &ClosedWindow,
    status: VehicleStatus,
    deviation: DeviationStatus,
) {
    let position = Waypoint::new(event.latitude, event.longitude);
    let eta = ctx.corridors.get(&event.route_id).and_then(|corridor| {
        let speed = smoothed_speed(state.last_closed(), event.speed_kmph);
        eta_seconds(corridor.remaining_km(position), speed)
    });
    let overload = overload_pct(event.load_kg, event.capacity_kg);

    let snapshot = FleetSnapshot {
        vehicle_id: event.vehicle_id.clone(),
        route_id: event.route_id.clone(),
        timestamp: closed.totals.window_end,
        latitude: event.latitude,
        longitude: event.longitude,
        co2_kg: closed.totals.co2_kg,
        co2_saved_kg: co2::round3(state.co2_saved_kg()),
        status,
        deviation_status: deviation.to_string(),
        speed_kmph: closed.totals.avg_speed_kmph,
        fuel_consumed_liters: closed.totals.fuel_liters,
        overload_pct: (overload * 100.0).round() / 100.0,
        eta_seconds: eta,
    };
    ctx.bus.publish_snapshot(snapshot);
}

fn emit_alert(ctx: &WorkerContext, alert: Alert) {
    ctx.stats.record_alert(alert.kind);
    ctx.alert_log.record(alert.clone());
    ctx.bus.publish_alert(alert);
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::collections::VecDeque;

    struct VecSource {
        events: VecDeque<TelemetryEvent>,
    }

    #[async_trait]
    impl TelemetrySource for VecSource {
        async fn next_event(&mut self) -> Option<TelemetryEvent> {
            self.events.pop_front()
        }
    }

    /// Replays one event, stalls, then replays the second.
    struct StallSource {
        first: Option<TelemetryEvent>,
        second: Option<TelemetryEvent>,
        stall: Duration,
    }

    #[async_trait]
    impl TelemetrySource for StallSource {
        async fn next_event(&mut self) -> Option<TelemetryEvent> {
            if let Some(event) = self.first.take() {
                return Some(event);
            }
            if let Some(event) = self.second.take() {
                tokio::time::sleep(self.stall).await;
                return Some(event);
            }
            None
        }
    }

    fn event(vehicle_id: &str, secs: i64, distance_km: f64) -> TelemetryEvent {
        TelemetryEvent {
            vehicle_id: vehicle_id.to_string(),
            route_id: "delhi_mumbai".to_string(),
            timestamp: DateTime::from_timestamp(secs, 0).unwrap(),
            // second waypoint of the corridor, exactly on route
            latitude: 27.4924,
            longitude: 77.6737,
            speed_kmph: 70.0,
            distance_km,
            load_kg: 25000.0,
            capacity_kg: 25000.0,
            is_cold_chain: false,
            cargo_temp_c: None,
        }
    }

    struct Harness {
        engine: PipelineEngine,
        bus: Arc<EventBus>,
        stats: Arc<PipelineStats>,
        alert_log: Arc<AlertLog>,
        shutdown_tx: broadcast::Sender<()>,
    }

    fn harness(config: Config) -> Harness {
        let config = Arc::new(config);
        let corridors = Arc::new(CorridorTable::builtin());
        let bus = Arc::new(EventBus::new(1024));
        let stats = Arc::new(PipelineStats::default());
        let alert_log = Arc::new(AlertLog::new(128));
        let (shutdown_tx, _) = broadcast::channel(1);
        let engine = PipelineEngine::new(
            config,
            corridors,
            bus.clone(),
            stats.clone(),
            alert_log.clone(),
        );
        Harness {
            engine,
            bus,
            stats,
            alert_log,
            shutdown_tx,
        }
    }

    #[tokio::test]
    async fn window_close_publishes_snapshot() {
        let h = harness(Config::default());
        let mut snapshots = h.bus.subscribe_snapshots();

        let source = VecSource {
            events: VecDeque::from(vec![
                event("TRK-DL-001", 910, 10.0),
                event("TRK-DL-001", 1000, 10.0),
                event("TRK-DL-001", 1200, 1.0),
            ]),
        };
        h.engine
            .run(Box::new(source), h.shutdown_tx.subscribe())
            .await
            .unwrap();

        let snap = snapshots.recv().await.unwrap();
        assert_eq!(snap.vehicle_id, "TRK-DL-001");
        assert_eq!(snap.timestamp, DateTime::from_timestamp(1200, 0).unwrap());
        // two events of 10 km at full load and 70 km/h
        assert!((snap.co2_kg - 24.92).abs() < 1e-9, "got {}", snap.co2_kg);
        assert_eq!(snap.status, VehicleStatus::Normal);
        assert_eq!(snap.deviation_status, "OK");
        assert!((snap.speed_kmph - 70.0).abs() < 1e-9);
        assert!(snap.eta_seconds.unwrap() > 3600);

        let stats = h.stats.snapshot();
        assert_eq!(stats.events_ingested, 3);
        assert_eq!(stats.workers_spawned, 1);
        assert_eq!(stats.windows_closed, 1);
        assert_eq!(stats.spike_checks_skipped, 1);
    }

    #[tokio::test]
    async fn malformed_and_unknown_route_events_rejected() {
        let h = harness(Config::default());
        let mut accepted = h.bus.subscribe_events();

        let mut bad_capacity = event("TRK-DL-001", 910, 1.0);
        bad_capacity.capacity_kg = 0.0;
        let mut bad_route = event("TRK-DL-001", 920, 1.0);
        bad_route.route_id = "mumbai_pune".to_string();

        let source = VecSource {
            events: VecDeque::from(vec![
                bad_capacity,
                bad_route,
                event("TRK-DL-001", 930, 1.0),
            ]),
        };
        h.engine
            .run(Box::new(source), h.shutdown_tx.subscribe())
            .await
            .unwrap();

        let stats = h.stats.snapshot();
        assert_eq!(stats.events_rejected, 2);
        assert_eq!(stats.events_ingested, 1);

        let only = accepted.recv().await.unwrap();
        assert_eq!(only.timestamp, DateTime::from_timestamp(930, 0).unwrap());
        assert!(accepted.try_recv().is_err());
    }

    #[tokio::test]
    async fn late_events_counted_not_merged() {
        let h = harness(Config::default());
        let mut snapshots = h.bus.subscribe_snapshots();

        let source = VecSource {
            events: VecDeque::from(vec![
                event("TRK-DL-001", 910, 10.0),
                event("TRK-DL-001", 1200, 1.0),
                // behind the window that is now open at 1200
                event("TRK-DL-001", 1000, 500.0),
            ]),
        };
        h.engine
            .run(Box::new(source), h.shutdown_tx.subscribe())
            .await
            .unwrap();

        assert_eq!(h.stats.snapshot().late_drops, 1);
        let snap = snapshots.recv().await.unwrap();
        assert!((snap.co2_kg - 12.46).abs() < 1e-9);
    }

    #[tokio::test]
    async fn spike_fires_against_trailing_baseline() {
        let h = harness(Config::default());
        let mut snapshots = h.bus.subscribe_snapshots();

        let mut events = VecDeque::new();
        // quiet first window
        let mut quiet = event("TRK-DL-001", 910, 1.0);
        quiet.load_kg = 0.0;
        events.push_back(quiet);
        // heavy second window
        let mut heavy = event("TRK-DL-001", 1200, 50.0);
        heavy.load_kg = 0.0;
        events.push_back(heavy);
        // closes the heavy window
        let mut closer = event("TRK-DL-001", 1500, 0.0);
        closer.load_kg = 0.0;
        events.push_back(closer);

        let source = VecSource { events };
        h.engine
            .run(Box::new(source), h.shutdown_tx.subscribe())
            .await
            .unwrap();

        let first = snapshots.recv().await.unwrap();
        assert_eq!(first.status, VehicleStatus::Normal);
        let second = snapshots.recv().await.unwrap();
        assert_eq!(second.status, VehicleStatus::HighEmissionAlert);

        let stats = h.stats.snapshot();
        assert_eq!(stats.alerts_high_emission, 1);
        assert_eq!(stats.spike_checks_skipped, 1);
        assert_eq!(h.alert_log.recent(10).len(), 1);
    }

    #[tokio::test]
    async fn deviation_alerts_are_level_triggered() {
        let h = harness(Config::default());
        let mut snapshots = h.bus.subscribe_snapshots();

        let mut off_route_a = event("TRK-DL-001", 910, 1.0);
        off_route_a.latitude = 25.0;
        off_route_a.longitude = 80.0;
        let mut off_route_b = event("TRK-DL-001", 1200, 1.0);
        off_route_b.latitude = 25.0;
        off_route_b.longitude = 80.0;

        let source = VecSource {
            events: VecDeque::from(vec![off_route_a, off_route_b]),
        };
        h.engine
            .run(Box::new(source), h.shutdown_tx.subscribe())
            .await
            .unwrap();

        // one alert per evaluated event, no de-duplication
        assert_eq!(h.stats.snapshot().alerts_route_deviation, 2);
        let snap = snapshots.recv().await.unwrap();
        assert!(snap.deviation_status.starts_with("ROUTE_DEVIATION:"));
    }

    #[tokio::test]
    async fn cold_chain_and_overload_checked_every_event() {
        let h = harness(Config::default());

        let mut first = event("TRK-DL-003", 910, 1.0);
        first.is_cold_chain = true;
        first.cargo_temp_c = Some(-10.0);
        first.load_kg = 28000.0;
        first.capacity_kg = 26500.0;
        let mut second = first.clone();
        second.timestamp = DateTime::from_timestamp(920, 0).unwrap();

        let source = VecSource {
            events: VecDeque::from(vec![first, second]),
        };
        h.engine
            .run(Box::new(source), h.shutdown_tx.subscribe())
            .await
            .unwrap();

        let stats = h.stats.snapshot();
        assert_eq!(stats.alerts_cold_chain, 2);
        assert_eq!(stats.alerts_overload, 2);
        assert_eq!(h.alert_log.recent(10).len(), 4);
    }

    #[tokio::test]
    async fn interleaved_vehicles_keep_separate_windows() {
        let h = harness(Config::default());
        let mut snapshots = h.bus.subscribe_snapshots();

        let source = VecSource {
            events: VecDeque::from(vec![
                event("TRK-DL-001", 910, 10.0),
                event("TRK-DL-002", 915, 20.0),
                event("TRK-DL-001", 1000, 10.0),
                event("TRK-DL-002", 1010, 20.0),
                event("TRK-DL-001", 1200, 0.0),
                event("TRK-DL-002", 1210, 0.0),
            ]),
        };
        h.engine
            .run(Box::new(source), h.shutdown_tx.subscribe())
            .await
            .unwrap();

        // close order across workers is not deterministic
        let mut by_vehicle = std::collections::HashMap::new();
        for _ in 0..2 {
            let snap = snapshots.recv().await.unwrap();
            by_vehicle.insert(snap.vehicle_id.clone(), snap);
        }
        let one = &by_vehicle["TRK-DL-001"];
        let two = &by_vehicle["TRK-DL-002"];
        assert!((one.co2_kg - 24.92).abs() < 1e-9, "got {}", one.co2_kg);
        assert!((two.co2_kg - 49.84).abs() < 1e-9, "got {}", two.co2_kg);
        assert!((one.fuel_consumed_liters - 9.299).abs() < 1e-9);

        let stats = h.stats.snapshot();
        assert_eq!(stats.workers_spawned, 2);
        assert_eq!(stats.windows_closed, 2);
    }

    #[tokio::test]
    async fn idle_worker_evicts_and_respawns() {
        let mut config = Config::default();
        config.engine.idle_evict_secs = 1;
        let h = harness(config);

        let source = StallSource {
            first: Some(event("TRK-DL-001", 910, 1.0)),
            second: Some(event("TRK-DL-001", 7210, 1.0)),
            stall: Duration::from_millis(1400),
        };
        h.engine
            .run(Box::new(source), h.shutdown_tx.subscribe())
            .await
            .unwrap();

        let stats = h.stats.snapshot();
        assert_eq!(stats.workers_evicted, 1);
        assert_eq!(stats.workers_spawned, 2);
        assert_eq!(stats.events_ingested, 2);
    }
}
