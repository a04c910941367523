//! Core pipeline module - orchestration, counters, event bus

mod engine;
mod event_bus;

pub use engine::PipelineEngine;
pub use event_bus::EventBus;

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::detection::AlertKind;

/// Fleet-wide pipeline counters. Every error path in the core is
/// self-healing; these are how it stays observable anyway.
#[derive(Debug, Default)]
pub struct PipelineStats {
    events_ingested: AtomicU64,
    events_rejected: AtomicU64,
    late_drops: AtomicU64,
    windows_closed: AtomicU64,
    spike_checks_skipped: AtomicU64,
    alerts_high_emission: AtomicU64,
    alerts_cold_chain: AtomicU64,
    alerts_overload: AtomicU64,
    alerts_route_deviation: AtomicU64,
    snapshots_published: AtomicU64,
    snapshots_dropped: AtomicU64,
    workers_spawned: AtomicU64,
    workers_evicted: AtomicU64,
}

impl PipelineStats {
    pub fn record_ingested(&self) {
        self.events_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_late_drop(&self) {
        self.late_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_window_closed(&self) {
        self.windows_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_spike_check_skipped(&self) {
        self.spike_checks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert(&self, kind: AlertKind) {
        let counter = match kind {
            AlertKind::HighEmissionAlert => &self.alerts_high_emission,
            AlertKind::ColdChainBreach => &self.alerts_cold_chain,
            AlertKind::Overload => &self.alerts_overload,
            AlertKind::RouteDeviation => &self.alerts_route_deviation,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot_published(&self) {
        self.snapshots_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshots_dropped(&self, count: u64) {
        self.snapshots_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_worker_spawned(&self) {
        self.workers_spawned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_worker_evicted(&self) {
        self.workers_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_ingested: self.events_ingested.load(Ordering::Relaxed),
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            late_drops: self.late_drops.load(Ordering::Relaxed),
            windows_closed: self.windows_closed.load(Ordering::Relaxed),
            spike_checks_skipped: self.spike_checks_skipped.load(Ordering::Relaxed),
            alerts_high_emission: self.alerts_high_emission.load(Ordering::Relaxed),
            alerts_cold_chain: self.alerts_cold_chain.load(Ordering::Relaxed),
            alerts_overload: self.alerts_overload.load(Ordering::Relaxed),
            alerts_route_deviation: self.alerts_route_deviation.load(Ordering::Relaxed),
            snapshots_published: self.snapshots_published.load(Ordering::Relaxed),
            snapshots_dropped: self.snapshots_dropped.load(Ordering::Relaxed),
            workers_spawned: self.workers_spawned.load(Ordering::Relaxed),
            workers_evicted: self.workers_evicted.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters, for logging and tooling.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    pub events_ingested: u64,
    pub events_rejected: u64,
    pub late_drops: u64,
    pub windows_closed: u64,
    pub spike_checks_skipped: u64,
    pub alerts_high_emission: u64,
    pub alerts_cold_chain: u64,
    pub alerts_overload: u64,
    pub alerts_route_deviation: u64,
    pub snapshots_published: u64,
    pub snapshots_dropped: u64,
    pub workers_spawned: u64,
    pub workers_evicted: u64,
}

impl StatsSnapshot {
    pub fn total_alerts(&self) -> u64 {
        self.alerts_high_emission
            + self.alerts_cold_chain
            + self.alerts_overload
            + self.alerts_route_deviation
    }
}
