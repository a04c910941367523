// Copyright (c) 2026 RoutePulse Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/routepulse/routepulse-rs

//! Event bus for inter-component communication
//!
//! Broadcast channels fan accepted telemetry, alerts and snapshots out
//! to whoever cares. Slow subscribers lag and lose the oldest entries
//! rather than blocking the pipeline.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;

use crate::detection::Alert;
use crate::streaming::FleetSnapshot;
use crate::telemetry::TelemetryEvent;

/// Central pub/sub bus. Publishing never blocks and never fails; with
/// no subscribers the message simply goes nowhere.
pub struct EventBus {
    event_tx: broadcast::Sender<TelemetryEvent>,
    alert_tx: broadcast::Sender<Alert>,
    snapshot_tx: broadcast::Sender<FleetSnapshot>,
    published: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity);
        let (alert_tx, _) = broadcast::channel(capacity);
        let (snapshot_tx, _) = broadcast::channel(capacity);

        Self {
            event_tx,
            alert_tx,
            snapshot_tx,
            published: AtomicU64::new(0),
        }
    }

    /// Accepted (validated) telemetry, for downstream taps.
    pub fn publish_event(&self, event: TelemetryEvent) {
        let _ = self.event_tx.send(event);
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_alert(&self, alert: Alert) {
        let _ = self.alert_tx.send(alert);
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_snapshot(&self, snapshot: FleetSnapshot) {
        let _ = self.snapshot_tx.send(snapshot);
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.event_tx.subscribe()
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<Alert> {
        self.alert_tx.subscribe()
    }

    pub fn subscribe_snapshots(&self) -> broadcast::Receiver<FleetSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Total messages published across all channels since startup.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}
