//! Fleet snapshot feed - the append-only coupling point with
//! downstream consumers
//!
//! One JSON line per vehicle per tumbling-window close. The publisher
//! never rewrites or deletes prior lines; consumers reconstruct latest
//! state by keeping the last record per vehicle.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::core::PipelineStats;
use super::PublisherConfig;

/// Headline state for one vehicle in the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleStatus {
    Normal,
    HighEmissionAlert,
}

/// One feed line. Self-contained: no field needs cross-record context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSnapshot {
    pub vehicle_id: String,
    pub route_id: String,
    /// Close time of the tumbling window this record summarizes.
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    /// Tumbling-window CO2 total, kg.
    pub co2_kg: f64,
    /// Cumulative savings against the corridor baseline, kg.
    pub co2_saved_kg: f64,
    pub status: VehicleStatus,
    /// "OK" or "ROUTE_DEVIATION:<offset_km>".
    pub deviation_status: String,
    /// Tumbling-window average speed.
    pub speed_kmph: f64,
    /// Tumbling-window fuel equivalent, litres.
    pub fuel_consumed_liters: f64,
    /// Signed percentage over rated capacity.
    pub overload_pct: f64,
    /// Null when the vehicle is stationary.
    pub eta_seconds: Option<u64>,
}

/// Appends snapshots to the shared feed file.
///
/// Writes are whole lines: a record is serialized completely before
/// anything touches the file, so a consumer never sees a torn record.
/// While the sink is unavailable, lines queue in a bounded ring that
/// drops oldest with a counted metric.
pub struct SnapshotPublisher {
    config: PublisherConfig,
}

impl SnapshotPublisher {
    pub fn new(config: PublisherConfig) -> Self {
        Self { config }
    }

    /// Consumes the snapshot channel until every sender is gone, then
    /// drains the backlog and flushes. Intended to run as its own task.
    pub async fn run(
        &self,
        mut rx: broadcast::Receiver<FleetSnapshot>,
        stats: Arc<PipelineStats>,
    ) -> Result<()> {
        if let Some(parent) = self.config.feed_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        info!("publishing fleet feed to {:?}", self.config.feed_path);

        let mut writer: Option<BufWriter<File>> = None;
        let mut pending: VecDeque<String> = VecDeque::new();
        let mut sink_down = false;

        loop {
            match rx.recv().await {
                Ok(snapshot) => {
                    let line = match serde_json::to_string(&snapshot) {
                        Ok(line) => line,
                        Err(err) => {
                            warn!("unserializable snapshot for {}: {err}", snapshot.vehicle_id);
                            continue;
                        }
                    };
                    pending.push_back(line);
                    while pending.len() > self.config.pending_capacity {
                        pending.pop_front();
                        stats.record_snapshots_dropped(1);
                    }
                    self.flush_pending(&mut writer, &mut pending, &mut sink_down, &stats);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    stats.record_snapshots_dropped(skipped);
                    warn!("snapshot channel lagged, dropped {skipped} oldest records");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        // one last attempt for anything still queued
        self.flush_pending(&mut writer, &mut pending, &mut sink_down, &stats);
        if !pending.is_empty() {
            stats.record_snapshots_dropped(pending.len() as u64);
            warn!(
                "discarding {} unpublished snapshots at shutdown",
                pending.len()
            );
        }
        if let Some(mut writer) = writer {
            writer.flush()?;
        }
        debug!("snapshot feed closed");
        Ok(())
    }

    fn flush_pending(
        &self,
        writer: &mut Option<BufWriter<File>>,
        pending: &mut VecDeque<String>,
        sink_down: &mut bool,
        stats: &PipelineStats,
    ) {
        while !pending.is_empty() {
            if writer.is_none() {
                match self.open_feed() {
                    Ok(file) => {
                        *writer = Some(BufWriter::new(file));
                        if *sink_down {
                            info!("snapshot sink recovered");
                            *sink_down = false;
                        }
                    }
                    Err(err) => {
                        if !*sink_down {
                            warn!("snapshot sink unavailable: {err:#}");
                            *sink_down = true;
                        }
                        return;
                    }
                }
            }

            let out = match writer.as_mut() {
                Some(out) => out,
                None => return,
            };
            let written = match pending.front() {
                Some(line) => writeln!(out, "{line}").and_then(|()| out.flush()),
                None => return,
            };
            match written {
                Ok(()) => {
                    pending.pop_front();
                    stats.record_snapshot_published();
                }
                Err(err) => {
                    if !*sink_down {
                        warn!("snapshot feed write failed: {err}");
                        *sink_down = true;
                    }
                    // reopen on the next attempt
                    *writer = None;
                    return;
                }
            }
        }
    }

    fn open_feed(&self) -> Result<File> {
        OpenOptions::new()
            .create(true)
            .write(true)
            .append(true)
            .open(&self.config.feed_path)
            .map_err(|e| anyhow!("failed to open feed {:?}: {e}", self.config.feed_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sample(vehicle_id: &str, secs: i64) -> FleetSnapshot {
        FleetSnapshot {
            vehicle_id: vehicle_id.to_string(),
            route_id: "delhi_mumbai".to_string(),
            timestamp: DateTime::from_timestamp(secs, 0).unwrap(),
            latitude: 26.21,
            longitude: 78.18,
            co2_kg: 12.345,
            co2_saved_kg: 3.2,
            status: VehicleStatus::Normal,
            deviation_status: "OK".to_string(),
            speed_kmph: 63.4,
            fuel_consumed_liters: 4.606,
            overload_pct: -24.53,
            eta_seconds: Some(41520),
        }
    }

    fn temp_feed(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("routepulse_{tag}_{}.jsonl", uuid::Uuid::new_v4()))
    }

    #[test]
    fn snapshot_wire_format() {
        let mut snapshot = sample("TRK-DL-001", 1200);
        snapshot.eta_seconds = None;
        snapshot.deviation_status = "ROUTE_DEVIATION:3.42".to_string();
        snapshot.status = VehicleStatus::HighEmissionAlert;

        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&snapshot).unwrap()).unwrap();
        assert_eq!(value["status"], "HIGH_EMISSION_ALERT");
        assert_eq!(value["deviation_status"], "ROUTE_DEVIATION:3.42");
        assert!(value["eta_seconds"].is_null());
        assert_eq!(value["vehicle_id"], "TRK-DL-001");
        assert!(value["co2_kg"].is_number());
        assert!(value["overload_pct"].is_number());
    }

    #[tokio::test]
    async fn publisher_appends_one_line_per_snapshot() {
        let path = temp_feed("append");
        let config = PublisherConfig {
            feed_path: path.clone(),
            pending_capacity: 64,
        };
        let stats = Arc::new(PipelineStats::default());
        let (tx, rx) = broadcast::channel(16);

        tx.send(sample("TRK-DL-001", 1200)).unwrap();
        tx.send(sample("TRK-DL-002", 1200)).unwrap();
        tx.send(sample("TRK-DL-001", 1500)).unwrap();
        drop(tx);

        SnapshotPublisher::new(config)
            .run(rx, stats.clone())
            .await
            .unwrap();

        let body = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 3);
        for line in &lines {
            let parsed: FleetSnapshot = serde_json::from_str(line).unwrap();
            assert!(!parsed.vehicle_id.is_empty());
        }
        assert_eq!(stats.snapshot().snapshots_published, 3);
        assert_eq!(stats.snapshot().snapshots_dropped, 0);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn slow_consumer_drops_oldest_with_count() {
        let path = temp_feed("lagged");
        let config = PublisherConfig {
            feed_path: path.clone(),
            pending_capacity: 64,
        };
        let stats = Arc::new(PipelineStats::default());
        // channel only holds two entries while the publisher is not
        // yet draining
        let (tx, rx) = broadcast::channel(2);
        for i in 0..5 {
            tx.send(sample("TRK-KL-001", 1200 + i * 300)).unwrap();
        }
        drop(tx);

        SnapshotPublisher::new(config)
            .run(rx, stats.clone())
            .await
            .unwrap();

        let body = std::fs::read_to_string(&path).unwrap();
        assert_eq!(body.lines().count(), 2);
        assert_eq!(stats.snapshot().snapshots_published, 2);
        assert_eq!(stats.snapshot().snapshots_dropped, 3);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn unavailable_sink_bounds_the_backlog() {
        // the feed path is a directory, so every open fails
        let dir = std::env::temp_dir().join(format!("routepulse_dir_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let config = PublisherConfig {
            feed_path: dir.clone(),
            pending_capacity: 2,
        };
        let stats = Arc::new(PipelineStats::default());
        let (tx, rx) = broadcast::channel(16);
        for i in 0..5 {
            tx.send(sample("TRK-CH-002", 1200 + i * 300)).unwrap();
        }
        drop(tx);

        SnapshotPublisher::new(config)
            .run(rx, stats.clone())
            .await
            .unwrap();

        let snap = stats.snapshot();
        assert_eq!(snap.snapshots_published, 0);
        // three evicted from the ring, two discarded at shutdown
        assert_eq!(snap.snapshots_dropped, 5);

        let _ = std::fs::remove_dir(&dir);
    }
}
