//! Streaming module - fleet snapshot feed publication

mod snapshot;

pub use snapshot::{FleetSnapshot, SnapshotPublisher, VehicleStatus};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Publisher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Append-only feed consumed by external tooling.
    pub feed_path: PathBuf,
    /// Bounded retry queue while the sink is unavailable; oldest lines
    /// are dropped (and counted) past this depth.
    pub pending_capacity: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            feed_path: PathBuf::from("./data/fleet_summary.jsonl"),
            pending_capacity: 256,
        }
    }
}
