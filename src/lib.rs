// Copyright (c) 2026 RoutePulse Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/routepulse/routepulse-rs

//! RoutePulse - Freight Corridor Carbon Telemetry
//!
//! A real-time emission analytics pipeline for freight fleets:
//! - Per-vehicle tumbling windows with a sliding trailing baseline
//! - CO2 estimation from distance, load, speed and cold-chain state
//! - Emission spike, cold-chain, overload and route-deviation alerts
//! - Corridor geometry for deviation checks and ETA projection
//! - Append-only JSONL summary feed for downstream dashboards
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     RoutePulse Pipeline                      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐    ┌─────────────────────┐    ┌────────────┐  │
//! │  │ Telemetry │ →  │  Vehicle Workers    │ →  │  Snapshot  │  │
//! │  │ Source    │    │  windows + alerts   │    │  Publisher │  │
//! │  └───────────┘    └─────────────────────┘    └────────────┘  │
//! │        ↓                    ↓                      ↓         │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │                       Event Bus                        │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![allow(dead_code)]

pub mod analysis;
pub mod config;
pub mod core;
pub mod detection;
pub mod routes;
pub mod streaming;
pub mod telemetry;

// Re-exports for convenience
pub use config::Config;
pub use core::{EventBus, PipelineEngine, PipelineStats};
pub use detection::{Alert, AlertKind, AlertLog};
pub use routes::{Corridor, CorridorTable};
pub use streaming::{FleetSnapshot, SnapshotPublisher};
pub use telemetry::{FleetSimulator, JsonlSource, TelemetryEvent, TelemetrySource};

/// RoutePulse version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// RoutePulse name
pub const NAME: &str = "RoutePulse";
