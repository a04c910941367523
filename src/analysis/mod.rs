//! Emission analytics - CO2 model, window aggregation, ETA projection

pub mod co2;
mod eta;
mod windows;

pub use co2::estimate_co2_kg;
pub use eta::{eta_seconds, smoothed_speed};
pub use windows::{ApplyOutcome, ClosedWindow, VehicleWindowState, WindowTotals};
