//! Short-horizon ETA projection
//!
//! `eta_seconds = remaining_km / smoothed_speed * 3600`, with a floor
//! on speed so a stationary vehicle reports an unknown ETA instead of
//! an unbounded one.

use crate::analysis::windows::WindowTotals;

/// Below this speed the vehicle counts as stationary.
pub const MIN_SPEED_KMPH: f64 = 0.5;

/// Projects the remaining travel time. `None` means unknown: the
/// vehicle is stationary, or the inputs are unusable.
pub fn eta_seconds(remaining_km: f64, smoothed_speed_kmph: f64) -> Option<u64> {
    if !remaining_km.is_finite() || remaining_km < 0.0 {
        return None;
    }
    if !smoothed_speed_kmph.is_finite() || smoothed_speed_kmph < MIN_SPEED_KMPH {
        return None;
    }
    let secs = remaining_km / smoothed_speed_kmph.max(MIN_SPEED_KMPH) * 3600.0;
    Some(secs.round() as u64)
}

/// The tumbling window's average speed once a window has closed, else
/// the instantaneous event speed.
pub fn smoothed_speed(last_closed: Option<&WindowTotals>, instantaneous_kmph: f64) -> f64 {
    match last_closed {
        Some(window) if window.event_count > 0 => window.avg_speed_kmph,
        _ => instantaneous_kmph,
    }
}
