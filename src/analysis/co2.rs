//! CO2 emission engine - pure per-event mass estimate
//!
//! Implements the IPCC AR6 WGIII (2022) Tier-1 road freight factor model:
//! `co2_kg = distance_km * 0.89 * load_multiplier * speed_factor * cold_factor`

/// Base emission factor for heavy diesel road freight, kg CO2 per km.
pub const BASE_FACTOR_KG_PER_KM: f64 = 0.89;

/// Extra burn for a refrigerated trailer running its compressor.
pub const COLD_CHAIN_FACTOR: f64 = 1.25;

/// Above this speed drag dominates and efficiency degrades linearly.
pub const OPTIMAL_SPEED_MAX_KMPH: f64 = 80.0;

const OVERSPEED_PENALTY_PER_KMPH: f64 = 0.01;
const LOAD_PENALTY_WEIGHT: f64 = 0.4;
const LOAD_FRACTION_CAP: f64 = 2.0;

/// Diesel combustion yields roughly 2.68 kg of CO2 per litre burned;
/// used to express window totals as a fuel equivalent.
pub const DIESEL_CO2_KG_PER_LITER: f64 = 2.68;

/// Estimates the CO2 mass for a single telemetry event.
///
/// Deterministic and stateless. Inputs are validated upstream; if the
/// computation still produces a non-finite or negative value, the
/// estimate degrades to 0.0 kg for this one event so a bad sample
/// never stalls the rest of the fleet.
pub fn estimate_co2_kg(
    distance_km: f64,
    load_kg: f64,
    capacity_kg: f64,
    speed_kmph: f64,
    is_cold_chain: bool,
) -> f64 {
    let cold_factor = if is_cold_chain { COLD_CHAIN_FACTOR } else { 1.0 };
    let co2 = distance_km
        * BASE_FACTOR_KG_PER_KM
        * load_multiplier(load_kg, capacity_kg)
        * speed_factor(speed_kmph)
        * cold_factor;

    if !co2.is_finite() || co2 < 0.0 {
        return 0.0;
    }
    round3(co2)
}

/// Payload scaling: 1.0 unladen, 1.4 at rated capacity, capped at 1.8.
/// Capacity is floored at 1.0 kg so a junk capacity cannot blow up the
/// division.
pub fn load_multiplier(load_kg: f64, capacity_kg: f64) -> f64 {
    let load_fraction = (load_kg / capacity_kg.max(1.0)).min(LOAD_FRACTION_CAP);
    1.0 + LOAD_PENALTY_WEIGHT * load_fraction
}

/// 1.0 at or below the 80 km/h optimum, then a 1% penalty per km/h.
pub fn speed_factor(speed_kmph: f64) -> f64 {
    if speed_kmph <= OPTIMAL_SPEED_MAX_KMPH {
        1.0
    } else {
        1.0 + OVERSPEED_PENALTY_PER_KMPH * (speed_kmph - OPTIMAL_SPEED_MAX_KMPH)
    }
}

/// Litres of diesel that would emit the given CO2 mass.
pub fn fuel_equivalent_liters(co2_kg: f64) -> f64 {
    co2_kg / DIESEL_CO2_KG_PER_LITER
}

/// Rounds to 3 decimals, half away from zero.
///
/// Products that are exact in decimal (0.89 * 1.15 = 1.0235) can land
/// one ulp under the midpoint in binary; the relative guard keeps them
/// rounding on the decimal side of the tie.
pub fn round3(value: f64) -> f64 {
    let scaled = value * 1000.0;
    let guard = scaled.abs().max(1.0) * 1e-12;
    (scaled + guard.copysign(scaled)).round() / 1000.0
}
