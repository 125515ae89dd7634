//! Composite indices derived from the current record set and grid state.
//!
//! Everything here is a pure function of its inputs.

use crate::model::{ComputeRecord, GpuClass, GridState, TokenRecord};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Hours per year divided by 1000, scaling GW to TWh/yr.
pub const HOURS_PER_YEAR_THOUSANDS: f64 = 8.76;

/// Input share of the blended token price (3 input : 1 output).
const BLEND_INPUT_WEIGHT: f64 = 0.75;

/// Arithmetic mean, 0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Coefficient of variation in percent: population σ / mean × 100.
///
/// Defined as 0 for an empty slice, a zero mean, or identical values.
pub fn volatility_index(prices: &[f64]) -> f64 {
    let Some(first) = prices.first() else {
        return 0.0;
    };
    if prices.iter().all(|price| price == first) {
        return 0.0;
    }

    let mean = mean(prices);
    if mean == 0.0 || !mean.is_finite() {
        return 0.0;
    }

    let variance = prices
        .iter()
        .map(|price| (price - mean).powi(2))
        .sum::<f64>()
        / prices.len() as f64;

    (variance.sqrt() / mean.abs()) * 100.0
}

/// Physical load of the active fleet in gigawatts.
pub fn grid_load_gw(grid: &GridState) -> f64 {
    (grid.active_gpu_estimate * grid.avg_tdp_watts * grid.pue) / 1e9
}

/// Annual energy in TWh. An authoritative figure wins over the load-based estimate.
pub fn annualised_energy_twh(grid: &GridState) -> f64 {
    grid.annual_twh
        .unwrap_or_else(|| grid_load_gw(grid) * HOURS_PER_YEAR_THOUSANDS)
}

/// Cost of running the fleet at the current load for one day.
pub fn daily_energy_cost_usd(grid: &GridState) -> f64 {
    let kilowatts = grid_load_gw(grid) * 1e6;
    kilowatts * 24.0 * grid.kwh_price
}

/// Token price at a 3:1 input to output mix.
pub fn blended_token_price(record: &TokenRecord) -> f64 {
    BLEND_INPUT_WEIGHT * record.input_price + (1.0 - BLEND_INPUT_WEIGHT) * record.output_price
}

/// Price statistics for one [`GpuClass`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ClassStats {
    pub count: usize,
    pub mean_price: f64,
    pub min_price: f64,
    pub max_price: f64,
}

/// Per-class price breakdown, ordered by class. Classes without offers are omitted.
pub fn class_breakdown(records: &[ComputeRecord]) -> IndexMap<GpuClass, ClassStats> {
    GpuClass::ALL
        .iter()
        .filter_map(|class| {
            let prices: Vec<f64> = records
                .iter()
                .filter(|record| record.gpu == *class)
                .map(|record| record.price_per_hour)
                .collect();
            if prices.is_empty() {
                return None;
            }

            let stats = ClassStats {
                count: prices.len(),
                mean_price: mean(&prices),
                min_price: prices.iter().copied().fold(f64::INFINITY, f64::min),
                max_price: prices.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            };
            Some((*class, stats))
        })
        .collect()
}

/// Indices recomputed every tick.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Indices {
    pub mean_compute_price: f64,
    pub volatility_index: f64,
    pub grid_load_gw: f64,
    pub annual_energy_twh: f64,
    pub daily_energy_cost_usd: f64,
    pub mean_token_input_price: f64,
    pub mean_blended_token_price: f64,
    pub class_breakdown: IndexMap<GpuClass, ClassStats>,
}

impl Indices {
    pub fn compute(compute: &[ComputeRecord], tokens: &[TokenRecord], grid: &GridState) -> Self {
        let prices: Vec<f64> = compute.iter().map(|record| record.price_per_hour).collect();
        let token_inputs: Vec<f64> = tokens.iter().map(|record| record.input_price).collect();
        let blended: Vec<f64> = tokens.iter().map(blended_token_price).collect();

        Self {
            mean_compute_price: mean(&prices),
            volatility_index: volatility_index(&prices),
            grid_load_gw: grid_load_gw(grid),
            annual_energy_twh: annualised_energy_twh(grid),
            daily_energy_cost_usd: daily_energy_cost_usd(grid),
            mean_token_input_price: mean(&token_inputs),
            mean_blended_token_price: mean(&blended),
            class_breakdown: class_breakdown(compute),
        }
    }
}
