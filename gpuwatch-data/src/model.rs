//! Canonical record shapes produced by the normaliser and the fallback synthesiser.

use crate::error::SourceErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Accelerator class a compute offer is grouped under.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Deserialize,
    Serialize,
    derive_more::Display,
)]
pub enum GpuClass {
    #[display("H200")]
    H200,
    #[display("H100")]
    H100,
    #[display("A100")]
    A100,
    #[display("L40S")]
    L40S,
    #[display("RTX 4090")]
    Rtx4090,
    #[display("Other")]
    Other,
}

impl GpuClass {
    pub const ALL: [GpuClass; 6] = [
        GpuClass::H200,
        GpuClass::H100,
        GpuClass::A100,
        GpuClass::L40S,
        GpuClass::Rtx4090,
        GpuClass::Other,
    ];

    /// Classify a free-form provider GPU label, e.g. "NVIDIA H100 SXM5 80GB".
    pub fn from_label(label: &str) -> Self {
        let label = label.to_ascii_lowercase();
        if label.contains("h200") {
            GpuClass::H200
        } else if label.contains("h100") {
            GpuClass::H100
        } else if label.contains("a100") {
            GpuClass::A100
        } else if label.contains("l40") {
            GpuClass::L40S
        } else if label.contains("4090") {
            GpuClass::Rtx4090
        } else {
            GpuClass::Other
        }
    }
}

/// Normalised GPU-rental offer. Prices are USD per GPU-hour.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ComputeRecord {
    pub id: String,
    pub provider: String,
    pub region: String,
    pub gpu: GpuClass,
    pub price_per_hour: f64,
    pub availability_pct: f64,
    pub updated_at: DateTime<Utc>,
}

/// Normalised LLM token offer. Prices are USD per million tokens.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TokenRecord {
    pub id: String,
    pub model: String,
    pub provider: String,
    pub input_price: f64,
    pub output_price: f64,
    /// Benchmark score within `[0, 100]`.
    pub quality_score: f64,
    pub latency_ms: f64,
    pub open_source: bool,
    pub updated_at: DateTime<Utc>,
}

/// Physical power model behind the energy indices.
///
/// Never perturbed by the live mutator; only [`GridState::apply`] during
/// bootstrap may change it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GridState {
    pub active_gpu_estimate: f64,
    pub kwh_price: f64,
    /// Authoritative annual figure, when a source supplied one.
    pub annual_twh: Option<f64>,
    pub avg_tdp_watts: f64,
    pub pue: f64,
}

/// Partial `grid-state.json` document. All fields are optional.
///
/// Numeric strings are accepted; any other unusable value reads as absent so one
/// bad field never discards the rest of the document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct GridStateUpdate {
    #[serde(
        default,
        alias = "active_gpus",
        deserialize_with = "de_lenient_f64"
    )]
    pub active_gpu_est: Option<f64>,
    #[serde(
        default,
        alias = "electricity_price",
        deserialize_with = "de_lenient_f64"
    )]
    pub kwh_price: Option<f64>,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub annual_twh: Option<f64>,
}

fn de_lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: serde_json::Value = Deserialize::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(number) => number.as_f64(),
        serde_json::Value::String(text) => text.trim().parse().ok(),
        _ => None,
    })
}

impl GridState {
    /// Overwrite fields present in the update. Non-finite or non-positive values
    /// are ignored. Returns the number of fields applied.
    pub fn apply(&mut self, update: &GridStateUpdate) -> usize {
        fn usable(value: Option<f64>) -> Option<f64> {
            value.filter(|v| v.is_finite() && *v > 0.0)
        }

        let mut applied = 0;
        if let Some(active) = usable(update.active_gpu_est) {
            self.active_gpu_estimate = active;
            applied += 1;
        }
        if let Some(kwh_price) = usable(update.kwh_price) {
            self.kwh_price = kwh_price;
            applied += 1;
        }
        if let Some(annual_twh) = usable(update.annual_twh) {
            self.annual_twh = Some(annual_twh);
            applied += 1;
        }
        applied
    }
}

/// One year of the published annual energy series.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AnnualEnergyPoint {
    pub year: i32,
    #[serde(alias = "value")]
    pub value_twh: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Where a dataset came from, surfaced as a freshness indicator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum Provenance {
    Live { fetched_at: DateTime<Utc> },
    Fallback { cause: SourceErrorKind },
}

impl Provenance {
    pub fn is_live(&self) -> bool {
        matches!(self, Provenance::Live { .. })
    }
}
