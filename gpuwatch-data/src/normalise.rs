//! Maps provider-specific source schemas onto [`ComputeRecord`] and [`TokenRecord`].
//!
//! Normalisation is deterministic: absent fields receive fixed defaults and ids
//! derive from input position. Canonical field names are accepted as aliases, so
//! normalising already normalised records is idempotent.

use crate::{
    error::{FetchError, RejectReason},
    model::{AnnualEnergyPoint, ComputeRecord, GpuClass, GridStateUpdate, TokenRecord},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

pub const DEFAULT_PROVIDER: &str = "Unknown";
pub const DEFAULT_REGION: &str = "Unknown";
pub const DEFAULT_MODEL: &str = "Unknown";
pub const DEFAULT_AVAILABILITY_PCT: f64 = 100.0;
pub const DEFAULT_QUALITY_SCORE: f64 = 50.0;
pub const DEFAULT_LATENCY_MS: f64 = 500.0;

/// Validated records plus the per-record skips.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Normalised<T> {
    pub records: Vec<T>,
    pub rejected: Vec<Rejection>,
}

impl<T> Normalised<T> {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A source entry dropped during validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub index: usize,
    pub reason: RejectReason,
}

/// ### Raw Payload Examples
///```json
/// {"provider": "Lambda", "region": "us-east-1", "gpu": "H100 SXM", "price": 2.49}
/// {"vendor": "Vast", "gpu_type": "RTX 4090", "usd_per_hour": "0.34", "currency": "USD"}
/// ```
#[derive(Debug, Deserialize)]
struct RawComputeRecord {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default, alias = "provider_name", alias = "vendor")]
    provider: Option<String>,
    #[serde(default, alias = "location", alias = "datacenter")]
    region: Option<String>,
    #[serde(default, alias = "gpu_type", alias = "gpu_model", alias = "gpu_class")]
    gpu: Option<String>,
    #[serde(
        default,
        alias = "price_per_hour",
        alias = "usd_per_hour",
        alias = "hourly_price"
    )]
    price: Option<Value>,
    #[serde(default, alias = "availability_pct")]
    availability: Option<Value>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default, alias = "last_updated")]
    updated_at: Option<Value>,
}

/// ### Raw Payload Examples
///```json
/// {"model": "llama-3.1-70b", "provider": "Together", "input_price": 0.88, "output_price": 0.88}
/// {"name": "gpt-4o", "provider": "OpenAI", "input": 2.5, "output": null}
/// ```
#[derive(Debug, Deserialize)]
struct RawTokenRecord {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default, alias = "name", alias = "model_name")]
    model: Option<String>,
    #[serde(default, alias = "provider_name", alias = "vendor")]
    provider: Option<String>,
    #[serde(default, alias = "input", alias = "prompt_price")]
    input_price: Option<Value>,
    #[serde(default, alias = "output", alias = "completion_price")]
    output_price: Option<Value>,
    #[serde(default, alias = "quality", alias = "benchmark", alias = "score")]
    quality_score: Option<Value>,
    #[serde(default, alias = "latency")]
    latency_ms: Option<Value>,
    #[serde(default, alias = "is_open_source", alias = "open_weights")]
    open_source: Option<Value>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default, alias = "last_updated")]
    updated_at: Option<Value>,
}

/// Normalise a `compute-prices` document.
///
/// Entries whose price is not a finite positive number are dropped.
pub fn normalise_compute(
    document: &Value,
    loaded_at: DateTime<Utc>,
) -> Result<Normalised<ComputeRecord>, FetchError> {
    normalise_entries(document, |index, entry| {
        compute_record(index, entry, loaded_at)
    })
}

/// Normalise a `token-prices` document.
///
/// Entries with a null or non-numeric input or output price are dropped; a null
/// price means "pricing unknown" and is never defaulted to zero.
pub fn normalise_tokens(
    document: &Value,
    loaded_at: DateTime<Utc>,
) -> Result<Normalised<TokenRecord>, FetchError> {
    normalise_entries(document, |index, entry| token_record(index, entry, loaded_at))
}

/// Normalise an `annual-energy-history` document, sorted by year.
pub fn normalise_annual_energy(
    document: &Value,
) -> Result<Normalised<AnnualEnergyPoint>, FetchError> {
    let mut normalised = normalise_entries(document, |_, entry| {
        let point = AnnualEnergyPoint::deserialize(entry)
            .map_err(|error| RejectReason::Malformed(error.to_string()))?;
        if point.value_twh.is_finite() && point.value_twh >= 0.0 {
            Ok(point)
        } else {
            Err(RejectReason::OutOfRange {
                field: "value",
                value: point.value_twh.to_string(),
            })
        }
    })?;
    normalised.records.sort_by_key(|point| point.year);
    Ok(normalised)
}

/// Parse a `grid-state` document. Every field is optional.
pub fn parse_grid_update(document: &Value) -> Result<GridStateUpdate, FetchError> {
    if !document.is_object() {
        return Err(FetchError::Parse(format!(
            "expected a grid-state object, found {}",
            json_type(document)
        )));
    }
    GridStateUpdate::deserialize(document).map_err(|error| FetchError::Parse(error.to_string()))
}

fn normalise_entries<T, F>(document: &Value, mut convert: F) -> Result<Normalised<T>, FetchError>
where
    F: FnMut(usize, &Value) -> Result<T, RejectReason>,
{
    let entries = entries(document)?;

    let mut records = Vec::with_capacity(entries.len());
    let mut rejected = Vec::new();
    for (index, entry) in entries.iter().enumerate() {
        match convert(index, entry) {
            Ok(record) => records.push(record),
            Err(reason) => {
                debug!(index, %reason, "rejected source record");
                rejected.push(Rejection { index, reason });
            }
        }
    }

    Ok(Normalised { records, rejected })
}

/// Locate the record array, either the document itself or a `data` wrapper.
fn entries(document: &Value) -> Result<&Vec<Value>, FetchError> {
    match document {
        Value::Array(entries) => Ok(entries),
        Value::Object(fields) => match fields.get("data") {
            Some(Value::Array(entries)) => Ok(entries),
            _ => Err(FetchError::Parse(
                "expected an array of records or a {\"data\": [...]} wrapper".to_string(),
            )),
        },
        other => Err(FetchError::Parse(format!(
            "expected an array of records, found {}",
            json_type(other)
        ))),
    }
}

fn compute_record(
    index: usize,
    entry: &Value,
    loaded_at: DateTime<Utc>,
) -> Result<ComputeRecord, RejectReason> {
    let raw = RawComputeRecord::deserialize(entry)
        .map_err(|error| RejectReason::Malformed(error.to_string()))?;

    let rate = usd_rate(raw.currency.as_deref())?;
    let price = require_number("price", raw.price.as_ref())? * rate;
    if !(price.is_finite() && price > 0.0) {
        return Err(RejectReason::OutOfRange {
            field: "price",
            value: price.to_string(),
        });
    }

    Ok(ComputeRecord {
        id: id_or(raw.id.as_ref(), "compute", index),
        provider: text_or(raw.provider, DEFAULT_PROVIDER),
        region: text_or(raw.region, DEFAULT_REGION),
        gpu: raw
            .gpu
            .as_deref()
            .map(GpuClass::from_label)
            .unwrap_or(GpuClass::Other),
        price_per_hour: price,
        availability_pct: optional_number(raw.availability.as_ref())
            .map(|pct| pct.clamp(0.0, 100.0))
            .unwrap_or(DEFAULT_AVAILABILITY_PCT),
        updated_at: timestamp_or(raw.updated_at.as_ref(), loaded_at),
    })
}

fn token_record(
    index: usize,
    entry: &Value,
    loaded_at: DateTime<Utc>,
) -> Result<TokenRecord, RejectReason> {
    let raw = RawTokenRecord::deserialize(entry)
        .map_err(|error| RejectReason::Malformed(error.to_string()))?;

    let rate = usd_rate(raw.currency.as_deref())?;
    let input_price = require_number("input_price", raw.input_price.as_ref())? * rate;
    let output_price = require_number("output_price", raw.output_price.as_ref())? * rate;
    for (field, price) in [("input_price", input_price), ("output_price", output_price)] {
        if !(price.is_finite() && price >= 0.0) {
            return Err(RejectReason::OutOfRange {
                field,
                value: price.to_string(),
            });
        }
    }

    Ok(TokenRecord {
        id: id_or(raw.id.as_ref(), "token", index),
        model: text_or(raw.model, DEFAULT_MODEL),
        provider: text_or(raw.provider, DEFAULT_PROVIDER),
        input_price,
        output_price,
        quality_score: optional_number(raw.quality_score.as_ref())
            .map(|score| score.clamp(0.0, 100.0))
            .unwrap_or(DEFAULT_QUALITY_SCORE),
        latency_ms: optional_number(raw.latency_ms.as_ref())
            .filter(|latency| *latency >= 0.0)
            .unwrap_or(DEFAULT_LATENCY_MS),
        open_source: raw
            .open_source
            .as_ref()
            .and_then(Value::as_bool)
            .unwrap_or(false),
        updated_at: timestamp_or(raw.updated_at.as_ref(), loaded_at),
    })
}

/// Interpret a JSON number or numeric string.
fn number(field: &'static str, value: &Value) -> Result<f64, RejectReason> {
    match value {
        Value::Null => Err(RejectReason::MissingPrice { field }),
        Value::Number(number) => number.as_f64().ok_or_else(|| RejectReason::NonNumeric {
            field,
            value: number.to_string(),
        }),
        Value::String(text) => {
            text.trim()
                .parse::<f64>()
                .map_err(|_| RejectReason::NonNumeric {
                    field,
                    value: text.clone(),
                })
        }
        other => Err(RejectReason::NonNumeric {
            field,
            value: other.to_string(),
        }),
    }
}

fn require_number(field: &'static str, value: Option<&Value>) -> Result<f64, RejectReason> {
    value
        .ok_or(RejectReason::MissingPrice { field })
        .and_then(|value| number(field, value))
}

/// Optional numeric fields fall back to their default when absent or unusable.
fn optional_number(value: Option<&Value>) -> Option<f64> {
    value
        .and_then(|value| number("optional", value).ok())
        .filter(|number| number.is_finite())
}

/// Keep a source-supplied id, otherwise derive `<kind>-<index>` from the input position.
fn id_or(value: Option<&Value>, kind: &str, index: usize) -> String {
    let supplied = match value {
        Some(Value::String(text)) => Some(text.trim().to_string()),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    };
    supplied
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("{kind}-{index}"))
}

fn text_or(value: Option<String>, default: &str) -> String {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn timestamp_or(value: Option<&Value>, default: DateTime<Utc>) -> DateTime<Utc> {
    value
        .and_then(Value::as_str)
        .and_then(|text| DateTime::parse_from_rfc3339(text).ok())
        .map(|time| time.with_timezone(&Utc))
        .unwrap_or(default)
}

/// Fixed conversion table into the USD base unit.
fn usd_rate(currency: Option<&str>) -> Result<f64, RejectReason> {
    let Some(code) = currency else {
        return Ok(1.0);
    };

    match code.trim().to_ascii_uppercase().as_str() {
        "" | "USD" => Ok(1.0),
        "EUR" => Ok(1.08),
        "GBP" => Ok(1.27),
        "CNY" => Ok(0.14),
        "JPY" => Ok(0.0067),
        "INR" => Ok(0.012),
        _ => Err(RejectReason::UnknownCurrency(code.to_string())),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
