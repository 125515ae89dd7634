//! Pipeline configuration.
//!
//! Every tunable of the pipeline lives here so nothing is hardcoded in the core
//! logic. Values come from [`Default`], the `with_*` builders, or environment
//! variables via [`PipelineConfig::from_env`].

use crate::{error::ConfigError, model::GridState};
use std::time::Duration;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080/data/";
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_HISTORY_WINDOW: usize = 20;

/// Stochastic drift applied by the live mutator each tick.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationConfig {
    /// Independent per-record selection probability for compute offers.
    pub compute_probability: f64,
    /// Maximum absolute compute price delta, USD/h.
    pub compute_delta: f64,
    /// Independent per-record selection probability for token offers.
    pub token_probability: f64,
    /// Maximum absolute token input price delta, USD/1M tokens.
    pub token_delta: f64,
    /// Compute prices never drift below this floor.
    pub price_floor: f64,
    /// Token input prices never drift below this floor.
    pub token_price_floor: f64,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            compute_probability: 0.3,
            compute_delta: 0.05,
            token_probability: 0.1,
            token_delta: 0.025,
            price_floor: 0.1,
            token_price_floor: 0.0,
        }
    }
}

/// Power model and grid defaults used until a `grid-state` document overrides them.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerModelConfig {
    pub active_gpu_estimate: f64,
    pub kwh_price: f64,
    pub avg_tdp_watts: f64,
    pub pue: f64,
}

impl Default for PowerModelConfig {
    fn default() -> Self {
        Self {
            active_gpu_estimate: 4_000_000.0,
            kwh_price: 0.12,
            avg_tdp_watts: 600.0,
            pue: 1.35,
        }
    }
}

impl PowerModelConfig {
    pub fn grid_state(&self) -> GridState {
        GridState {
            active_gpu_estimate: self.active_gpu_estimate,
            kwh_price: self.kwh_price,
            annual_twh: None,
            avg_tdp_watts: self.avg_tdp_watts,
            pue: self.pue,
        }
    }
}

/// Top level pipeline configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Directory-like base that source documents are joined onto.
    pub base_url: Url,
    pub tick_interval: Duration,
    pub mutation: MutationConfig,
    /// Capacity of every history series.
    pub history_window: usize,
    pub power: PowerModelConfig,
    /// Seed for the mutator and fallback RNG. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_url: parse_base_url(DEFAULT_BASE_URL)
                .unwrap_or_else(|_| unreachable!("default base url is valid")),
            tick_interval: DEFAULT_TICK_INTERVAL,
            mutation: MutationConfig::default(),
            history_window: DEFAULT_HISTORY_WINDOW,
            power: PowerModelConfig::default(),
            seed: None,
        }
    }
}

impl PipelineConfig {
    /// Set the base url (or local directory path) documents are loaded from.
    pub fn with_base_url(mut self, base: &str) -> Result<Self, ConfigError> {
        self.base_url = parse_base_url(base)?;
        Ok(self)
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_mutation(mut self, mutation: MutationConfig) -> Self {
        self.mutation = mutation;
        self
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    pub fn with_power(mut self, power: PowerModelConfig) -> Self {
        self.power = power;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Build from `GPUWATCH_*` environment variables layered over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup, layered over the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(base) = lookup("GPUWATCH_BASE_URL") {
            config.base_url = parse_base_url(&base)?;
        }
        if let Some(millis) = parse_var::<u64, _>(&lookup, "GPUWATCH_TICK_MS")? {
            config.tick_interval = Duration::from_millis(millis);
        }
        if let Some(window) = parse_var(&lookup, "GPUWATCH_HISTORY_WINDOW")? {
            config.history_window = window;
        }
        if let Some(seed) = parse_var(&lookup, "GPUWATCH_SEED")? {
            config.seed = Some(seed);
        }

        let mutation = &mut config.mutation;
        let overrides: [(&'static str, &mut f64); 6] = [
            ("GPUWATCH_COMPUTE_PROB", &mut mutation.compute_probability),
            ("GPUWATCH_COMPUTE_DELTA", &mut mutation.compute_delta),
            ("GPUWATCH_TOKEN_PROB", &mut mutation.token_probability),
            ("GPUWATCH_TOKEN_DELTA", &mut mutation.token_delta),
            ("GPUWATCH_PRICE_FLOOR", &mut mutation.price_floor),
            ("GPUWATCH_TOKEN_FLOOR", &mut mutation.token_price_floor),
        ];
        for (key, field) in overrides {
            if let Some(value) = parse_var(&lookup, key)? {
                *field = value;
            }
        }

        let power = &mut config.power;
        let overrides: [(&'static str, &mut f64); 4] = [
            ("GPUWATCH_TDP_WATTS", &mut power.avg_tdp_watts),
            ("GPUWATCH_PUE", &mut power.pue),
            ("GPUWATCH_ACTIVE_GPUS", &mut power.active_gpu_estimate),
            ("GPUWATCH_KWH_PRICE", &mut power.kwh_price),
        ];
        for (key, field) in overrides {
            if let Some(value) = parse_var(&lookup, key)? {
                *field = value;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the mutator or index calculator cannot operate on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.mutation;
        check_range("compute_probability", "[0, 1]", m.compute_probability, |v| {
            (0.0..=1.0).contains(&v)
        })?;
        check_range("token_probability", "[0, 1]", m.token_probability, |v| {
            (0.0..=1.0).contains(&v)
        })?;
        check_range("compute_delta", "[0, inf)", m.compute_delta, |v| v >= 0.0)?;
        check_range("token_delta", "[0, inf)", m.token_delta, |v| v >= 0.0)?;
        check_range("price_floor", "[0, inf)", m.price_floor, |v| v >= 0.0)?;
        check_range("token_price_floor", "[0, inf)", m.token_price_floor, |v| {
            v >= 0.0
        })?;

        let p = &self.power;
        check_range("avg_tdp_watts", "(0, inf)", p.avg_tdp_watts, |v| v > 0.0)?;
        check_range("pue", "[1, inf)", p.pue, |v| v >= 1.0)?;
        check_range("active_gpu_estimate", "[0, inf)", p.active_gpu_estimate, |v| {
            v >= 0.0
        })?;
        check_range("kwh_price", "[0, inf)", p.kwh_price, |v| v >= 0.0)?;

        if self.history_window == 0 {
            return Err(ConfigError::OutOfRange {
                name: "history_window",
                range: "[1, inf)",
                value: "0".to_string(),
            });
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::OutOfRange {
                name: "tick_interval",
                range: "(0, inf)",
                value: format!("{:?}", self.tick_interval),
            });
        }

        Ok(())
    }
}

fn check_range(
    name: &'static str,
    range: &'static str,
    value: f64,
    valid: impl Fn(f64) -> bool,
) -> Result<(), ConfigError> {
    if value.is_finite() && valid(value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            range,
            value: value.to_string(),
        })
    }
}

fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env { key, value: raw }),
    }
}

/// Parse a base url, accepting plain filesystem paths as `file://` directories.
///
/// The result always ends in `/` so document names join beneath it.
pub fn parse_base_url(base: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::BaseUrl {
        url: base.to_string(),
        reason,
    };

    let mut url = match Url::parse(base) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let path = std::path::absolute(base).map_err(|error| invalid(error.to_string()))?;
            Url::from_directory_path(&path)
                .map_err(|()| invalid("not an absolute directory path".to_string()))?
        }
        Err(error) => return Err(invalid(error.to_string())),
    };

    if url.cannot_be_a_base() {
        return Err(invalid("url cannot be a base".to_string()));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    Ok(url)
}
