//! One-time startup: load every source document, normalise, and fall back where needed.
//!
//! Bootstrap always fully resolves before a [`Dashboard`] exists, so ticking can
//! never observe partial startup state.

use crate::{
    config::PipelineConfig,
    dashboard::Dashboard,
    error::PipelineError,
    fallback::{Selected, select_annual_energy, select_compute, select_grid, select_tokens},
    model::{AnnualEnergyPoint, ComputeRecord, GridState, Provenance, TokenRecord},
    source::{Document, SourceLoader},
};
use chrono::Utc;
use rand::{SeedableRng, rngs::StdRng};
use tracing::info;

/// Every dataset resolved at startup, live or synthesised.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedSources {
    pub compute: Selected<ComputeRecord>,
    pub tokens: Selected<TokenRecord>,
    pub grid: GridState,
    pub grid_provenance: Provenance,
    pub annual_energy: Selected<AnnualEnergyPoint>,
}

/// Fetch all documents concurrently and select live or fallback data for each.
pub async fn load_sources(
    loader: &SourceLoader,
    config: &PipelineConfig,
    fallback_seed: u64,
) -> Result<LoadedSources, PipelineError> {
    let (compute, tokens, grid, annual_energy) = futures::join!(
        loader.load(Document::ComputePrices),
        loader.load(Document::TokenPrices),
        loader.load(Document::GridState),
        loader.load(Document::AnnualEnergyHistory),
    );

    let now = Utc::now();
    let compute = select_compute(compute, fallback_seed, now)?;
    let tokens = select_tokens(tokens, fallback_seed, now)?;
    let (grid, grid_provenance) = select_grid(grid, config.power.grid_state(), now);
    let annual_energy = select_annual_energy(annual_energy, now)?;

    Ok(LoadedSources {
        compute,
        tokens,
        grid,
        grid_provenance,
        annual_energy,
    })
}

/// Validate the config, resolve every source, and build the initial [`Dashboard`].
pub async fn bootstrap(
    loader: &SourceLoader,
    config: &PipelineConfig,
) -> Result<Dashboard, PipelineError> {
    config.validate()?;

    let fallback_seed = config.seed.unwrap_or_else(rand::random);
    let sources = load_sources(loader, config, fallback_seed).await?;

    info!(
        base_url = %loader.base_url(),
        compute = sources.compute.records.len(),
        compute_live = sources.compute.provenance.is_live(),
        tokens = sources.tokens.records.len(),
        tokens_live = sources.tokens.provenance.is_live(),
        grid_live = sources.grid_provenance.is_live(),
        "bootstrap complete"
    );

    Ok(Dashboard::new(
        sources,
        config.mutation.clone(),
        config.history_window,
    ))
}

/// Rng driving the live mutator: seeded when configured, otherwise from the OS.
pub fn mutation_rng(config: &PipelineConfig) -> StdRng {
    match config.seed {
        // Offset so the drift stream differs from the fallback synthesis stream.
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
        None => StdRng::from_os_rng(),
    }
}
