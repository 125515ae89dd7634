//! The owned aggregate of every pipeline output.
//!
//! A [`Dashboard`] is built once by [`bootstrap`](crate::bootstrap::bootstrap) and then
//! advanced by [`Dashboard::tick`]. Consumers only ever see [`DashboardSnapshot`]
//! copies, so a reader can never observe a half-applied tick.

use crate::{
    bootstrap::LoadedSources,
    config::MutationConfig,
    error::HistoryError,
    history::{HistoryPoint, HistoryRing, SeriesId},
    index::Indices,
    model::{AnnualEnergyPoint, ComputeRecord, GridState, Provenance, TokenRecord},
    mutate::{MutationReport, mutate},
};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Single lock guarding the whole aggregate. A tick holds it for the full
/// mutate, index and history batch.
pub type SharedDashboard = Arc<Mutex<Dashboard>>;

/// Provenance of each source dataset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SourceProvenance {
    pub compute: Provenance,
    pub tokens: Provenance,
    pub grid: Provenance,
    pub annual_energy: Provenance,
}

/// Outcome of one [`Dashboard::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub tick: u64,
    pub mutation: MutationReport,
}

#[derive(Debug, Clone)]
pub struct Dashboard {
    compute: Vec<ComputeRecord>,
    tokens: Vec<TokenRecord>,
    grid: GridState,
    annual_energy: Vec<AnnualEnergyPoint>,
    provenance: SourceProvenance,
    indices: Indices,
    history: HistoryRing<SeriesId>,
    mutation: MutationConfig,
    tick: u64,
    last_tick_at: Option<DateTime<Utc>>,
}

impl Dashboard {
    /// Callers must pass a validated [`MutationConfig`] and a non-zero window;
    /// [`bootstrap`](crate::bootstrap::bootstrap) is the public entry point.
    pub(crate) fn new(
        sources: LoadedSources,
        mutation: MutationConfig,
        history_window: usize,
    ) -> Self {
        let LoadedSources {
            compute,
            tokens,
            grid,
            grid_provenance,
            annual_energy,
        } = sources;

        let indices = Indices::compute(&compute.records, &tokens.records, &grid);

        Self {
            provenance: SourceProvenance {
                compute: compute.provenance,
                tokens: tokens.provenance,
                grid: grid_provenance,
                annual_energy: annual_energy.provenance,
            },
            compute: compute.records,
            tokens: tokens.records,
            grid,
            annual_energy: annual_energy.records,
            indices,
            history: HistoryRing::new(SeriesId::ALL, history_window),
            mutation,
            tick: 0,
            last_tick_at: None,
        }
    }

    pub fn into_shared(self) -> SharedDashboard {
        Arc::new(Mutex::new(self))
    }

    /// Advance one tick: drift records, recompute indices, append history.
    pub fn tick<R>(&mut self, rng: &mut R, now: DateTime<Utc>) -> Result<TickSummary, HistoryError>
    where
        R: Rng + ?Sized,
    {
        let mutation = mutate(&mut self.compute, &mut self.tokens, &self.mutation, rng, now);
        self.indices = Indices::compute(&self.compute, &self.tokens, &self.grid);

        let label = now.format("%H:%M:%S").to_string();
        let samples = [
            (SeriesId::ComputePrice, self.indices.mean_compute_price),
            (SeriesId::TokenPrice, self.indices.mean_token_input_price),
            (SeriesId::GridLoad, self.indices.grid_load_gw),
        ];
        for (series, value) in samples {
            self.history
                .push(&series, HistoryPoint::new(label.clone(), value))?;
        }

        self.tick += 1;
        self.last_tick_at = Some(now);

        Ok(TickSummary {
            tick: self.tick,
            mutation,
        })
    }

    pub fn compute(&self) -> &[ComputeRecord] {
        &self.compute
    }

    pub fn tokens(&self) -> &[TokenRecord] {
        &self.tokens
    }

    pub fn grid(&self) -> &GridState {
        &self.grid
    }

    pub fn indices(&self) -> &Indices {
        &self.indices
    }

    pub fn provenance(&self) -> &SourceProvenance {
        &self.provenance
    }

    pub fn history(&self) -> &HistoryRing<SeriesId> {
        &self.history
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        DashboardSnapshot {
            tick: self.tick,
            last_tick_at: self.last_tick_at,
            compute: self.compute.clone(),
            tokens: self.tokens.clone(),
            grid: self.grid.clone(),
            annual_energy: self.annual_energy.clone(),
            indices: self.indices.clone(),
            history: self.history.snapshot_all(),
            provenance: self.provenance.clone(),
        }
    }
}

/// Immutable, serialisable copy of a [`Dashboard`] handed to presentation.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DashboardSnapshot {
    pub tick: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub compute: Vec<ComputeRecord>,
    pub tokens: Vec<TokenRecord>,
    pub grid: GridState,
    pub annual_energy: Vec<AnnualEnergyPoint>,
    pub indices: Indices,
    pub history: IndexMap<SeriesId, Vec<HistoryPoint>>,
    pub provenance: SourceProvenance,
}
