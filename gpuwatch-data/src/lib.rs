#![forbid(unsafe_code)]

//! # gpuwatch-data
//! Live price pipeline behind the gpuwatch dashboard.
//!
//! Price documents for GPU rentals and LLM tokens are loaded once from a base url,
//! normalised into canonical records, and replaced with seeded synthetic data
//! whenever a source is unusable. A periodic ticker then drifts the records,
//! recomputes the composite indices and appends bounded history for trend charts.
//!
//! ```text
//! SourceLoader -> normalise (fallback on error) -> Dashboard
//!                                                     |
//!                           ticker: mutate -> Indices -> HistoryRing -> DashboardSnapshot
//! ```

/// All errors and failure classifications generated in `gpuwatch-data`.
pub mod error;

/// [`PipelineConfig`](config::PipelineConfig) defaults, builders and env overrides.
pub mod config;

/// Canonical record shapes.
pub mod model;

/// Document fetching and outcome classification.
pub mod source;

/// Provider schema normalisation and record validation.
pub mod normalise;

/// Seeded fallback datasets and live-versus-fallback selection.
pub mod fallback;

/// Stochastic price drift.
pub mod mutate;

/// Composite indices.
pub mod index;

/// Bounded trend series.
pub mod history;

/// Owned pipeline aggregate and its snapshots.
pub mod dashboard;

/// Startup orchestration.
pub mod bootstrap;

/// Cancellable periodic tick driver.
pub mod ticker;

pub use bootstrap::{bootstrap, mutation_rng};
pub use config::PipelineConfig;
pub use dashboard::{Dashboard, DashboardSnapshot, SharedDashboard};
pub use error::{FetchError, PipelineError, SourceErrorKind};
pub use source::{Classification, Document, SourceLoader};
pub use ticker::{TickerHandle, spawn_ticker};
