//! Periodic driver for [`Dashboard::tick`](crate::dashboard::Dashboard::tick).
//!
//! The tick handler runs inline on the ticker task, so no two ticks overlap. With
//! [`MissedTickBehavior::Delay`] a slow tick pushes the next one back instead of
//! bursting to catch up.

use crate::{
    dashboard::{DashboardSnapshot, SharedDashboard},
    error::PipelineError,
};
use chrono::Utc;
use rand::Rng;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, error, info};

/// Handle to a running ticker. Dropping it aborts the task.
#[derive(Debug)]
pub struct TickerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<Result<(), PipelineError>>>,
}

impl TickerHandle {
    /// Stop ticking and wait for the in-flight tick, if any, to finish.
    pub async fn shutdown(mut self) -> Result<(), PipelineError> {
        let _ = self.shutdown_tx.send(true);
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|error| PipelineError::Ticker(error.to_string()))?,
            None => Ok(()),
        }
    }

    /// Resolve when the ticker task ends on its own, which only happens on a tick failure.
    ///
    /// Cancel safe: dropping the future leaves the task running.
    pub async fn wait(&mut self) -> Result<(), PipelineError> {
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };
        let outcome = task.await;
        self.task = None;
        outcome.map_err(|error| PipelineError::Ticker(error.to_string()))?
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for TickerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Spawn the ticker. After every tick a fresh snapshot is published on `snapshots`.
///
/// The first tick fires one `period` after spawning.
pub fn spawn_ticker<R>(
    dashboard: SharedDashboard,
    period: Duration,
    mut rng: R,
    snapshots: broadcast::Sender<Arc<DashboardSnapshot>>,
) -> TickerHandle
where
    R: Rng + Send + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        info!(period_ms = period.as_millis() as u64, "starting ticker");

        let start = tokio::time::Instant::now() + period;
        let mut timer = tokio::time::interval_at(start, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("ticker shutdown requested");
                    return Ok(());
                }
                _ = timer.tick() => {}
            }

            let outcome = {
                let mut dashboard = dashboard.lock();
                dashboard
                    .tick(&mut rng, Utc::now())
                    .map(|summary| (summary, dashboard.snapshot()))
            };

            match outcome {
                Ok((summary, snapshot)) => {
                    debug!(
                        tick = summary.tick,
                        compute_changed = summary.mutation.compute_changed,
                        token_changed = summary.mutation.token_changed,
                        volatility = snapshot.indices.volatility_index,
                        "tick complete"
                    );
                    // No subscribers is fine; the snapshot is also readable via the lock.
                    let _ = snapshots.send(Arc::new(snapshot));
                }
                Err(error) => {
                    error!(%error, "tick failed, stopping ticker");
                    return Err(PipelineError::from(error));
                }
            }
        }
    });

    TickerHandle {
        shutdown_tx,
        task: Some(task),
    }
}
