//! Scheduled background refresh of the registry

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::Notify,
    task::{JoinError, JoinHandle},
    time::MissedTickBehavior,
};

use crate::{RefreshOutcome, Registry};

/// Handle to a registry's background refresh loop
///
/// Dropping the handle detaches the loop, which then runs for as long as
/// the runtime does.
#[derive(Debug)]
#[must_use = "dropping the handle detaches the refresh loop"]
pub struct RefreshTask {
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
}

impl RefreshTask {
    /// Stops scheduling refresh cycles
    ///
    /// A cycle already in flight is allowed to finish.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(err) = self.join.await {
            log_join_error(&err, "registry refresh loop");
        }
    }
}

fn log_join_error(err: &JoinError, what: &'static str) {
    if err.is_panic() {
        tracing::error!(task = what, "panicked, keeping current registry");
    } else if err.is_cancelled() {
        tracing::info!(task = what, "was cancelled");
    }
}

impl Registry {
    /// Spawns a task that refreshes the registry once per refresh period
    ///
    /// The first cycle runs one period after spawning. Cycles never
    /// overlap, and ticks missed while a slow cycle runs are skipped.
    /// Errors and panics in a cycle are logged and the loop carries on
    /// with the previous snapshot.
    pub fn spawn_refresh(&self) -> RefreshTask {
        let shutdown = Arc::new(Notify::new());
        let join = tokio::spawn(refresh_forever(self.clone(), shutdown.clone()));

        RefreshTask { shutdown, join }
    }
}

async fn refresh_forever(registry: Registry, shutdown: Arc<Notify>) {
    let period = registry.refresh_period().max(Duration::from_millis(1));
    let mut timer = tokio::time::interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    timer.tick().await;

    tracing::debug!(period = ?period, "registry refresh loop started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.notified() => break,
            _ = timer.tick() => {}
        }

        let cycle = registry.clone();
        match tokio::spawn(async move { cycle.refresh_now().await }).await {
            Ok(Ok(RefreshOutcome::Published { records })) => {
                tracing::trace!(registry.records = records, "scheduled refresh published");
            }
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                let error: &dyn std::error::Error = &err;
                tracing::warn!(error, "scheduled refresh failed, keeping current registry");
            }
            Err(err) => log_join_error(&err, "scheduled refresh cycle"),
        }
    }

    tracing::debug!("registry refresh loop stopped");
}
