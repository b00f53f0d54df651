//! Engine construction and the background refresh task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use common::FsEngine;

use crate::config::Config;
use crate::sources;

/// Engine wired to the sources `config` describes. Nothing is visible until
/// the first refresh.
pub fn build_engine(config: &Config) -> FsEngine {
    FsEngine::new(sources::from_config(config), config.engine_config())
}

/// Handle to a running refresh task. Dropping it does not stop the task;
/// call [`RefreshHandle::shutdown`].
#[derive(Debug)]
pub struct RefreshHandle {
    trigger: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    /// Ask for a refresh now instead of waiting for the timer.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Stop the task and wait for a refresh in progress to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "refresh task ended abnormally");
        }
    }
}

/// Refresh `engine` every `interval` and whenever triggered.
///
/// The first timer tick is one full interval away; callers perform the
/// initial refresh themselves.
pub fn spawn_refresh_loop(engine: FsEngine, interval: Duration) -> RefreshHandle {
    let trigger = Arc::new(Notify::new());
    let (shutdown, mut stopped) = watch::channel(false);

    let notified = trigger.clone();
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let reason = tokio::select! {
                _ = ticker.tick() => "timer",
                _ = notified.notified() => "requested",
                _ = stopped.changed() => break,
            };
            match engine.refresh().await {
                Ok(generation) => tracing::debug!(reason, generation, "refresh complete"),
                Err(e) => tracing::warn!(reason, error = %e, "refresh failed"),
            }
        }
        tracing::debug!("refresh task stopped");
    });

    RefreshHandle {
        trigger,
        shutdown,
        task,
    }
}
