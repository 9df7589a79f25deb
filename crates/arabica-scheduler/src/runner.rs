//! Background runner: drives a [`LifecycleEngine`] on a tokio interval.
//! Sleeps between checks; each tick runs on the blocking pool so file I/O
//! stays off the async workers and a panicking tick cannot take the loop down.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::lifecycle::{LifecycleEngine, TickReport};

/// Handle to a running lifecycle loop.
pub struct LifecycleRunner {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl LifecycleRunner {
    /// Start ticking after `initial_delay`, then every `interval`.
    pub fn start(engine: Arc<LifecycleEngine>, interval: Duration, initial_delay: Duration) -> Self {
        let shutdown = Arc::new(Notify::new());
        let stop = shutdown.clone();

        let handle = tokio::spawn(async move {
            let kind = engine.kind();
            tracing::info!(
                "⏰ {kind} runner started (first check in {}s, then every {}s)",
                initial_delay.as_secs(),
                interval.as_secs()
            );

            tokio::select! {
                _ = tokio::time::sleep(initial_delay) => {}
                _ = stop.notified() => {
                    tracing::info!("{kind} runner stopped before first tick");
                    return;
                }
            }

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        run_tick(&engine).await;
                    }
                    _ = stop.notified() => break,
                }
            }
            tracing::info!("{kind} runner stopped");
        });

        Self { shutdown, handle }
    }

    /// Stop the loop. An in-flight tick is allowed to finish.
    pub async fn stop(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.handle.await {
            tracing::error!("Runner task ended abnormally: {e}");
        }
    }
}

/// Run one tick off the async workers. A panic is logged and reported as `None`.
pub async fn run_tick(engine: &Arc<LifecycleEngine>) -> Option<TickReport> {
    let engine = engine.clone();
    let kind = engine.kind();
    match tokio::task::spawn_blocking(move || engine.tick()).await {
        Ok(report) => Some(report),
        Err(e) => {
            tracing::error!("💥 {kind} tick crashed: {e}");
            None
        }
    }
}
