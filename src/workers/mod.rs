//! Long-lived polling workers.
//!
//! Each worker owns its own timer and claims at most one document per tick.
//! A tick error is logged and absorbed; the loop only exits on shutdown.

pub mod ocr;
pub mod parse;

use std::time::Duration;

use tokio::{sync::watch, time::MissedTickBehavior};

use crate::prelude::*;

/// One stage of the pipeline, driven by [`run`].
#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &'static str;

    fn poll_interval(&self) -> Duration;

    /// Process at most one claimed document. Returns whether anything was
    /// claimed. Per-document failures are recorded on the document itself;
    /// an `Err` here means the store or another shared resource misbehaved.
    async fn tick(&self) -> Result<bool>;
}

/// Poll `worker` until `shutdown` flips to true.
pub async fn run(worker: &dyn Worker, mut shutdown: watch::Receiver<bool>) {
    let mut timer = tokio::time::interval(worker.poll_interval());
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(worker = worker.name(), "worker started");
    loop {
        tokio::select! {
            _ = timer.tick() => {
                if let Err(err) = worker.tick().await {
                    error!(worker = worker.name(), "tick failed: {:#}", err);
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!(worker = worker.name(), "worker stopping");
                    return;
                }
            }
        }
    }
}
