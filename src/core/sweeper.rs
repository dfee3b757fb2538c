//! # Background Sweepers
//!
//! Periodic cleanup tasks for the in-memory stores (idle buckets, expired
//! cache entries, expired idempotency records). Each sweeper is a tokio task
//! ticking on a fixed interval; all of them share one `CancellationToken` so
//! shutdown stops every task and waits for it to exit.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A store that can purge its own stale entries
pub trait Sweep: Send + Sync + 'static {
    /// Name used in logs
    fn sweep_name(&self) -> &'static str;

    /// Remove stale entries, returning how many were dropped
    fn sweep(&self) -> usize;
}

/// Owns the running sweep tasks
pub struct BackgroundSweeper {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundSweeper {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// Spawn a task calling `target.sweep()` every `period`
    pub fn spawn(&mut self, target: Arc<dyn Sweep>, period: Duration) {
        let token = self.token.clone();
        let name = target.sweep_name();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        match catch_unwind(AssertUnwindSafe(|| target.sweep())) {
                            Ok(0) => {}
                            Ok(removed) => debug!(sweeper = name, removed, "Sweep completed"),
                            Err(_) => warn!(sweeper = name, "Sweep pass panicked, continuing"),
                        }
                    }
                }
            }

            debug!(sweeper = name, "Sweeper stopped");
        });

        info!(sweeper = name, period_ms = period.as_millis() as u64, "Sweeper started");
        self.handles.push(handle);
    }

    /// Number of running tasks
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Cancel every task and wait for them to finish
    pub async fn shutdown(self) {
        self.token.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!("Sweeper task ended abnormally: {}", e);
            }
        }
    }
}

impl Default for BackgroundSweeper {
    fn default() -> Self {
        Self::new()
    }
}
