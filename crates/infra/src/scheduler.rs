//! Background cache clearing.
//!
//! Each registered cache gets its own tokio task that clears it every
//! interval. Clearing never reloads: the next reader does that.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use certgate_auth::Invalidate;

struct Target {
    name: &'static str,
    interval: Duration,
    cache: Arc<dyn Invalidate>,
}

/// Clears registered caches on fixed intervals.
#[derive(Default)]
pub struct CacheRefreshScheduler {
    targets: Vec<Target>,
}

impl CacheRefreshScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear `cache` every `interval`, starting one interval from spawn.
    pub fn register(mut self, name: &'static str, interval: Duration, cache: Arc<dyn Invalidate>) -> Self {
        self.targets.push(Target { name, interval, cache });
        self
    }

    /// Spawn one task per target on the current tokio runtime.
    pub fn spawn(self) -> CacheRefreshHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let started = Instant::now();

        let mut counters = BTreeMap::new();
        let mut tasks = Vec::with_capacity(self.targets.len());
        for target in self.targets {
            let counter = Arc::new(AtomicU64::new(0));
            if counters.insert(target.name, Arc::clone(&counter)).is_some() {
                warn!(cache = target.name, "cache registered twice; counters are shared");
            }
            tasks.push(tokio::spawn(refresh_loop(target, counter, shutdown_rx.clone())));
        }
        info!(targets = tasks.len(), "cache refresh scheduler started");

        CacheRefreshHandle {
            shutdown: shutdown_tx,
            tasks,
            counters,
            started,
        }
    }
}

async fn refresh_loop(target: Target, counter: Arc<AtomicU64>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval_at(Instant::now() + target.interval, target.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                target.cache.invalidate();
                counter.fetch_add(1, Ordering::Relaxed);
                debug!(cache = target.name, "cache cleared");
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!(cache = target.name, "cache refresh task stopped");
}

/// Scheduler runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SchedulerStats {
    /// Completed clears per cache name.
    pub invalidations: BTreeMap<String, u64>,
    pub uptime_secs: u64,
}

/// Handle to control a running scheduler.
#[derive(Debug)]
pub struct CacheRefreshHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    counters: BTreeMap<&'static str, Arc<AtomicU64>>,
    started: Instant,
}

impl CacheRefreshHandle {
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            invalidations: self
                .counters
                .iter()
                .map(|(name, count)| (name.to_string(), count.load(Ordering::Relaxed)))
                .collect(),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }

    /// Stop every task and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "cache refresh task ended abnormally");
            }
        }
        info!("cache refresh scheduler stopped");
    }
}
