//! Background rollup task
//!
//! Periodically persists the statistics window together with store gauges.
//! The task stays scheduled when statistics are disabled and skips ticks
//! until they are turned back on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument};

use super::engine::StatisticsEngine;
use super::summary::Gauges;
use crate::error::Result;
use crate::store::CacheStore;

/// Periodic persistence of one cache's statistics
pub struct RollupTask {
    stats: Arc<StatisticsEngine>,
    store: Arc<dyn CacheStore>,
    interval: Duration,
    shutdown: AtomicBool,
    wake: Notify,
}

impl RollupTask {
    pub fn new(
        stats: Arc<StatisticsEngine>,
        store: Arc<dyn CacheStore>,
        interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            stats,
            store,
            interval,
            shutdown: AtomicBool::new(false),
            wake: Notify::new(),
        })
    }

    /// Spawn [`run`](Self::run) on the current runtime
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run())
    }

    /// Run the rollup loop until [`shutdown`](Self::shutdown)
    #[instrument(skip(self), fields(cache = %self.stats.cache_name()))]
    pub async fn run(self: Arc<Self>) {
        info!("Starting statistics rollup every {:?}", self.interval);

        let mut tick = interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if self.shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    if !self.stats.is_enabled() {
                        debug!("Statistics disabled, skipping rollup");
                        continue;
                    }
                    if let Err(e) = self.tick_once().await {
                        error!("Statistics rollup failed: {}", e);
                    }
                }

                _ = self.wake.notified() => {
                    if self.shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                }
            }
        }

        info!("Statistics rollup stopped");
    }

    /// Persist once with the store's current gauges
    pub async fn tick_once(&self) -> Result<()> {
        let gauges = Gauges::from_store(&self.store.stats(), self.stats.uptime_secs());
        self.stats.persist(gauges).await
    }

    /// Signal shutdown
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.wake.notify_one();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{Period, StatisticsConfig};
    use crate::store::InMemoryStore;

    fn setup() -> (Arc<StatisticsEngine>, Arc<dyn CacheStore>) {
        let stats = Arc::new(StatisticsEngine::in_memory(
            "rollup",
            StatisticsConfig::default(),
        ));
        let store: Arc<dyn CacheStore> = Arc::new(InMemoryStore::new());
        (stats, store)
    }

    #[tokio::test]
    async fn test_tick_once_records_gauges() {
        let (stats, store) = setup();
        store
            .set("k", bytes::Bytes::from_static(b"abcd"), None)
            .await
            .unwrap();
        stats.record_hit(Duration::from_millis(1), Some("k"), None);

        let task = RollupTask::new(stats.clone(), store, Duration::from_secs(60));
        task.tick_once().await.unwrap();

        let rows = stats.stats(Some(Period::Daily), None, None).await.unwrap();
        assert_eq!(rows[0].gauges.item_count, 1);
        assert_eq!(rows[0].gauges.memory_usage_bytes, 4);
    }

    #[tokio::test]
    async fn test_loop_persists_and_stops() {
        let (stats, store) = setup();
        stats.record_hit(Duration::from_millis(1), None, None);

        let task = RollupTask::new(stats.clone(), store, Duration::from_millis(20));
        let handle = task.spawn();
        tokio::time::sleep(Duration::from_millis(120)).await;

        task.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("rollup did not stop")
            .unwrap();

        let rows = stats.stats(Some(Period::Hourly), None, None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].hits, 1);
    }

    #[tokio::test]
    async fn test_disabled_statistics_skip_ticks() {
        let (stats, store) = setup();
        stats.record_hit(Duration::from_millis(1), None, None);
        stats.set_enabled(false);

        let task = RollupTask::new(stats.clone(), store, Duration::from_millis(10));
        let handle = task.spawn();
        tokio::time::sleep(Duration::from_millis(60)).await;
        task.shutdown();
        handle.await.unwrap();

        stats.set_enabled(true);
        assert!(stats.stats(None, None, None).await.unwrap().is_empty());
    }
}
