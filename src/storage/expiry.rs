//! Background Expiry Sweeper
//!
//! Store callbacks hide expired records the moment they are read, but only
//! the sweeper gives their memory back. It is a Tokio task that walks both
//! tiers of both stores on an interval that tracks how much it finds.
//!
//! ```text
//!   sleep(interval) ──> sweep strings ──> sweep objects ──> SweepReport
//!        ▲                                                     │
//!        └──────────── Cadence::adjust(report) ◄───────────────┘
//! ```

use crate::error::{KvError, Result};
use crate::storage::StoreEngine;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiryConfig {
    /// Interval of the first sweep (default: 100ms)
    pub base_interval: Duration,

    /// Floor the interval never drops below (default: 10ms)
    pub min_interval: Duration,

    /// Ceiling the interval never grows above (default: 1s)
    pub max_interval: Duration,

    /// Expired share of a sweep above which the interval halves
    pub speedup_threshold: f64,

    /// Expired share of a sweep below which the interval doubles
    pub slowdown_threshold: f64,
}

impl ExpiryConfig {
    /// Checks that the interval bounds are ordered and non-zero.
    pub fn validate(&self) -> Result<()> {
        if self.min_interval.is_zero() {
            return Err(KvError::Config("expiry min_interval must be non-zero".into()));
        }
        if self.min_interval > self.max_interval {
            return Err(KvError::Config(format!(
                "expiry min_interval ({:?}) exceeds max_interval ({:?})",
                self.min_interval, self.max_interval
            )));
        }
        Ok(())
    }
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(100),
            min_interval: Duration::from_millis(10),
            max_interval: Duration::from_secs(1),
            speedup_threshold: 0.25,
            slowdown_threshold: 0.01,
        }
    }
}

/// What one pass over the engine found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Records present when the pass started
    pub scanned: usize,
    pub expired_strings: u64,
    pub expired_objects: u64,
}

impl SweepReport {
    /// Runs one pass over both stores.
    pub fn sweep(engine: &StoreEngine) -> Self {
        let scanned = engine.len();
        let expired_strings = engine.string_store().cleanup_expired();
        let expired_objects = engine.object_store().map_or(0, |o| o.cleanup_expired());
        Self {
            scanned,
            expired_strings,
            expired_objects,
        }
    }

    pub fn expired(&self) -> u64 {
        self.expired_strings + self.expired_objects
    }

    /// Share of the scanned records that had expired.
    pub fn expiry_rate(&self) -> f64 {
        if self.scanned == 0 {
            0.0
        } else {
            self.expired() as f64 / self.scanned as f64
        }
    }
}

/// Sweep interval that halves under heavy expiry and doubles when idle.
#[derive(Debug, Clone)]
struct Cadence {
    interval: Duration,
    config: ExpiryConfig,
}

impl Cadence {
    fn new(config: ExpiryConfig) -> Self {
        // max before min so inverted bounds resolve to max_interval
        Self {
            interval: config
                .base_interval
                .max(config.min_interval)
                .min(config.max_interval),
            config,
        }
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn adjust(&mut self, report: &SweepReport) {
        if report.scanned == 0 {
            return;
        }
        let rate = report.expiry_rate();
        if rate > self.config.speedup_threshold {
            self.interval = (self.interval / 2).max(self.config.min_interval);
            debug!(
                expired = report.expired(),
                rate = %format!("{:.2}%", rate * 100.0),
                interval_ms = self.interval.as_millis() as u64,
                "High expiry rate, speeding up sweeper"
            );
        } else if rate < self.config.slowdown_threshold && report.expired() == 0 {
            self.interval = (self.interval * 2).min(self.config.max_interval);
            trace!(
                interval_ms = self.interval.as_millis() as u64,
                "No expired records, slowing down sweeper"
            );
        }
    }
}

/// Handle to the running sweeper task. Dropping it stops the task.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    passes: Arc<AtomicU64>,
}

impl ExpirySweeper {
    /// Spawns the sweeper on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime, like `tokio::spawn`.
    pub fn start(engine: Arc<StoreEngine>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let passes = Arc::new(AtomicU64::new(0));

        info!(
            base_interval_ms = config.base_interval.as_millis() as u64,
            object_store = engine.object_store().is_some(),
            "Background expiry sweeper started"
        );
        let task = tokio::spawn(sweeper_loop(
            engine,
            Cadence::new(config),
            Arc::clone(&passes),
            shutdown_rx,
        ));

        Self {
            shutdown_tx,
            task: Some(task),
            passes,
        }
    }

    /// Number of completed sweeps.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Signals the task and waits for it to exit.
    pub async fn shutdown(mut self) {
        self.signal();
        if let Some(task) = self.task.take() {
            // a panicked sweep has nothing left to clean up
            let _ = task.await;
        }
    }

    fn signal(&self) {
        if self.shutdown_tx.send(true).is_ok() {
            info!(passes = self.passes(), "Background expiry sweeper stopped");
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.signal();
        }
    }
}

async fn sweeper_loop(
    engine: Arc<StoreEngine>,
    mut cadence: Cadence,
    passes: Arc<AtomicU64>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(cadence.interval()) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let report = SweepReport::sweep(&engine);
        passes.fetch_add(1, Ordering::Relaxed);
        cadence.adjust(&report);

        if report.expired() > 0 {
            debug!(
                strings = report.expired_strings,
                objects = report.expired_objects,
                remaining = engine.len(),
                "Expired records cleaned up"
            );
        }
    }
}

/// Starts the sweeper with the engine's own expiry configuration.
pub fn start_expiry_sweeper(engine: Arc<StoreEngine>) -> ExpirySweeper {
    let config = engine.config().expiry.clone();
    ExpirySweeper::start(engine, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::OpStatus;
    use crate::storage::clock;
    use crate::storage::object::StoreObject;
    use crate::storage::StoreScope;
    use bytes::Bytes;

    fn fast() -> ExpiryConfig {
        ExpiryConfig {
            base_interval: Duration::from_millis(10),
            ..Default::default()
        }
    }

    fn report(scanned: usize, expired: u64) -> SweepReport {
        SweepReport {
            scanned,
            expired_strings: expired,
            expired_objects: 0,
        }
    }

    #[test]
    fn test_cadence_speeds_up_and_backs_off() {
        let mut cadence = Cadence::new(ExpiryConfig::default());
        assert_eq!(cadence.interval(), Duration::from_millis(100));

        cadence.adjust(&report(100, 50));
        assert_eq!(cadence.interval(), Duration::from_millis(50));
        for _ in 0..10 {
            cadence.adjust(&report(100, 50));
        }
        assert_eq!(cadence.interval(), Duration::from_millis(10));

        for _ in 0..10 {
            cadence.adjust(&report(100, 0));
        }
        assert_eq!(cadence.interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_cadence_holds_between_thresholds() {
        let mut cadence = Cadence::new(ExpiryConfig::default());
        cadence.adjust(&report(100, 10));
        assert_eq!(cadence.interval(), Duration::from_millis(100));

        // an empty engine says nothing about the expiry rate
        cadence.adjust(&report(0, 0));
        assert_eq!(cadence.interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_inverted_bounds_do_not_panic() {
        let config = ExpiryConfig {
            min_interval: Duration::from_secs(2),
            max_interval: Duration::from_millis(500),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(KvError::Config(_))));

        let cadence = Cadence::new(config);
        assert_eq!(cadence.interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_sweep_report_counts_both_stores() {
        let engine = StoreEngine::default();
        let engine = Arc::new(engine);
        let mut session = engine.session();

        let past = clock::now_ticks() - 1;
        session.set_with_expiration(b"s", b"v", past);
        session
            .set_object(
                Bytes::from("o"),
                StoreObject::set([Bytes::from("m")]).with_expiration(past),
            )
            .unwrap();
        session.set(b"live", b"v");

        let report = SweepReport::sweep(&engine);
        assert_eq!(report.scanned, 3);
        assert_eq!(report.expired_strings, 1);
        assert_eq!(report.expired_objects, 1);
        assert_eq!(engine.len(), 1);
    }

    #[tokio::test]
    async fn test_sweeper_reclaims_expired_records() {
        let engine = Arc::new(StoreEngine::default());
        let mut session = engine.session();

        for i in 0..10 {
            session.setex(format!("key{}", i).as_bytes(), b"value", Duration::from_millis(50));
        }
        session.set(b"persistent", b"value");
        assert_eq!(engine.len(), 11);

        let sweeper = ExpirySweeper::start(Arc::clone(&engine), fast());
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(engine.len(), 1);
        assert_eq!(session.exists(b"persistent", StoreScope::Both), OpStatus::Ok);
        assert!(sweeper.passes() > 0);
        sweeper.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweeper_reaches_objects_and_evicted_records() {
        let engine = Arc::new(StoreEngine::default());
        let mut session = engine.session();

        let soon = clock::ticks_from_now(Duration::from_millis(30));
        session
            .set_object(
                Bytes::from("obj"),
                StoreObject::list([Bytes::from("a")]).with_expiration(soon),
            )
            .unwrap();
        session.setex(b"cold", b"value", Duration::from_millis(30));
        engine.evict(b"cold");
        assert_eq!(engine.len(), 2);

        let _sweeper = start_expiry_sweeper(Arc::clone(&engine));
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(engine.is_empty());
        assert_eq!(engine.stats().expired, 2);
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_drop() {
        let engine = Arc::new(StoreEngine::default());

        {
            let _sweeper = ExpirySweeper::start(Arc::clone(&engine), fast());
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let mut session = engine.session();
        session.setex(b"key", b"value", Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Nothing swept the record, but lazy expiry already hides it
        assert_eq!(engine.len(), 1);
        assert_eq!(session.get_value(b"key"), None);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_task() {
        let engine = Arc::new(StoreEngine::default());
        let sweeper = ExpirySweeper::start(Arc::clone(&engine), fast());
        tokio::time::sleep(Duration::from_millis(30)).await;
        sweeper.shutdown().await;

        let mut session = engine.session();
        session.setex(b"key", b"value", Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.len(), 1);
    }
}
