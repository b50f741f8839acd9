//! The viewer worker pool controller.
//!
//! The pool owns every live viewer worker and is the only writer of the
//! shared running/target state. Its three operations -- start, stop and the
//! two scale directions -- are serialized behind one async mutex so that at
//! most one pool-size transition is ever in flight; a stop is not complete
//! until every previously active worker handle has terminated.

use std::sync::Arc;

use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::generator::viewer::{self, Viewer};
use crate::signals::Shutdown;

fn default_endpoint() -> String {
    "ws://127.0.0.1:8080/ws".to_string()
}

fn default_workers() -> u32 {
    3
}

fn default_max_workers() -> u32 {
    10
}

fn default_min_delay() -> f64 {
    1.0
}

fn default_max_delay() -> f64 {
    4.0
}

fn default_reconnect_delay() -> f64 {
    2.0
}

fn default_stagger_min() -> f64 {
    1.0
}

fn default_stagger_max() -> f64 {
    2.0
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
/// Configuration of the worker pool.
pub struct Config {
    /// `WebSocket` URL of the ingestion endpoint workers send to.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Worker target before any scaling is applied.
    #[serde(default = "default_workers")]
    pub default_workers: u32,
    /// Hard ceiling on workers per start, regardless of scaling.
    #[serde(default = "default_max_workers")]
    pub max_workers: u32,
    /// Lower bound of the pacing delay between events, seconds.
    #[serde(default = "default_min_delay")]
    pub min_delay: f64,
    /// Upper bound of the pacing delay between events, seconds.
    #[serde(default = "default_max_delay")]
    pub max_delay: f64,
    /// Fixed backoff before a worker reconnects, seconds.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay: f64,
    /// Lower bound of the jitter between worker launches and joins, seconds.
    #[serde(default = "default_stagger_min")]
    pub stagger_min: f64,
    /// Upper bound of the jitter between worker launches and joins, seconds.
    #[serde(default = "default_stagger_max")]
    pub stagger_max: f64,
    /// Seed for deterministic traffic; drawn at random when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            default_workers: default_workers(),
            max_workers: default_max_workers(),
            min_delay: default_min_delay(),
            max_delay: default_max_delay(),
            reconnect_delay: default_reconnect_delay(),
            stagger_min: default_stagger_min(),
            stagger_max: default_stagger_max(),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Outcome of a start request.
pub enum StartStatus {
    /// The pool was idle and `count` workers were launched.
    Started {
        /// Number of workers launched.
        count: u32,
    },
    /// The pool was already running; nothing changed.
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Outcome of a stop request.
pub enum StopStatus {
    /// The pool was running and every worker has now terminated.
    Stopped {
        /// Number of worker handles drained.
        drained: u32,
    },
    /// The pool was not running; nothing changed.
    NotRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Outcome of a scale request.
pub struct ScaleOutcome {
    /// The target worker count after applying the factor.
    pub target: u32,
    /// Result of the start that scaling re-invokes.
    pub start: StartStatus,
}

/// Per-transition pool state, guarded by the controller mutex.
#[derive(Debug)]
struct Inner {
    running: bool,
    target_count: u32,
    shutdown: Option<Shutdown>,
    workers: JoinSet<Result<(), viewer::Error>>,
}

#[derive(Debug)]
/// The worker pool controller.
pub struct Pool {
    config: Config,
    catalog: Arc<Catalog>,
    inner: Mutex<Inner>,
}

impl Pool {
    /// Create a new idle [`Pool`].
    #[must_use]
    pub fn new(config: Config, catalog: Arc<Catalog>) -> Self {
        let target_count = config.default_workers.max(1);
        Self {
            config,
            catalog,
            inner: Mutex::new(Inner {
                running: false,
                target_count,
                shutdown: None,
                workers: JoinSet::new(),
            }),
        }
    }

    /// Begin traffic generation.
    ///
    /// Launches `min(target, max_workers)` viewer workers with a small
    /// staggered delay between spawns so connections open as a ramp rather
    /// than a burst. Idempotent: a second start while running changes
    /// nothing.
    pub async fn start(&self) -> StartStatus {
        let mut inner = self.inner.lock().await;
        self.start_locked(&mut inner).await
    }

    async fn start_locked(&self, inner: &mut Inner) -> StartStatus {
        if inner.running {
            return StartStatus::AlreadyRunning;
        }

        let shutdown = Shutdown::new();
        let count = inner.target_count.min(self.config.max_workers).max(1);
        let base_seed: u64 = self
            .config
            .seed
            .unwrap_or_else(|| rand::rng().random());

        for id in 0..count {
            let worker = Viewer {
                id,
                endpoint: self.config.endpoint.clone(),
                reconnect_delay: Duration::from_secs_f64(self.config.reconnect_delay),
                min_delay: self.config.min_delay,
                max_delay: self.config.max_delay,
                catalog: Arc::clone(&self.catalog),
                rng: StdRng::seed_from_u64(base_seed.wrapping_add(u64::from(id))),
                shutdown: shutdown.clone(),
                metric_labels: worker_labels(id),
            };
            inner.workers.spawn(worker.spin());

            sleep(self.stagger()).await;
        }

        inner.shutdown = Some(shutdown);
        inner.running = true;
        info!(count, "traffic generation started");
        StartStatus::Started { count }
    }

    /// Halt traffic generation, returning once every worker has terminated.
    ///
    /// Workers observe the shutdown signal at their next loop boundary and
    /// are joined one by one with the same jitter used at launch, mirroring
    /// a graceful drain. Idempotent when the pool is not running.
    pub async fn stop(&self) -> StopStatus {
        let mut inner = self.inner.lock().await;
        if !inner.running {
            return StopStatus::NotRunning;
        }

        inner.running = false;
        if let Some(shutdown) = inner.shutdown.take() {
            if shutdown.signal().is_err() {
                debug!("no live workers to signal");
            }
        }

        let mut drained = 0;
        while let Some(joined) = inner.workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!("worker exited with error: {err}"),
                Err(err) => warn!("worker task failed: {err}"),
            }
            drained += 1;

            if !inner.workers.is_empty() {
                sleep(self.stagger()).await;
            }
        }

        info!(drained, "traffic generation stopped");
        StopStatus::Stopped { drained }
    }

    /// Multiply the target worker count by `factor`, then re-invoke start.
    ///
    /// Start is a no-op while the pool runs, so scaling mid-flight only
    /// takes effect on the next stop/start cycle. A zero factor leaves the
    /// target unchanged.
    pub async fn increase(&self, factor: u32) -> ScaleOutcome {
        let mut inner = self.inner.lock().await;
        if factor >= 1 {
            inner.target_count = inner.target_count.saturating_mul(factor);
        }
        let start = self.start_locked(&mut inner).await;
        ScaleOutcome {
            target: inner.target_count,
            start,
        }
    }

    /// Divide the target worker count by `factor` with a floor of one, then
    /// re-invoke start. Same running-pool caveat as [`Pool::increase`].
    pub async fn decrease(&self, factor: u32) -> ScaleOutcome {
        let mut inner = self.inner.lock().await;
        if factor >= 1 {
            inner.target_count = (inner.target_count / factor).max(1);
        }
        let start = self.start_locked(&mut inner).await;
        ScaleOutcome {
            target: inner.target_count,
            start,
        }
    }

    /// Whether traffic generation is currently running.
    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.running
    }

    /// The worker count the next start will aim for.
    pub async fn target_count(&self) -> u32 {
        self.inner.lock().await.target_count
    }

    /// Number of live worker handles.
    pub async fn active_workers(&self) -> usize {
        self.inner.lock().await.workers.len()
    }

    fn stagger(&self) -> Duration {
        Duration::from_secs_f64(
            rand::rng().random_range(self.config.stagger_min..=self.config.stagger_max),
        )
    }
}

fn worker_labels(id: u32) -> Vec<(String, String)> {
    vec![
        ("component".to_string(), "generator".to_string()),
        ("component_name".to_string(), "viewer".to_string()),
        ("worker".to_string(), id.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Config, Pool, StartStatus, StopStatus};
    use crate::catalog::Catalog;

    fn test_config() -> Config {
        Config {
            // Nothing listens here; workers idle in their reconnect loop.
            endpoint: "ws://127.0.0.1:1/ws".to_string(),
            default_workers: 3,
            max_workers: 5,
            min_delay: 0.001,
            max_delay: 0.002,
            reconnect_delay: 0.005,
            stagger_min: 0.0,
            stagger_max: 0.001,
            seed: Some(1),
        }
    }

    fn test_pool() -> Pool {
        Pool::new(test_config(), Arc::new(Catalog::fallback()))
    }

    #[tokio::test]
    async fn start_is_idempotent_while_running() {
        let pool = test_pool();

        assert_eq!(pool.start().await, StartStatus::Started { count: 3 });
        assert_eq!(pool.active_workers().await, 3);

        assert_eq!(pool.start().await, StartStatus::AlreadyRunning);
        assert_eq!(pool.active_workers().await, 3);

        pool.stop().await;
    }

    #[tokio::test]
    async fn stop_without_start_is_benign() {
        let pool = test_pool();
        assert_eq!(pool.stop().await, StopStatus::NotRunning);
        assert_eq!(pool.stop().await, StopStatus::NotRunning);
    }

    #[tokio::test]
    async fn stop_drains_every_worker() {
        let pool = test_pool();

        pool.start().await;
        assert!(pool.is_running().await);

        assert_eq!(pool.stop().await, StopStatus::Stopped { drained: 3 });
        assert_eq!(pool.active_workers().await, 0);
        assert!(!pool.is_running().await);
    }

    #[tokio::test]
    async fn scaling_before_start_sizes_the_launch() {
        let pool = test_pool();

        // Doubled target exceeds the ceiling of five, so the launch clamps.
        let outcome = pool.increase(2).await;
        assert_eq!(outcome.target, 6);
        assert_eq!(outcome.start, StartStatus::Started { count: 5 });
        assert_eq!(pool.active_workers().await, 5);

        pool.stop().await;
    }

    #[tokio::test]
    async fn scaling_while_running_changes_nothing_visible() {
        let pool = test_pool();

        pool.start().await;
        let outcome = pool.increase(2).await;
        assert_eq!(outcome.target, 6);
        assert_eq!(outcome.start, StartStatus::AlreadyRunning);
        assert_eq!(pool.active_workers().await, 3);

        pool.stop().await;
    }

    #[tokio::test]
    async fn decrease_floors_at_one() {
        let pool = test_pool();
        let outcome = pool.decrease(100).await;
        assert_eq!(outcome.target, 1);
        pool.stop().await;
    }

    #[tokio::test]
    async fn zero_factor_is_a_noop() {
        let pool = test_pool();
        let before = pool.target_count().await;
        let outcome = pool.increase(0).await;
        assert_eq!(outcome.target, before);
        pool.stop().await;
    }
}
