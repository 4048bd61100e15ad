//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use catsync_model::{FieldSpec, Priority, ResolutionStrategy, DEFAULT_MAX_RETRIES};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker pool sizing and scaling.
    pub pool: PoolConfig,
    /// Batch accumulation.
    pub batch: BatchConfig,
    /// Retry behavior.
    pub retry: RetryConfig,
    /// Metrics sampling.
    pub metrics: MetricsConfig,
    /// Conflict detection.
    pub conflict: ConflictConfig,
    /// Longest a worker blocks on an empty queue before re-checking flags.
    pub dequeue_timeout: Duration,
    /// How far an operation is pushed back under critical resource pressure.
    pub pressure_defer: Duration,
}

impl EngineConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the worker pool configuration.
    #[must_use]
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Sets the batch configuration.
    #[must_use]
    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the metrics configuration.
    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsConfig) -> Self {
        self.metrics = metrics;
        self
    }

    /// Sets the conflict configuration.
    #[must_use]
    pub fn with_conflict(mut self, conflict: ConflictConfig) -> Self {
        self.conflict = conflict;
        self
    }

    /// Sets the dequeue timeout.
    #[must_use]
    pub fn with_dequeue_timeout(mut self, timeout: Duration) -> Self {
        self.dequeue_timeout = timeout;
        self
    }

    /// Sets the resource-pressure deferral.
    #[must_use]
    pub fn with_pressure_defer(mut self, defer: Duration) -> Self {
        self.pressure_defer = defer;
        self
    }

    /// Checks the configuration for inconsistent values.
    pub fn validate(&self) -> SyncResult<()> {
        let pool = &self.pool;
        if pool.min_workers == 0 {
            return Err(SyncError::InvalidConfig("min_workers must be at least 1".into()));
        }
        if pool.min_workers > pool.max_workers {
            return Err(SyncError::InvalidConfig(format!(
                "min_workers ({}) exceeds max_workers ({})",
                pool.min_workers, pool.max_workers
            )));
        }
        if pool.scale_step == 0 {
            return Err(SyncError::InvalidConfig("scale_step must be at least 1".into()));
        }
        if pool.scale_down_threshold > pool.scale_up_threshold {
            return Err(SyncError::InvalidConfig(format!(
                "scale_down_threshold ({}) exceeds scale_up_threshold ({})",
                pool.scale_down_threshold, pool.scale_up_threshold
            )));
        }
        if self.batch.batch_size == 0 {
            return Err(SyncError::InvalidConfig("batch_size must be at least 1".into()));
        }
        if self.metrics.window == 0 {
            return Err(SyncError::InvalidConfig("metrics window must be at least 1".into()));
        }
        if self.retry.rate_limit_multiplier == 0 {
            return Err(SyncError::InvalidConfig(
                "rate_limit_multiplier must be at least 1".into(),
            ));
        }
        let intervals = [
            ("scale_interval", pool.scale_interval),
            ("flush_interval", self.batch.flush_interval),
            ("batch poll_interval", self.batch.poll_interval),
            ("metrics interval", self.metrics.interval),
            ("dequeue_timeout", self.dequeue_timeout),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                return Err(SyncError::InvalidConfig(format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            batch: BatchConfig::default(),
            retry: RetryConfig::default(),
            metrics: MetricsConfig::default(),
            conflict: ConflictConfig::default(),
            dequeue_timeout: Duration::from_secs(1),
            pressure_defer: Duration::from_secs(30),
        }
    }
}

/// Worker pool sizing and scaling thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Floor of the pool.
    pub min_workers: usize,
    /// Ceiling of the pool.
    pub max_workers: usize,
    /// Queue depth above which workers are added.
    pub scale_up_threshold: usize,
    /// Queue depth below which workers are retired.
    pub scale_down_threshold: usize,
    /// Most workers added or retired per scaling tick.
    pub scale_step: usize,
    /// Time between scaling decisions.
    pub scale_interval: Duration,
}

impl PoolConfig {
    /// Creates a pool configuration with the given bounds.
    pub fn new(min_workers: usize, max_workers: usize) -> Self {
        Self {
            min_workers,
            max_workers,
            ..Self::default()
        }
    }

    /// Sets the scaling thresholds.
    #[must_use]
    pub fn with_thresholds(mut self, up: usize, down: usize) -> Self {
        self.scale_up_threshold = up;
        self.scale_down_threshold = down;
        self
    }

    /// Sets the scaling interval.
    #[must_use]
    pub fn with_scale_interval(mut self, interval: Duration) -> Self {
        self.scale_interval = interval;
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 2,
            max_workers: 8,
            scale_up_threshold: 50,
            scale_down_threshold: 10,
            scale_step: 2,
            scale_interval: Duration::from_secs(30),
        }
    }
}

/// Batch accumulation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Whether create/update operations are batched at all.
    pub enabled: bool,
    /// Buffer size that triggers an immediate flush.
    pub batch_size: usize,
    /// Longest the oldest buffered operation may wait.
    pub flush_interval: Duration,
    /// How often the flush loop checks buffer ages.
    pub poll_interval: Duration,
    /// Operations this urgent or more are queued directly.
    pub bypass_priority: Priority,
}

impl BatchConfig {
    /// Creates an enabled batch configuration.
    pub fn new(batch_size: usize, flush_interval: Duration) -> Self {
        Self {
            enabled: true,
            batch_size,
            flush_interval,
            poll_interval: (flush_interval / 4).max(Duration::from_millis(1)),
            ..Self::default()
        }
    }

    /// Sets the priority at which operations skip batching.
    #[must_use]
    pub fn with_bypass_priority(mut self, priority: Priority) -> Self {
        self.bypass_priority = priority;
        self
    }

    /// Creates a configuration with batching turned off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 50,
            flush_interval: Duration::from_secs(5),
            poll_interval: Duration::from_millis(250),
            bypass_priority: Priority::High,
        }
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries granted to new operations.
    pub max_retries: u32,
    /// Unit of the exponential backoff.
    pub base_delay: Duration,
    /// Upper bound for ordinary backoff.
    pub max_delay: Duration,
    /// Backoff factor applied to rate-limit failures.
    pub rate_limit_multiplier: u32,
    /// Whether to add up to 25% jitter.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Sets the backoff base.
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the backoff cap.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the rate-limit factor.
    #[must_use]
    pub fn with_rate_limit_multiplier(mut self, multiplier: u32) -> Self {
        self.rate_limit_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Delay before the attempt that follows retry number `retry_count`.
    ///
    /// `base * 2^retry_count`, capped at `max_delay`.
    pub fn delay_for_retry(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.min(62) as i32;
        let delay_secs =
            (self.base_delay.as_secs_f64() * 2f64.powi(exponent)).min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            rate_limit_multiplier: 4,
            add_jitter: false,
        }
    }
}

/// Metrics sampling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Time between snapshots.
    pub interval: Duration,
    /// Number of recent processing times averaged for throughput.
    pub window: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            window: 100,
        }
    }
}

/// Conflict detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictConfig {
    /// Whether operations are checked against remote state.
    pub enabled: bool,
    /// Strategy for fields without an override.
    pub default_strategy: ResolutionStrategy,
    /// Per-field strategy overrides.
    pub field_strategies: BTreeMap<String, ResolutionStrategy>,
    /// Fields compared.
    pub fields: Vec<FieldSpec>,
}

impl ConflictConfig {
    /// Sets the default strategy.
    #[must_use]
    pub fn with_default_strategy(mut self, strategy: ResolutionStrategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    /// Overrides the strategy for one field.
    #[must_use]
    pub fn with_field_strategy(
        mut self,
        field: impl Into<String>,
        strategy: ResolutionStrategy,
    ) -> Self {
        self.field_strategies.insert(field.into(), strategy);
        self
    }

    /// Replaces the compared field set.
    #[must_use]
    pub fn with_fields(mut self, fields: Vec<FieldSpec>) -> Self {
        self.fields = fields;
        self
    }

    /// Creates a configuration that skips detection.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Strategy applied to `field`.
    pub fn strategy_for(&self, field: &str) -> ResolutionStrategy {
        self.field_strategies
            .get(field)
            .copied()
            .unwrap_or(self.default_strategy)
    }
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_strategy: ResolutionStrategy::PreferLocal,
            field_strategies: BTreeMap::new(),
            fields: FieldSpec::catalog_defaults(),
        }
    }
}
