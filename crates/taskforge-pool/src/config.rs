//! Pool configuration.
//!
//! [`PoolConfig`] controls sizing, autoscaling, strictness and the health
//! checker. Sensible defaults are provided via the [`Default`]
//! implementation, and a builder-style API allows callers to customise
//! individual fields fluently.

use std::time::Duration;

/// Sizing, scaling and policy knobs for a pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Initial worker count.
    ///
    /// Default: **host parallelism**. Clamped into
    /// `[min_pool_size, max_pool_size]` at construction.
    pub pool_size: usize,

    /// Autoscale floor. The pool never drops below this many workers.
    ///
    /// Default: **1**.
    pub min_pool_size: usize,

    /// Autoscale ceiling. The pool never exceeds this many workers.
    ///
    /// Default: **2 × host parallelism**.
    pub max_pool_size: usize,

    /// Whether enqueue-driven scale-up (and idle scale-down) is active.
    ///
    /// Default: **false**.
    pub auto_scale: bool,

    /// Queue depth at which an enqueue triggers one additional worker.
    ///
    /// Default: **4**.
    pub scale_up_threshold: usize,

    /// How long a worker must sit idle before it may be retired.
    ///
    /// Default: **30 s**.
    pub scale_down_delay: Duration,

    /// Whether the input validator runs at submission time.
    ///
    /// Default: **true**.
    pub strict_mode: bool,

    /// Interval between health-check passes over bound workers.
    ///
    /// Default: **5 s**.
    pub health_check_interval: Duration,

    /// Heartbeat silence after which a bound worker is considered stalled
    /// and evicted.
    ///
    /// Default: **60 s**.
    pub max_inactivity: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let parallelism = host_parallelism();
        Self {
            pool_size: parallelism,
            min_pool_size: 1,
            max_pool_size: parallelism * 2,
            auto_scale: false,
            scale_up_threshold: 4,
            scale_down_delay: Duration::from_secs(30),
            strict_mode: true,
            health_check_interval: Duration::from_secs(5),
            max_inactivity: Duration::from_secs(60),
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial worker count.
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the autoscale floor.
    pub fn with_min_pool_size(mut self, size: usize) -> Self {
        self.min_pool_size = size;
        self
    }

    /// Set the autoscale ceiling.
    pub fn with_max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = size;
        self
    }

    /// Enable or disable autoscaling.
    pub fn with_auto_scale(mut self, enabled: bool) -> Self {
        self.auto_scale = enabled;
        self
    }

    /// Set the queue depth that triggers scale-up.
    pub fn with_scale_up_threshold(mut self, depth: usize) -> Self {
        self.scale_up_threshold = depth;
        self
    }

    /// Set the idle duration before a worker may be retired.
    pub fn with_scale_down_delay(mut self, delay: Duration) -> Self {
        self.scale_down_delay = delay;
        self
    }

    /// Enable or disable the strict-mode input validator.
    pub fn with_strict_mode(mut self, enabled: bool) -> Self {
        self.strict_mode = enabled;
        self
    }

    /// Set the health-check interval.
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Set the heartbeat silence that marks a bound worker stalled.
    pub fn with_max_inactivity(mut self, inactivity: Duration) -> Self {
        self.max_inactivity = inactivity;
        self
    }
}

/// Number of execution contexts the host can run in parallel.
pub(crate) fn host_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(4)
}
