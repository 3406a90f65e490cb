/// Configuration for the rebalancing service
#[derive(Debug, Clone)]
pub struct RebalanceConfig {
    /// Wall-clock budget for each solver backend attempt (seconds)
    pub solver_timeout_seconds: u64,
    /// Maximum number of portfolios rebalanced in flight during a model-wide run
    pub max_rebalance_concurrency: usize,
    /// Overall deadline for one portfolio's pipeline, fetch + solve (seconds)
    pub portfolio_deadline_seconds: u64,
    /// Attempts against an external collaborator before giving up
    pub external_retry_attempts: u32,
    /// Initial backoff between retries (seconds); doubles on each failure
    pub external_retry_base_delay_seconds: u64,
    /// TTL for cached price lookups (seconds)
    pub price_cache_ttl_seconds: u64,
    /// Capacity of the price cache
    pub price_cache_capacity: usize,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        RebalanceConfig {
            solver_timeout_seconds: 30,
            max_rebalance_concurrency: parallelism,
            portfolio_deadline_seconds: 60,
            external_retry_attempts: 3,
            external_retry_base_delay_seconds: 1,
            price_cache_ttl_seconds: 300,
            price_cache_capacity: 1024,
        }
    }
}

impl RebalanceConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> RebalanceConfig {
        let mut config = RebalanceConfig::default();

        if let Ok(timeout) = std::env::var("SOLVER_TIMEOUT_SECONDS") {
            match timeout.parse::<u64>() {
                Ok(value) if (1..=600).contains(&value) => {
                    config.solver_timeout_seconds = value;
                }
                Ok(value) => {
                    tracing::warn!(
                        "Invalid SOLVER_TIMEOUT_SECONDS value: {} (must be between 1 and 600), using default: {}",
                        value, config.solver_timeout_seconds
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse SOLVER_TIMEOUT_SECONDS '{}': {}, using default: {}",
                        timeout,
                        e,
                        config.solver_timeout_seconds
                    );
                }
            }
        }

        if let Ok(concurrency) = std::env::var("MAX_REBALANCE_CONCURRENCY") {
            if let Ok(value) = concurrency.parse::<usize>() {
                if (1..=256).contains(&value) {
                    config.max_rebalance_concurrency = value;
                }
            }
        }

        if let Ok(deadline) = std::env::var("PORTFOLIO_DEADLINE_SECONDS") {
            if let Ok(value) = deadline.parse::<u64>() {
                if (1..=3600).contains(&value) {
                    config.portfolio_deadline_seconds = value;
                }
            }
        }

        if let Ok(attempts) = std::env::var("EXTERNAL_RETRY_ATTEMPTS") {
            if let Ok(value) = attempts.parse::<u32>() {
                if (1..=10).contains(&value) {
                    config.external_retry_attempts = value;
                }
            }
        }

        if let Ok(delay) = std::env::var("EXTERNAL_RETRY_BASE_DELAY_SECONDS") {
            if let Ok(value) = delay.parse::<u64>() {
                if (1..=60).contains(&value) {
                    config.external_retry_base_delay_seconds = value;
                }
            }
        }

        if let Ok(ttl) = std::env::var("PRICE_CACHE_TTL_SECONDS") {
            if let Ok(value) = ttl.parse::<u64>() {
                if (1..=3600).contains(&value) {
                    config.price_cache_ttl_seconds = value;
                }
            }
        }

        if let Ok(capacity) = std::env::var("PRICE_CACHE_CAPACITY") {
            if let Ok(value) = capacity.parse::<usize>() {
                if (1..=1_000_000).contains(&value) {
                    config.price_cache_capacity = value;
                }
            }
        }

        config
    }

    pub fn solver_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.solver_timeout_seconds)
    }

    pub fn portfolio_deadline(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.portfolio_deadline_seconds)
    }
}
