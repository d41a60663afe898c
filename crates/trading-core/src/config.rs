//! Configuration management for the trailguard engine.

use crate::types::StrategyKind;
use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Prefix shared by every environment variable the engine reads.
pub const ENV_PREFIX: &str = "TRAILGUARD";

/// Application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub risk: RiskConfig,
    pub engine: EngineConfig,
    pub executor: ExecutorConfig,
    pub paper: PaperConfig,
}

/// Parameters of the stop-loss, override, and re-entry rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Trailing step in currency units; also the initial stop distance below entry.
    pub step: Decimal,
    /// Gain above entry at which the phased strategy enters phase 2.
    pub phase_two_at: Decimal,
    /// Gain above entry at which the phased strategy enters phase 3.
    pub phase_three_at: Decimal,
    /// Distance kept between the highest stop ever reached and the progressive minimum.
    pub progressive_gap: Decimal,
    /// Lifetime of a manual override, in seconds.
    pub override_ttl_secs: i64,
    /// Auto-buys before cooldown engages.
    pub cooldown_threshold: u32,
    /// Amount added to the re-entry trigger while cooling down.
    pub cooldown_buffer: Decimal,
    /// Global cooldown switch.
    pub cooldown_enabled: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            step: Decimal::new(10, 0),
            phase_two_at: Decimal::new(20, 0),
            phase_three_at: Decimal::new(30, 0),
            progressive_gap: Decimal::new(20, 0),
            override_ttl_secs: 30 * 60,
            cooldown_threshold: 5,
            cooldown_buffer: Decimal::new(5, 0),
            cooldown_enabled: true,
        }
    }
}

/// Tick processing settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of tick workers.
    pub workers: usize,
    /// Per-worker tick queue capacity.
    pub queue_capacity: usize,
    /// Capacity of the live trade-event broadcast channel.
    pub event_capacity: usize,
    /// Strategy assigned to positions opened without an explicit one.
    pub default_strategy: StrategyKind,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            event_capacity: 1024,
            default_strategy: StrategyKind::Phased,
        }
    }
}

/// Order execution settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Retries after the first attempt for transient gateway failures.
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub retry_base_delay_ms: u64,
    /// Upper bound on a single backoff delay.
    pub retry_max_delay_ms: u64,
    /// Timeout for a single gateway call.
    pub timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 2000,
            timeout_ms: 5000,
        }
    }
}

/// Paper trading wallet settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    pub starting_balance: Decimal,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            starting_balance: Decimal::new(10_000_000, 0),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(format!("{}_{}", ENV_PREFIX, key))
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let risk = RiskConfig::default();
        let engine = EngineConfig::default();
        let executor = ExecutorConfig::default();
        let paper = PaperConfig::default();

        let config = Self {
            risk: RiskConfig {
                step: env_or("STEP", risk.step),
                phase_two_at: env_or("PHASE_TWO_AT", risk.phase_two_at),
                phase_three_at: env_or("PHASE_THREE_AT", risk.phase_three_at),
                progressive_gap: env_or("PROGRESSIVE_GAP", risk.progressive_gap),
                override_ttl_secs: env_or("OVERRIDE_TTL_SECS", risk.override_ttl_secs),
                cooldown_threshold: env_or("COOLDOWN_THRESHOLD", risk.cooldown_threshold),
                cooldown_buffer: env_or("COOLDOWN_BUFFER", risk.cooldown_buffer),
                cooldown_enabled: env_or("COOLDOWN_ENABLED", risk.cooldown_enabled),
            },
            engine: EngineConfig {
                workers: env_or("WORKERS", engine.workers),
                queue_capacity: env_or("QUEUE_CAPACITY", engine.queue_capacity),
                event_capacity: env_or("EVENT_CAPACITY", engine.event_capacity),
                default_strategy: env_or("STRATEGY", engine.default_strategy),
            },
            executor: ExecutorConfig {
                max_retries: env_or("MAX_RETRIES", executor.max_retries),
                retry_base_delay_ms: env_or("RETRY_BASE_DELAY_MS", executor.retry_base_delay_ms),
                retry_max_delay_ms: env_or("RETRY_MAX_DELAY_MS", executor.retry_max_delay_ms),
                timeout_ms: env_or("ORDER_TIMEOUT_MS", executor.timeout_ms),
            },
            paper: PaperConfig {
                starting_balance: env_or("PAPER_BALANCE", paper.starting_balance),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file, with `TRAILGUARD__SECTION__KEY` environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config: Config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        debug!(path = %path.as_ref().display(), "Loaded configuration file");
        Ok(config)
    }

    /// Reject settings the engine cannot operate with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| {
            Err(Error::Config {
                message: message.to_string(),
            })
        };

        if self.risk.step <= Decimal::ZERO {
            return invalid("risk.step must be positive");
        }
        if self.risk.phase_two_at <= Decimal::ZERO {
            return invalid("risk.phase_two_at must be positive");
        }
        if self.risk.phase_three_at < self.risk.phase_two_at {
            return invalid("risk.phase_three_at must not be below risk.phase_two_at");
        }
        if self.risk.progressive_gap < Decimal::ZERO {
            return invalid("risk.progressive_gap must not be negative");
        }
        if self.risk.override_ttl_secs <= 0 {
            return invalid("risk.override_ttl_secs must be positive");
        }
        if self.risk.cooldown_buffer < Decimal::ZERO {
            return invalid("risk.cooldown_buffer must not be negative");
        }
        if self.engine.workers == 0 {
            return invalid("engine.workers must be at least 1");
        }
        if self.engine.queue_capacity == 0 || self.engine.event_capacity == 0 {
            return invalid("engine queue and event capacities must be at least 1");
        }
        Ok(())
    }
}
