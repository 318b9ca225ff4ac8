//! Configuration management for the price tracking pipeline
//!
//! This module handles loading and validating configuration from
//! environment variables (`PRICEWATCH_*`) and TOML files. Everything is
//! resolved once at startup; the composition root passes immutable handles
//! to consumers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::scraper::url::DEFAULT_TRACKING_PARAMS;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Fetcher and executor configuration
    pub scraper: ScraperConfig,

    /// Scheduler policy
    pub scheduler: SchedulerConfig,

    /// Queue and retry policy
    pub queue: QueueConfig,

    /// Rate governor configuration
    pub rate: RateConfig,

    /// Worker pool sizing
    pub worker: WorkerConfig,

    /// Rule engine tuning
    pub pricing: PricingConfig,

    /// Health server binding
    pub server: ServerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Per-domain site adapters
    #[serde(rename = "adapter")]
    pub adapters: Vec<AdapterConfig>,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub path: PathBuf,
}

/// Fetcher, extractor, and policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    /// HTTP request timeout in seconds
    pub http_timeout_secs: u64,

    /// Browser navigation timeout in seconds
    pub browser_timeout_secs: u64,

    /// Bounded wait for network idle during browser renders, in seconds
    pub browser_idle_wait_secs: u64,

    /// Whether the browser fallback tier is available at all
    pub browser_fallback: bool,

    /// Maximum redirects followed by the HTTP tier
    pub max_redirects: usize,

    /// End-to-end deadline for one scrape execution, in seconds
    pub job_deadline_secs: u64,

    /// Honor robots.txt
    pub respect_robots: bool,

    /// Enforce the domain allowlist
    pub allowlist_enabled: bool,

    /// Allowed domains (exact host or suffix match)
    pub allowed_domains: Vec<String>,

    /// Currency assumed when a page carries no currency marker
    pub default_currency: String,

    /// Query parameters stripped during canonicalization
    pub tracking_params: Vec<String>,
}

/// Scheduler policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Default check interval in seconds (per-tracker overrides win)
    pub default_interval_secs: u64,

    /// Tick cadence in seconds
    pub tick_secs: u64,

    /// Consecutive failures before a tracker is marked DEAD
    pub failure_streak_limit: u32,

    /// Maximum trackers enqueued per tick
    pub batch_limit: usize,
}

/// Queue and retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Attempt budget per job
    pub max_attempts: u32,

    /// Base backoff in milliseconds
    pub base_backoff_ms: u64,

    /// Backoff cap in milliseconds
    pub max_backoff_ms: u64,

    /// Reservation visibility timeout in seconds
    pub visibility_timeout_secs: u64,

    /// Worker idle poll interval in milliseconds
    pub poll_interval_ms: u64,
}

/// Rate governor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    /// Per-host token bucket capacity (burst)
    pub per_host_capacity: u32,

    /// Per-host refill rate in tokens per second
    pub per_host_refill_per_sec: u32,

    /// Global in-flight fetch cap
    pub global_concurrency: usize,

    /// Maximum admission wait in milliseconds
    pub wait_bound_ms: u64,
}

/// Worker pool sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of concurrent worker tasks
    pub count: usize,
}

/// Rule engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Days of history considered for competitor averages
    pub history_window_days: u32,

    /// Maximum percentage a suggestion may move from the current price
    pub max_change_pct: f64,

    /// Margin over cost enforced when the cost is known
    pub min_margin_pct: f64,
}

/// Health server binding
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for the health endpoints
    pub bind: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

/// One configured per-domain adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Adapter identifier recorded on extracted signals
    pub id: String,

    /// Hostnames this adapter claims
    pub hosts: Vec<String>,

    /// CSS selector for the site's price container
    pub price_selector: String,

    /// Currency assumed for this site when the page has no marker
    #[serde(default = "default_adapter_currency")]
    pub currency: String,
}

fn default_adapter_currency() -> String {
    "USD".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/pricewatch.db"),
        }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: 20,
            browser_timeout_secs: 45,
            browser_idle_wait_secs: 5,
            browser_fallback: true,
            max_redirects: 5,
            job_deadline_secs: 90,
            respect_robots: true,
            allowlist_enabled: false,
            allowed_domains: Vec::new(),
            default_currency: "USD".to_string(),
            tracking_params: DEFAULT_TRACKING_PARAMS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_interval_secs: 6 * 3600,
            tick_secs: 60,
            failure_streak_limit: 5,
            batch_limit: 100,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 2_000,
            max_backoff_ms: 300_000,
            visibility_timeout_secs: 180,
            poll_interval_ms: 500,
        }
    }
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            per_host_capacity: 2,
            per_host_refill_per_sec: 1,
            global_concurrency: 8,
            wait_bound_ms: 10_000,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { count: 4 }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            history_window_days: 14,
            max_change_pct: 20.0,
            min_margin_pct: 5.0,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            scraper: ScraperConfig::default(),
            scheduler: SchedulerConfig::default(),
            queue: QueueConfig::default(),
            rate: RateConfig::default(),
            worker: WorkerConfig::default(),
            pricing: PricingConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            adapters: Vec::new(),
        }
    }
}

fn env_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_list(name: &str) -> Option<Vec<String>> {
    std::env::var(name).ok().map(|v| {
        v.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

impl Config {
    /// Load configuration from environment variables on top of defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = std::env::var_os("PRICEWATCH_DB_PATH") {
            config.database.path = PathBuf::from(path);
        }

        if let Some(v) = env_var("PRICEWATCH_HTTP_TIMEOUT") {
            config.scraper.http_timeout_secs = v;
        }
        if let Some(v) = env_var("PRICEWATCH_BROWSER_TIMEOUT") {
            config.scraper.browser_timeout_secs = v;
        }
        if let Some(v) = env_var("PRICEWATCH_BROWSER_FALLBACK") {
            config.scraper.browser_fallback = v;
        }
        if let Some(v) = env_var("PRICEWATCH_JOB_DEADLINE") {
            config.scraper.job_deadline_secs = v;
        }
        if let Some(v) = env_var("PRICEWATCH_RESPECT_ROBOTS") {
            config.scraper.respect_robots = v;
        }
        if let Some(v) = env_var("PRICEWATCH_ALLOWLIST_ENABLED") {
            config.scraper.allowlist_enabled = v;
        }
        if let Some(v) = env_list("PRICEWATCH_ALLOWED_DOMAINS") {
            config.scraper.allowed_domains = v;
        }
        if let Ok(v) = std::env::var("PRICEWATCH_DEFAULT_CURRENCY") {
            config.scraper.default_currency = v;
        }

        if let Some(v) = env_var("PRICEWATCH_DEFAULT_INTERVAL") {
            config.scheduler.default_interval_secs = v;
        }
        if let Some(v) = env_var("PRICEWATCH_FAILURE_STREAK_LIMIT") {
            config.scheduler.failure_streak_limit = v;
        }

        if let Some(v) = env_var("PRICEWATCH_MAX_ATTEMPTS") {
            config.queue.max_attempts = v;
        }
        if let Some(v) = env_var("PRICEWATCH_BASE_BACKOFF_MS") {
            config.queue.base_backoff_ms = v;
        }
        if let Some(v) = env_var("PRICEWATCH_MAX_BACKOFF_MS") {
            config.queue.max_backoff_ms = v;
        }

        if let Some(v) = env_var("PRICEWATCH_RATE_CAPACITY") {
            config.rate.per_host_capacity = v;
        }
        if let Some(v) = env_var("PRICEWATCH_RATE_REFILL") {
            config.rate.per_host_refill_per_sec = v;
        }
        if let Some(v) = env_var("PRICEWATCH_GLOBAL_CONCURRENCY") {
            config.rate.global_concurrency = v;
        }

        if let Some(v) = env_var("PRICEWATCH_WORKERS") {
            config.worker.count = v;
        }

        if let Ok(v) = std::env::var("PRICEWATCH_BIND") {
            config.server.bind = v;
        }
        if let Ok(v) = std::env::var("PRICEWATCH_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("PRICEWATCH_LOG_FORMAT") {
            config.logging.format = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.worker.count == 0 {
            anyhow::bail!("worker.count must be greater than 0");
        }
        if self.queue.max_attempts == 0 {
            anyhow::bail!("queue.max_attempts must be greater than 0");
        }
        if self.queue.base_backoff_ms == 0 {
            anyhow::bail!("queue.base_backoff_ms must be greater than 0");
        }
        if self.queue.max_backoff_ms < self.queue.base_backoff_ms {
            anyhow::bail!("queue.max_backoff_ms must be >= base_backoff_ms");
        }
        if self.rate.per_host_refill_per_sec == 0 {
            anyhow::bail!("rate.per_host_refill_per_sec must be greater than 0");
        }
        if self.rate.global_concurrency == 0 {
            anyhow::bail!("rate.global_concurrency must be greater than 0");
        }
        if self.scraper.allowlist_enabled && self.scraper.allowed_domains.is_empty() {
            anyhow::bail!("allowlist is enabled but allowed_domains is empty");
        }
        if self.pricing.max_change_pct <= 0.0 {
            anyhow::bail!("pricing.max_change_pct must be positive");
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.scraper.http_timeout_secs)
    }

    pub fn browser_timeout(&self) -> Duration {
        Duration::from_secs(self.scraper.browser_timeout_secs)
    }

    pub fn job_deadline(&self) -> Duration {
        Duration::from_secs(self.scraper.job_deadline_secs)
    }
}
