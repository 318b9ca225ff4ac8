//! pricewatch - Competitor price tracking pipeline
//!
//! A pipeline that tracks competitor product prices for a retailer-facing
//! pricing platform: scheduled scraping of tracked URLs, two-tier fetching
//! (static HTTP with a headless-browser fallback), per-domain price
//! extraction, versioned price history, and a rule-based pricing
//! recommender.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`scraper`] - URL canonicalization, two-tier fetching, scrape execution
//! - [`extract`] - Per-domain and generic price extractors
//! - [`queue`] - Durable job queue with retry state and a dead-letter queue
//! - [`rate`] - Per-host token buckets and the global concurrency cap
//! - [`scheduler`] - Periodic job emission for tracked URLs
//! - [`worker`] - The concurrent worker pool
//! - [`storage`] - Tracker, history, product, rule, and audit stores
//! - [`pricing`] - Deterministic rule-based recommendations
//! - [`service`] - Composition root and ingress operations
//! - [`health`] - Liveness/readiness endpoints
//!
//! # Example
//!
//! ```no_run
//! use pricewatch::config::Config;
//! use pricewatch::storage::Database;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = Config::from_env()?;
//! let database = Database::open(&config.database.path)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod extract;
pub mod health;
pub mod models;
pub mod pricing;
pub mod queue;
pub mod rate;
pub mod scheduler;
pub mod scraper;
pub mod service;
pub mod storage;
pub mod utils;
pub mod worker;

pub use models::{
    CompetitorTracker, FailureKind, PricePoint, PriceSignal, Recommendation, ScrapeJob,
    ScrapeOutcome, TrackerStatus,
};
