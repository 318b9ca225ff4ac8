use std::future::IntoFuture;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use pricewatch::config::Config;
use pricewatch::extract::{AdapterRegistry, SelectorAdapter};
use pricewatch::health::{self, HealthState};
use pricewatch::models::Product;
use pricewatch::pricing::{EngineConfig, RuleEngine};
use pricewatch::queue::{JobQueue, SqliteJobQueue};
use pricewatch::scheduler::{Scheduler, SchedulerConfig};
use pricewatch::scraper::browser::PageRenderer;
use pricewatch::scraper::fetcher::DEFAULT_USER_AGENT;
use pricewatch::scraper::{BrowserFetcher, HttpFetcher, RobotsGate, ScrapeExecutor, UrlPolicy};
use pricewatch::service::{PriceTracker, ServiceConfig, TrackRequest};
use pricewatch::storage::{
    AuditLog, Database, PriceHistoryStore, ProductRepository, RuleRepository, SqliteAuditLog,
    SqlitePriceHistoryStore, SqliteProductRepository, SqliteRuleRepository, SqliteTrackerStore,
    TrackerStore,
};
use pricewatch::rate::RateGovernor;
use pricewatch::utils::backoff::RetryPolicy;
use pricewatch::worker::{WorkerConfig, WorkerPool};

#[derive(Parser)]
#[command(
    name = "pricewatch",
    version,
    about = "Competitor price tracking with rule-based pricing recommendations",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML config file; environment variables are used otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline: scheduler, worker pool, and health endpoints
    Run,

    /// Track a competitor URL for a product
    Track {
        /// Product the URL belongs to
        #[arg(long)]
        product_id: Uuid,

        /// Competitor display name
        #[arg(long)]
        name: String,

        /// Competitor product page URL
        #[arg(long)]
        url: String,

        /// Enqueue an immediate scrape after creating the tracker
        #[arg(long)]
        scrape_now: bool,

        /// Per-tracker check interval override in seconds
        #[arg(long)]
        interval_secs: Option<u64>,
    },

    /// Scrape a URL synchronously and print the extracted price
    Scrape {
        #[arg(long)]
        url: String,

        /// Record the result against an existing tracker
        #[arg(long)]
        tracker_id: Option<Uuid>,

        /// Disable the browser fallback for this fetch
        #[arg(long)]
        no_browser: bool,
    },

    /// Enqueue a scrape job for an existing tracker
    Enqueue {
        #[arg(long)]
        tracker_id: Uuid,
    },

    /// Print a pricing recommendation for a product
    Recommend {
        #[arg(long)]
        product_id: Uuid,
    },

    /// Print price history for a product or tracker
    History {
        #[arg(long, conflicts_with = "tracker_id")]
        product_id: Option<Uuid>,

        #[arg(long)]
        tracker_id: Option<Uuid>,

        /// Days of history to include
        #[arg(long)]
        days: Option<u32>,
    },

    /// Create or update a catalog product (local catalog mirror)
    Product {
        /// Existing product id; a new one is generated when omitted
        #[arg(long)]
        id: Option<Uuid>,

        #[arg(long)]
        name: String,

        #[arg(long)]
        price: Decimal,

        #[arg(long)]
        cost: Option<Decimal>,

        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        sku: Option<String>,
    },

    /// Inspect dead-letter queue entries
    Dlq {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

/// Everything the commands need, constructed once
struct App {
    config: Config,
    trackers: Arc<dyn TrackerStore>,
    history: Arc<dyn PriceHistoryStore>,
    products: Arc<dyn ProductRepository>,
    queue: Arc<dyn JobQueue>,
    audit: Arc<dyn AuditLog>,
    executor: Arc<ScrapeExecutor>,
    service: Arc<PriceTracker>,
}

fn build_app(config: Config) -> Result<App> {
    let database = Database::open(&config.database.path)
        .with_context(|| format!("opening database {}", config.database.path.display()))?;

    let trackers: Arc<dyn TrackerStore> = Arc::new(SqliteTrackerStore::new(&database));
    let history: Arc<dyn PriceHistoryStore> = Arc::new(SqlitePriceHistoryStore::new(&database));
    let products: Arc<dyn ProductRepository> = Arc::new(SqliteProductRepository::new(&database));
    let rules: Arc<dyn RuleRepository> = Arc::new(SqliteRuleRepository::new(&database));
    let audit: Arc<dyn AuditLog> = Arc::new(SqliteAuditLog::new(&database));
    let queue: Arc<dyn JobQueue> = Arc::new(SqliteJobQueue::new(&database));

    let mut registry = AdapterRegistry::new(&config.scraper.default_currency);
    for adapter in &config.adapters {
        registry.register(Arc::new(SelectorAdapter::new(
            &adapter.id,
            adapter.hosts.clone(),
            &adapter.price_selector,
            &adapter.currency,
        )));
    }

    let policy = UrlPolicy::new(
        config.scraper.allowlist_enabled,
        config.scraper.allowed_domains.clone(),
    );
    let robots = config
        .scraper
        .respect_robots
        .then(|| Arc::new(RobotsGate::new(DEFAULT_USER_AGENT, Duration::from_secs(5))));
    let renderer: Option<Arc<dyn PageRenderer>> = if config.scraper.browser_fallback {
        Some(Arc::new(BrowserFetcher::new(
            DEFAULT_USER_AGENT,
            config.browser_timeout(),
            Duration::from_secs(config.scraper.browser_idle_wait_secs),
        )))
    } else {
        None
    };

    let http = HttpFetcher::new(config.http_timeout(), config.scraper.max_redirects)
        .map_err(|e| anyhow::anyhow!("building HTTP client: {e}"))?;
    let executor = Arc::new(ScrapeExecutor::new(
        http,
        renderer,
        Arc::new(registry),
        policy.clone(),
        robots,
        config.job_deadline(),
    ));

    let engine = RuleEngine::new(EngineConfig {
        history_window_days: config.pricing.history_window_days,
        max_change_pct: Decimal::from_f64_retain(config.pricing.max_change_pct)
            .unwrap_or_else(|| Decimal::from(20)),
        min_margin_pct: Decimal::from_f64_retain(config.pricing.min_margin_pct)
            .unwrap_or_else(|| Decimal::from(5)),
        ..EngineConfig::default()
    });

    let service_config = ServiceConfig {
        max_attempts: config.queue.max_attempts,
        allow_browser_fallback: config.scraper.browser_fallback,
        in_flight_ttl: Duration::from_secs(config.queue.visibility_timeout_secs)
            + config.job_deadline(),
        history_days: config.pricing.history_window_days.max(30),
        tracking_params: config.scraper.tracking_params.clone(),
    };

    let service = Arc::new(PriceTracker::new(
        trackers.clone(),
        history.clone(),
        products.clone(),
        rules,
        audit.clone(),
        queue.clone(),
        executor.clone(),
        engine,
        policy,
        service_config,
    ));

    Ok(App {
        config,
        trackers,
        history,
        products,
        queue,
        audit,
        executor,
        service,
    })
}

async fn run_pipeline(app: App) -> Result<()> {
    let config = &app.config;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let governor = Arc::new(RateGovernor::new(
        config.rate.per_host_capacity,
        config.rate.per_host_refill_per_sec,
        config.rate.global_concurrency,
        Duration::from_millis(config.rate.wait_bound_ms),
    ));
    let retry = RetryPolicy::new(
        Duration::from_millis(config.queue.base_backoff_ms),
        Duration::from_millis(config.queue.max_backoff_ms),
    );

    let pool = Arc::new(WorkerPool::new(
        app.queue.clone(),
        app.trackers.clone(),
        app.history.clone(),
        app.audit.clone(),
        governor,
        app.executor.clone(),
        retry,
        WorkerConfig {
            count: config.worker.count,
            visibility_timeout: Duration::from_secs(config.queue.visibility_timeout_secs),
            poll_interval: Duration::from_millis(config.queue.poll_interval_ms),
        },
    ));
    let worker_handles = pool.spawn(shutdown_rx.clone());

    let scheduler = Scheduler::new(
        app.trackers.clone(),
        app.queue.clone(),
        SchedulerConfig {
            default_interval: Duration::from_secs(config.scheduler.default_interval_secs),
            tick_interval: Duration::from_secs(config.scheduler.tick_secs),
            failure_streak_limit: config.scheduler.failure_streak_limit,
            batch_limit: config.scheduler.batch_limit,
            max_attempts: config.queue.max_attempts,
            allow_browser_fallback: config.scraper.browser_fallback,
            in_flight_ttl: Duration::from_secs(config.queue.visibility_timeout_secs)
                + config.job_deadline(),
        },
    );
    let scheduler_shutdown = shutdown_rx.clone();
    let scheduler_handle = tokio::spawn(async move { scheduler.run(scheduler_shutdown).await });

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("binding health server to {}", config.server.bind))?;
    info!(bind = %config.server.bind, "Health endpoints listening");
    let health_router = health::router(HealthState::new(app.trackers.clone(), app.queue.clone()));
    let health_handle = tokio::spawn(axum::serve(listener, health_router).into_future());

    info!(workers = config.worker.count, "Pipeline running; Ctrl-C to stop");
    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    for handle in worker_handles {
        let _ = handle.await;
    }
    let _ = scheduler_handle.await;
    health_handle.abort();

    info!("Pipeline stopped");
    Ok(())
}

fn init_logging(config: &Config, verbose: bool) {
    let level = if verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    if config.logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    init_logging(&config, cli.verbose);

    let app = build_app(config)?;

    match cli.command {
        Commands::Run => run_pipeline(app).await?,

        Commands::Track {
            product_id,
            name,
            url,
            scrape_now,
            interval_secs,
        } => {
            let response = app.service.track_competitor(TrackRequest {
                product_id,
                competitor_name: name,
                raw_url: url,
                active: true,
                enqueue_scrape: scrape_now,
                check_interval_secs: interval_secs,
            })?;
            println!("{}", serde_json::to_string_pretty(&response.tracker)?);
            if let Some(job_id) = response.job_id {
                println!("enqueued job {job_id}");
            }
        }

        Commands::Scrape {
            url,
            tracker_id,
            no_browser,
        } => {
            let result = app
                .service
                .fetch_now(&url, tracker_id, Some(!no_browser))
                .await;
            match result {
                Ok(fetched) => {
                    println!(
                        "{} {} (source={}, adapter={}, confidence={:.2})",
                        fetched.price,
                        fetched.currency,
                        fetched.source.as_str(),
                        fetched.adapter_id,
                        fetched.confidence
                    );
                }
                Err(e) => {
                    eprintln!("scrape failed: {e}");
                    std::process::exit(1);
                }
            }
        }

        Commands::Enqueue { tracker_id } => {
            let job_id = app.service.enqueue_scrape(tracker_id)?;
            println!("enqueued job {job_id}");
        }

        Commands::Recommend { product_id } => {
            let recommendation = app.service.recommend(product_id)?;
            println!("{}", serde_json::to_string_pretty(&recommendation)?);
        }

        Commands::History {
            product_id,
            tracker_id,
            days,
        } => {
            let points = match (product_id, tracker_id) {
                (Some(product_id), None) => app.service.history_for_product(product_id, days)?,
                (None, Some(tracker_id)) => app.service.history_for_tracker(tracker_id, days)?,
                _ => anyhow::bail!("pass exactly one of --product-id or --tracker-id"),
            };
            println!("{}", serde_json::to_string_pretty(&points)?);
        }

        Commands::Product {
            id,
            name,
            price,
            cost,
            category,
            sku,
        } => {
            let product = Product {
                id: id.unwrap_or_else(Uuid::new_v4),
                name,
                sku,
                category,
                cost,
                current_price: price,
                stock: None,
                active: true,
            };
            app.products.upsert(&product)?;
            println!("{}", serde_json::to_string_pretty(&product)?);
        }

        Commands::Dlq { limit } => {
            let entries = app.service.dlq_entries(limit)?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
    }

    Ok(())
}
