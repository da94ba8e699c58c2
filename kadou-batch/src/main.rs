//! kadou-batch - Venue occupancy estimator
//!
//! Runs the collection and aggregation schedulers, or one ad-hoc step of
//! either, plus inspection and venue directory maintenance.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{ArgGroup, Parser, Subcommand};
use serde::Deserialize;
use sqlx::SqlitePool;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kadou_batch::aggregator::summary::history_summary;
use kadou_batch::aggregator::RateAggregator;
use kadou_batch::classifier::LayoutRegistry;
use kadou_batch::db::{self, venues, workers};
use kadou_batch::fetch::{FetchTransport, SessionManager};
use kadou_batch::orchestrator::inspection::{inspect, InspectTarget, InspectionRequest};
use kadou_batch::orchestrator::{FetchOrchestrator, HeldPageSource, LivePageSource, VenueRun};
use kadou_batch::scheduler::{AggregationJob, CollectionJob, Scheduler};
use kadou_common::config::{resolve_root_folder, KadouConfig, LoggingConfig};
use kadou_common::models::{LayoutProfile, Venue, VenueCategory};
use kadou_common::time::{format_date, SiteClock};

/// Command-line arguments for kadou-batch
#[derive(Parser, Debug)]
#[command(name = "kadou-batch")]
#[command(about = "Venue occupancy estimator: collection, aggregation and inspection")]
#[command(version)]
struct Args {
    /// Config file (overrides KADOU_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Root folder holding the database and held pages
    #[arg(long, global = true)]
    root_folder: Option<PathBuf>,

    /// Log level or filter directive (RUST_LOG still wins)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the collection and aggregation drivers until interrupted
    Scheduler,

    /// Run one collection cycle now
    Collect {
        #[arg(long)]
        venue_id: Option<i64>,
        /// Collect even outside operating hours
        #[arg(long)]
        force: bool,
    },

    /// Aggregate one business date (default: yesterday, site-local)
    Aggregate {
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        venue_id: Option<i64>,
        /// Recompute and overwrite existing rates
        #[arg(long)]
        force: bool,
    },

    /// Classify a page without storing anything
    #[command(group(ArgGroup::new("target").required(true).args(["url", "held_page", "venue_id"])))]
    Inspect {
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        held_page: Option<PathBuf>,
        /// Newest held page of a registered venue
        #[arg(long)]
        venue_id: Option<i64>,
        #[arg(long)]
        layout: Option<LayoutProfile>,
        #[arg(long)]
        capacity: Option<u32>,
        #[arg(long)]
        category: Option<VenueCategory>,
    },

    /// Rate history for one venue
    Summary {
        #[arg(long)]
        venue_id: i64,
        #[arg(long, default_value_t = 7)]
        days: u32,
        #[arg(long)]
        json: bool,
    },

    /// Venue directory maintenance
    Venues {
        #[command(subcommand)]
        action: VenueAction,
    },

    /// Worker registry maintenance
    Workers {
        #[command(subcommand)]
        action: WorkerAction,
    },
}

#[derive(Subcommand, Debug)]
enum VenueAction {
    List {
        #[arg(long)]
        json: bool,
    },
    /// Upsert venues from a TOML file of `[[venues]]` tables
    Import { file: PathBuf },
    /// Take a venue out of scope (venues are never deleted)
    Deactivate {
        #[arg(long)]
        venue_id: i64,
    },
}

#[derive(Subcommand, Debug)]
enum WorkerAction {
    Retire {
        #[arg(long)]
        venue_id: i64,
        #[arg(long)]
        worker_id: String,
    },
}

#[derive(Debug, Deserialize)]
struct VenueImport {
    #[serde(default)]
    venues: Vec<Venue>,
}

/// Everything the subcommands share
struct Runtime {
    config: KadouConfig,
    root: PathBuf,
    clock: SiteClock,
    pool: SqlitePool,
}

impl Runtime {
    fn transport(&self) -> (Arc<SessionManager>, Arc<FetchTransport>) {
        let sessions = Arc::new(SessionManager::new(&self.config.sessions, &self.config.transport));
        let transport = Arc::new(FetchTransport::new(&self.config.transport, Arc::clone(&sessions)));
        (sessions, transport)
    }

    fn orchestrator(&self, transport: Arc<FetchTransport>) -> Arc<FetchOrchestrator> {
        let source = Arc::new(LivePageSource::new(transport, self.clock));
        Arc::new(FetchOrchestrator::new(
            source,
            LayoutRegistry::builtin(),
            self.config.orchestrator.max_concurrent,
        ))
    }

    fn aggregator(&self) -> RateAggregator {
        RateAggregator::new(self.pool.clone(), self.clock, self.config.db_max_lock_wait_ms)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (config, config_path) =
        KadouConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config.logging, args.log_level.as_deref())?;

    info!("Starting kadou-batch {}", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: built-in defaults"),
    }

    let root = resolve_root_folder(args.root_folder.as_deref(), &config);
    std::fs::create_dir_all(&root)
        .with_context(|| format!("Failed to create root folder {}", root.display()))?;
    info!("Root folder: {}", root.display());

    let db_path = config.database_path(&root);
    let pool = db::init_database_pool(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    info!("Database: {}", db_path.display());

    let clock = config.site_clock()?;
    let rt = Runtime {
        config,
        root,
        clock,
        pool,
    };

    match args.command {
        Command::Scheduler => run_scheduler(&rt).await,
        Command::Collect { venue_id, force } => run_collect(&rt, venue_id, force).await,
        Command::Aggregate {
            date,
            venue_id,
            force,
        } => run_aggregate(&rt, date, venue_id, force).await,
        Command::Inspect {
            url,
            held_page,
            venue_id,
            layout,
            capacity,
            category,
        } => {
            let target = match (url, held_page, venue_id) {
                (Some(url), _, _) => InspectTarget::Url(url),
                (_, Some(path), _) => InspectTarget::HeldPage(path),
                (_, _, Some(id)) => InspectTarget::Venue(venues::require(&rt.pool, id).await?),
                _ => bail!("One of --url, --held-page or --venue-id is required"),
            };
            let request = InspectionRequest {
                target,
                layout,
                category,
                capacity,
            };
            run_inspect(&rt, request).await
        }
        Command::Summary {
            venue_id,
            days,
            json,
        } => {
            venues::require(&rt.pool, venue_id).await?;
            let summary = history_summary(&rt.pool, venue_id, days, rt.clock.today()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("{}", summary);
            }
            Ok(())
        }
        Command::Venues { action } => run_venues(&rt, action).await,
        Command::Workers {
            action: WorkerAction::Retire {
                venue_id,
                worker_id,
            },
        } => {
            if workers::retire(&rt.pool, venue_id, &worker_id).await? {
                println!("Retired worker {} at venue {}", worker_id, venue_id);
                Ok(())
            } else {
                bail!("Worker {} not registered at venue {}", worker_id, venue_id)
            }
        }
    }
}

/// `RUST_LOG` first, then `--log-level`, then the configured level
fn init_tracing(logging: &LoggingConfig, cli_level: Option<&str>) -> Result<()> {
    let level = cli_level.unwrap_or(&logging.level).to_string();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_layer = match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

/// Token cancelled on Ctrl+C or SIGTERM
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });
    token
}

async fn run_scheduler(rt: &Runtime) -> Result<()> {
    let (sessions, transport) = rt.transport();
    let collection = CollectionJob::new(rt.pool.clone(), rt.orchestrator(transport), rt.clock, &rt.config);
    let aggregation = AggregationJob::new(rt.aggregator(), rt.clock);

    let scheduler = Scheduler::from_config(
        &rt.config.scheduler,
        Arc::new(collection),
        Arc::new(aggregation),
        rt.clock,
    )?;

    let stats = scheduler.run(shutdown_token()).await;
    sessions.close_all().await;
    for (name, s) in stats {
        info!(
            driver = %name,
            started = s.started,
            succeeded = s.succeeded,
            failed = s.failed,
            "Driver summary"
        );
    }
    info!("Scheduler shutdown complete");
    Ok(())
}

async fn run_collect(rt: &Runtime, venue_id: Option<i64>, force: bool) -> Result<()> {
    let (sessions, transport) = rt.transport();
    let mut job = CollectionJob::new(rt.pool.clone(), rt.orchestrator(transport), rt.clock, &rt.config)
        .forced(force);
    if let Some(id) = venue_id {
        job = job.with_venue(id);
    }

    let summary = job.execute(&shutdown_token()).await?;
    sessions.close_all().await;

    let run = &summary.run;
    println!(
        "Collection {}: {} venues, {} records stored, {} failed, {} closed, {} without hours ({:.1}s)",
        run.run_id,
        run.venues.len(),
        summary.stored,
        run.failed_count(),
        summary.closed,
        summary.misconfigured,
        run.elapsed.as_secs_f64()
    );
    for (id, result) in &run.venues {
        match result {
            VenueRun::Collected(c) => println!(
                "  venue {:>6}: {} workers, {} on shift, {} working{}",
                id,
                c.classification.workers.len(),
                c.classification.on_shift_count(),
                c.classification.working_count(),
                c.classification
                    .diagnostics
                    .degraded
                    .map(|d| format!(" (degraded: {})", d))
                    .unwrap_or_default()
            ),
            VenueRun::Failed(e) => println!("  venue {:>6}: failed: {}", id, e),
            VenueRun::Cancelled => println!("  venue {:>6}: cancelled", id),
        }
    }
    Ok(())
}

async fn run_aggregate(
    rt: &Runtime,
    date: Option<NaiveDate>,
    venue_id: Option<i64>,
    force: bool,
) -> Result<()> {
    let date = match date {
        Some(d) => d,
        None => AggregationJob::new(rt.aggregator(), rt.clock).target_date()?,
    };
    info!("Aggregating {}", format_date(date));
    let report = rt
        .aggregator()
        .run_for_date(date, venue_id, force, &shutdown_token())
        .await?;
    println!("{}", report);
    Ok(())
}

async fn run_inspect(rt: &Runtime, request: InspectionRequest) -> Result<()> {
    let held = HeldPageSource::new(rt.config.held_pages_path(&rt.root), rt.clock);
    let registry = LayoutRegistry::builtin();

    let report = match &request.target {
        InspectTarget::Url(_) => {
            let (sessions, transport) = rt.transport();
            let live = LivePageSource::new(transport, rt.clock);
            let report = inspect(&registry, Some(&live), &held, &request).await;
            sessions.close_all().await;
            report?
        }
        _ => inspect(&registry, None, &held, &request).await?,
    };
    println!("{}", report);
    Ok(())
}

async fn run_venues(rt: &Runtime, action: VenueAction) -> Result<()> {
    match action {
        VenueAction::List { json } => {
            let all = venues::list_all(&rt.pool).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&all)?);
                return Ok(());
            }
            for v in all {
                let hours = v
                    .operating_hours()
                    .map(|h| h.to_string())
                    .unwrap_or_else(|_| "no hours".to_string());
                println!(
                    "{:>6}  {:<24} {:<10} {:<16} cap={:<4} {:<11} {}{}",
                    v.id,
                    v.name,
                    v.category,
                    v.layout,
                    v.capacity.map(|c| c.to_string()).unwrap_or_else(|| "-".into()),
                    hours,
                    v.schedule_url,
                    if v.in_scope { "" } else { "  [out of scope]" }
                );
            }
            Ok(())
        }
        VenueAction::Import { file } => import_venues(&rt.pool, &file).await,
        VenueAction::Deactivate { venue_id } => {
            if venues::deactivate(&rt.pool, venue_id).await? {
                println!("Venue {} is now out of scope", venue_id);
                Ok(())
            } else {
                bail!("Venue {} not found", venue_id)
            }
        }
    }
}

async fn import_venues(pool: &SqlitePool, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let import: VenueImport =
        toml::from_str(&content).with_context(|| format!("Invalid venue file {}", file.display()))?;

    for venue in &import.venues {
        if let Err(e) = venue.operating_hours() {
            tracing::warn!(venue_id = venue.id, error = %e, "Imported venue will not be collected or aggregated");
        }
        venues::upsert(pool, venue)
            .await
            .with_context(|| format!("Failed to store venue {}", venue.id))?;
    }
    println!("Imported {} venues from {}", import.venues.len(), file.display());
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
