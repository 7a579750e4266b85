use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rental_scout::config::{load_app_config, AppConfig};
use rental_scout::enrich::{AmenityScorer, CommuteEngine};
use rental_scout::models::{LocationInput, PushKeys, PushSubscription};
use rental_scout::notify::{HttpPushTransport, NotificationDispatcher};
use rental_scout::scrapers::{FilterSettings, RentalSiteScraper};
use rental_scout::store::{MemoryStore, Store};
use rental_scout::Scout;

#[derive(Debug, Parser)]
#[command(name = "rental-scout", about = "Rental listing watcher and enricher")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one poll cycle and notify about new listings
    Poll,
    /// Fetch and reconcile without notifying
    Refresh,
    /// Poll on the configured cron schedule until interrupted
    Watch,
    /// Show the filter, or replace it when any ward is given
    Settings {
        #[arg(long, value_delimiter = ',')]
        wards: Vec<u32>,
        #[arg(long, value_delimiter = ',')]
        stations: Vec<u32>,
        #[arg(long)]
        min_rent: Option<i64>,
        #[arg(long)]
        max_rent: Option<i64>,
        #[arg(long)]
        min_size: Option<f64>,
        #[arg(long)]
        max_size: Option<f64>,
        #[arg(long)]
        max_walk: Option<u32>,
        #[arg(long, value_delimiter = ',')]
        features: Vec<String>,
    },
    /// Livability scores for listings in a JSON file, or the current snapshot
    Scores {
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Commute times for listings in a JSON file, or the current snapshot
    Commutes {
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Register a push endpoint
    Subscribe {
        #[arg(long)]
        endpoint: String,
        #[arg(long)]
        p256dh: String,
        #[arg(long)]
        auth: String,
    },
    /// Remove a push endpoint
    Unsubscribe {
        #[arg(long)]
        endpoint: String,
    },
    /// Show recent notification history
    History,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn build_scout(config: &AppConfig, store: Arc<dyn Store>) -> anyhow::Result<Scout> {
    let source = Arc::new(RentalSiteScraper::new(&config.scraper)?);
    let transport = Arc::new(HttpPushTransport::new(&config.push)?);
    let dispatcher = NotificationDispatcher::new(
        Arc::clone(&store),
        transport,
        config.scraper.site_url.clone(),
        config.history_limit,
    );
    Ok(Scout::new(source, store, dispatcher))
}

/// Enrichment inputs from a JSON file, falling back to the stored snapshot.
async fn load_inputs(scout: &Scout, input: Option<PathBuf>) -> anyhow::Result<Vec<LocationInput>> {
    match input {
        Some(path) => {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
        }
        None => Ok(scout
            .sync()
            .snapshot()
            .await?
            .iter()
            .map(LocationInput::from)
            .collect()),
    }
}

async fn watch(config: &AppConfig, scout: Arc<Scout>) -> anyhow::Result<()> {
    let mut scheduler = JobScheduler::new().await?;

    let job = Job::new_async(config.poll_schedule.as_str(), move |_uuid, _lock| {
        let scout = Arc::clone(&scout);
        Box::pin(async move {
            match scout.poll().await {
                Ok(report) => info!(
                    total = report.total,
                    new = report.new_count,
                    "⏰ scheduled poll complete"
                ),
                Err(e) => error!(error = %e, "scheduled poll failed"),
            }
        })
    })?;
    scheduler.add(job).await?;
    scheduler.start().await?;

    info!(schedule = %config.poll_schedule, "👀 watching for new listings; ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    scheduler.shutdown().await?;
    info!("watch stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    let store: Arc<dyn Store> = Arc::new(
        MemoryStore::open(&config.store_path)
            .await
            .with_context(|| format!("opening store at {}", config.store_path.display()))?,
    );
    let scout = Arc::new(build_scout(&config, Arc::clone(&store))?);

    match cli.command {
        Command::Poll => {
            info!("🏠 polling {}", config.scraper.site_url);
            let report = scout.poll().await?;
            info!("✅ {} listings, {} new", report.total, report.new_count);
            print_json(&report)?;
        }
        Command::Refresh => print_json(&scout.refresh().await?)?,
        Command::Watch => watch(&config, scout).await?,
        Command::Settings {
            wards,
            stations,
            min_rent,
            max_rent,
            min_size,
            max_size,
            max_walk,
            features,
        } => {
            if wards.is_empty() {
                print_json(&scout.settings().await?)?;
            } else {
                let settings = FilterSettings {
                    wards,
                    stations,
                    min_rent,
                    max_rent,
                    min_size,
                    max_size,
                    max_walk_minutes: max_walk,
                    features,
                };
                print_json(&scout.update_settings(settings).await?)?;
            }
        }
        Command::Scores { input } => {
            let inputs = load_inputs(&scout, input).await?;
            let scorer = AmenityScorer::new(Arc::clone(&store), config.scoring.clone())?;
            print_json(&scorer.score_batch(&inputs).await)?;
        }
        Command::Commutes { input } => {
            let inputs = load_inputs(&scout, input).await?;
            let engine = CommuteEngine::new(Arc::clone(&store), config.commute.clone())?;
            print_json(&engine.commute_batch(&inputs).await)?;
        }
        Command::Subscribe {
            endpoint,
            p256dh,
            auth,
        } => {
            let hash = scout
                .dispatcher()
                .registry()
                .register(PushSubscription {
                    endpoint,
                    keys: PushKeys { p256dh, auth },
                    registered_at: None,
                })
                .await?;
            info!("🔔 subscribed {hash}");
        }
        Command::Unsubscribe { endpoint } => {
            scout.dispatcher().registry().unregister(&endpoint).await?;
            info!("🔕 unsubscribed");
        }
        Command::History => print_json(&scout.dispatcher().history().await?)?,
    }

    Ok(())
}
