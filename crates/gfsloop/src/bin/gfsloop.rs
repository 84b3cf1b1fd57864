//! gfsloop CLI
//!
//! Usage:
//!   gfsloop                          # Run on the configured cron schedule
//!   gfsloop -c gfsloop.yaml          # Use a configuration file
//!   gfsloop --once                   # Single cycle, exit 2 if no run is available
//!   gfsloop --once --at 2024-05-01T07:00:00Z
//!   gfsloop --dry-run                # Print candidate runs and URLs, no network

use argh::FromArgs;
use chrono::{DateTime, Utc};
use gfsloop::consumer::{ManifestWriter, StoreConsumer};
use gfsloop::scheduler::{run_once, run_scheduler};
use gfsloop::{Config, FetchOutcome, HttpSource, Resolver};
use tokio::sync::watch;

/// GFS forecast-run discovery and retrieval
#[derive(FromArgs)]
struct Args {
    /// path to the configuration file (optional, uses defaults otherwise)
    #[argh(option, short = 'c')]
    config: Option<String>,

    /// run a single cycle and exit
    #[argh(switch)]
    once: bool,

    /// override the current time (RFC 3339) for a single cycle
    #[argh(option)]
    at: Option<String>,

    /// print candidate runs and locators without touching the network or store
    #[argh(switch)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Args = argh::from_env();

    let config = match &args.config {
        Some(path) => {
            log::info!("Loading config from: {}", path);
            Config::from_file(path)?
        }
        None => {
            log::info!("No config file specified, using defaults");
            Config::default()
        }
    };

    let now = match &args.at {
        Some(at) => DateTime::parse_from_rfc3339(at)
            .map_err(|e| anyhow::anyhow!("invalid --at '{}': {}", at, e))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let source = HttpSource::new(config.request_timeout())?;
    let resolver = Resolver::new(source, &config);

    if args.dry_run {
        for (run, targets) in resolver.plan(now) {
            println!("run {} ({} files)", run, targets.len());
            for target in targets {
                println!("  {}  {}", target.local_path(&config.store_root).display(), target.url);
            }
        }
        return Ok(());
    }

    log::info!(
        "Store: {}, horizon: {}h, variables: {:?}",
        config.store_root.display(),
        config.max_horizon_hours,
        config
            .variables
            .iter()
            .map(|v| v.category.as_str())
            .collect::<Vec<_>>()
    );

    let consumers: Vec<Box<dyn StoreConsumer>> =
        vec![Box::new(ManifestWriter::new(&config.store_root))];

    if args.once || args.at.is_some() {
        return match run_once(&resolver, &consumers, now).await? {
            FetchOutcome::Found(fetched) => {
                println!("Downloaded run {}: {} files", fetched.run, fetched.files.len());
                Ok(())
            }
            FetchOutcome::NoRunAvailable(_) => {
                println!("No valid GFS data was found for the specified runs.");
                std::process::exit(2);
            }
        };
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    ctrlc::set_handler(move || {
        log::info!("Received Ctrl+C, shutting down gracefully...");
        let _ = shutdown_tx.send(());
    })?;

    run_scheduler(
        &resolver,
        &consumers,
        &config.schedule,
        config.run_on_start,
        shutdown_rx,
    )
    .await?;

    log::info!("gfsloop stopped");
    Ok(())
}
