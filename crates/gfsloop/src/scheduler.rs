//! Cron-driven invocation of the resolver.
//!
//! Each occurrence of the configured cron expression runs one cycle:
//! `resolve_and_fetch` followed by every registered consumer. Cycles run
//! strictly one after another, so a store only ever has a single writer.

use crate::consumer::StoreConsumer;
use crate::resolver::{FetchError, FetchOutcome, Resolver};
use crate::source::ForecastSource;
use chrono::{DateTime, Utc};
use std::str::FromStr;
use tokio::sync::watch;

/// Errors from scheduler operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Invalid cron expression: {0}")]
    CronParse(String),
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),
}

type Result<T> = std::result::Result<T, SchedulerError>;

/// Accept crontab-style schedules such as `15 */6 * * *` (a quarter past
/// each GFS cycle) by pinning the seconds field the `cron` crate expects.
fn normalize_cron_expr(expr: &str) -> String {
    let expr = expr.trim();
    match expr.split_whitespace().count() {
        5 => format!("0 {}", expr),
        _ => expr.to_string(),
    }
}

/// Parse a 5- or 6-field cron expression.
pub fn parse_schedule(cron_expr: &str) -> Result<cron::Schedule> {
    let expr = normalize_cron_expr(cron_expr);
    cron::Schedule::from_str(&expr)
        .map_err(|e| SchedulerError::CronParse(format!("{}: {}", cron_expr, e)))
}

/// Compute the next cron occurrence strictly after `after`.
pub fn next_run_after(cron_expr: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    parse_schedule(cron_expr)?
        .after(&after)
        .next()
        .ok_or_else(|| SchedulerError::CronParse("no next occurrence".to_string()))
}

/// Run one cycle: resolve, fetch, then hand the result to every consumer.
///
/// Consumer failures are logged and never undo the fetch.
pub async fn run_once<S: ForecastSource>(
    resolver: &Resolver<S>,
    consumers: &[Box<dyn StoreConsumer>],
    now: DateTime<Utc>,
) -> Result<FetchOutcome> {
    let outcome = resolver.resolve_and_fetch(now).await?;

    match &outcome {
        FetchOutcome::Found(fetched) => {
            log::info!(
                "[Scheduler] run {} ready: {} files",
                fetched.run,
                fetched.files.len()
            );
            for consumer in consumers {
                if let Err(e) = consumer.consume(fetched).await {
                    log::error!("[Scheduler] consumer '{}' failed: {}", consumer.name(), e);
                }
            }
        }
        FetchOutcome::NoRunAvailable(summary) => {
            for report in &summary.candidates {
                log::warn!(
                    "[Scheduler] run {} unusable: {} unavailable, {} failed downloads of {} files",
                    report.run,
                    report.probe_failures(),
                    report.download_failures(),
                    report.targets
                );
            }
            for consumer in consumers {
                if let Err(e) = consumer.on_no_run().await {
                    log::error!("[Scheduler] consumer '{}' failed: {}", consumer.name(), e);
                }
            }
        }
    }

    Ok(outcome)
}

/// Run the scheduler loop until the shutdown signal fires.
///
/// A cycle error (store I/O) is logged and the loop waits for the next
/// occurrence.
pub async fn run_scheduler<S: ForecastSource>(
    resolver: &Resolver<S>,
    consumers: &[Box<dyn StoreConsumer>],
    cron_expr: &str,
    run_on_start: bool,
    mut shutdown: watch::Receiver<()>,
) -> Result<()> {
    let schedule = parse_schedule(cron_expr)?;
    log::info!("[Scheduler] starting with schedule '{}'", cron_expr);

    if run_on_start {
        tick(resolver, consumers).await;
    }

    loop {
        let now = Utc::now();
        let Some(next) = schedule.after(&now).next() else {
            log::warn!("[Scheduler] schedule has no further occurrences, exiting");
            return Ok(());
        };
        let wait = (next - now).to_std().unwrap_or_default();
        log::info!("[Scheduler] next cycle at {}", next.format("%Y-%m-%d %H:%M:%SZ"));

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                tick(resolver, consumers).await;
            }
            _ = shutdown.changed() => {
                log::info!("[Scheduler] shutdown signal received, exiting");
                return Ok(());
            }
        }
    }
}

async fn tick<S: ForecastSource>(resolver: &Resolver<S>, consumers: &[Box<dyn StoreConsumer>]) {
    if let Err(e) = run_once(resolver, consumers, Utc::now()).await {
        log::error!("[Scheduler] cycle error: {}", e);
    }
}
