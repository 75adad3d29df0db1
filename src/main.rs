use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

mod alerts;
mod config;
mod error;
mod extractor;
mod fetcher;
mod models;
mod notify;
mod price_watcher;
mod resolver;
mod retry;
mod store;

use config::Settings;
use price_watcher::PriceWatcher;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    info!("Starting pricewatch");

    let watcher = PriceWatcher::new(Settings::from_env()).await?;

    // One-shot subcommands, then the default scheduler mode.
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("track") => {
            let (email, url) = two_args(&mut args, "track <email> <url>")?;
            let snapshot = watcher.track_product(&email, &url).await?;
            info!(
                "now tracking {} ({:?} {})",
                snapshot.asin, snapshot.current_price, snapshot.currency
            );
            return Ok(());
        }
        Some("alert") => {
            let (email, asin) = two_args(&mut args, "alert <email> <asin> <type> <target>")?;
            let alert_type = args
                .next()
                .and_then(|code| models::AlertType::from_code(&code.to_uppercase()))
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "alert type must be PRICE_DROP, PRICE_INCREASE or STOCK_AVAILABLE"
                    )
                })?;
            let target_price: f64 = args
                .next()
                .ok_or_else(|| anyhow::anyhow!("usage: pricewatch alert <email> <asin> <type> <target>"))?
                .parse()?;

            let alert_id = watcher.add_alert(&email, &asin, alert_type, target_price).await?;
            info!("created alert {} on {}", alert_id, asin);
            return Ok(());
        }
        Some("refresh") => {
            watcher.refresh_all().await?;
            return Ok(());
        }
        Some(other) => {
            anyhow::bail!("unknown command {other:?}, expected \"track\", \"alert\" or \"refresh\"");
        }
        None => {}
    }

    // Run once immediately to catch up
    if let Err(e) = watcher.refresh_all().await {
        error!("Error during initial refresh: {}", e);
    }

    // Refresh all tracked products every 6 hours
    let sched = JobScheduler::new().await?;

    let job_watcher = watcher.clone();
    sched
        .add(Job::new_async("0 0 */6 * * *", move |_uuid, _l| {
            let watcher = job_watcher.clone();
            Box::pin(async move {
                if let Err(e) = watcher.refresh_all().await {
                    error!("Error refreshing tracked products: {}", e);
                }
            })
        })?)
        .await?;

    info!("Scheduler started - refreshing every 6 hours");
    sched.start().await?;

    // Keep the program running
    loop {
        tokio::time::sleep(tokio::time::Duration::from_secs(30)).await;
    }
}

fn two_args(
    args: &mut impl Iterator<Item = String>,
    usage: &str,
) -> Result<(String, String)> {
    match (args.next(), args.next()) {
        (Some(first), Some(second)) => Ok((first, second)),
        _ => Err(anyhow::anyhow!("usage: pricewatch {usage}")),
    }
}
