//! Orchestrates the scrape pipeline over the stored set of tracked products

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{error, info};

use crate::alerts::AlertEngine;
use crate::config::Settings;
use crate::fetcher::ChromeFetcher;
use crate::models::{AlertType, ProductSnapshot};
use crate::notify::WebhookNotifier;
use crate::resolver::{self, ResolvedProduct};
use crate::retry::{self, RetryPolicy};
use crate::store::Store;

#[derive(Clone)]
pub struct PriceWatcher {
    fetcher: ChromeFetcher,
    store: Store,
    notifier: WebhookNotifier,
    settings: Settings,
}

impl PriceWatcher {
    pub async fn new(settings: Settings) -> Result<Self> {
        let store = Store::new(&settings.database_url).await?;
        let fetcher = ChromeFetcher::new(&settings);
        let notifier = WebhookNotifier::new();

        Ok(Self {
            fetcher,
            store,
            notifier,
            settings,
        })
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.settings.max_attempts,
            backoff_base: self.settings.backoff_base,
            backoff_jitter: self.settings.backoff_jitter,
        }
    }

    /// Start tracking a user-supplied product URL: resolve, scrape, persist
    /// and run an alert pass over the fresh snapshot.
    pub async fn track_product(&self, email: &str, raw_url: &str) -> Result<ProductSnapshot> {
        if !resolver::is_amazon_url(raw_url) {
            anyhow::bail!("not an Amazon product URL: {raw_url}");
        }

        let user_id = self.store.ensure_user(email).await?;
        let resolved = resolver::resolve(raw_url, &self.fetcher).await?;
        info!(
            "tracking {} on {} for {}",
            resolved.asin,
            resolved.marketplace.as_str(),
            email
        );
        self.refresh_resolved(user_id, &resolved).await
    }

    /// Register an alert rule on a product the user already tracks.
    pub async fn add_alert(
        &self,
        email: &str,
        asin: &str,
        alert_type: AlertType,
        target_price: f64,
    ) -> Result<i64> {
        let user_id = self.store.ensure_user(email).await?;
        let product_id = self
            .store
            .find_product(user_id, asin)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no tracked product with ASIN {asin} for {email}"))?;

        self.store
            .create_alert(user_id, product_id, alert_type, target_price)
            .await
    }

    /// Refresh every active tracked product, one at a time.
    ///
    /// Upstream fetches are strictly sequential, separated by a randomized
    /// 2-4s gap; there is no per-product parallelism.
    pub async fn refresh_all(&self) -> Result<()> {
        let products = self.store.list_tracked_products().await?;
        info!("refreshing {} tracked products", products.len());

        let mut rng = StdRng::from_entropy();
        let mut refreshed = 0_usize;

        for (index, product) in products.iter().enumerate() {
            if index > 0 {
                let gap = rng
                    .gen_range(self.settings.refresh_delay_min..=self.settings.refresh_delay_max);
                tokio::time::sleep(gap).await;
            }

            let resolved = ResolvedProduct::new(product.asin.clone(), product.marketplace);
            match self.refresh_resolved(product.user_id, &resolved).await {
                Ok(snapshot) => {
                    refreshed += 1;
                    info!(
                        "refreshed product {}: {:?} {}",
                        product.id, snapshot.current_price, snapshot.currency
                    );
                }
                Err(e) => error!("refresh failed for product {}: {:#}", product.id, e),
            }
        }

        info!("refresh pass done: {}/{} succeeded", refreshed, products.len());
        Ok(())
    }

    async fn refresh_resolved(
        &self,
        user_id: i64,
        resolved: &ResolvedProduct,
    ) -> Result<ProductSnapshot> {
        let mut rng = StdRng::from_entropy();
        let snapshot =
            retry::scrape_with_retry(&self.fetcher, resolved, &self.retry_policy(), &mut rng)
                .await?;

        let product_id = self.store.upsert_product(user_id, &snapshot).await?;

        if let Some(price) = snapshot.current_price {
            let changed = self
                .store
                .last_price(product_id)
                .await?
                .is_none_or(|last| (last - price).abs() > f64::EPSILON);
            if changed {
                self.store
                    .append_price_history(product_id, price, snapshot.fetched_at)
                    .await?;
            }
        }

        let engine = AlertEngine::new(&self.store, &self.notifier);
        let triggered = engine.evaluate_product(product_id, &snapshot, true).await?;
        if !triggered.is_empty() {
            info!(
                "{} alert(s) fired for product {}",
                triggered.len(),
                product_id
            );
        }

        Ok(snapshot)
    }
}
