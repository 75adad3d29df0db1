//! Bounded-attempt scrape loop with jittered backoff

use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::error::ScrapeError;
use crate::extractor;
use crate::fetcher::PageFetcher;
use crate::models::{Marketplace, ProductSnapshot};
use crate::resolver::ResolvedProduct;

/// How often and how patiently a scrape is retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff_base: Duration::from_secs(30),
            backoff_jitter: Duration::from_secs(30),
        }
    }
}

/// Run fetch → extract → validate up to `max_attempts` times.
///
/// Retryable failures sleep `backoff_base + random(0, backoff_jitter)`
/// between attempts; fatal ones surface immediately. Exhaustion wraps the
/// most recent failure in [`ScrapeError::ExhaustedRetries`]. The randomness
/// source is injected so backoff timing is deterministic under test.
pub async fn scrape_with_retry<R: Rng + Send>(
    fetcher: &dyn PageFetcher,
    resolved: &ResolvedProduct,
    policy: &RetryPolicy,
    rng: &mut R,
) -> Result<ProductSnapshot, ScrapeError> {
    let mut last_error: Option<ScrapeError> = None;

    for attempt in 1..=policy.max_attempts {
        info!(
            "scrape attempt {}/{} for {}",
            attempt, policy.max_attempts, resolved.canonical_url
        );

        match scrape_once(fetcher, resolved).await {
            Ok(snapshot) => return Ok(snapshot),
            Err(error) if !error.is_retryable() => return Err(error),
            Err(error) => {
                warn!("attempt {} failed: {}", attempt, error);
                last_error = Some(error);

                if attempt < policy.max_attempts {
                    let jitter = rng.gen_range(Duration::ZERO..=policy.backoff_jitter);
                    let delay = policy.backoff_base + jitter;
                    info!("waiting {:?} before next attempt", delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(ScrapeError::ExhaustedRetries {
        attempts: policy.max_attempts,
        last_error: last_error
            .map(|error| error.to_string())
            .unwrap_or_else(|| "no attempts were made".to_string()),
    })
}

async fn scrape_once(
    fetcher: &dyn PageFetcher,
    resolved: &ResolvedProduct,
) -> Result<ProductSnapshot, ScrapeError> {
    let html = fetcher.fetch_page(&resolved.canonical_url).await?;

    // A short link that never expanded leaves the marketplace at EU; the
    // fetched page's canonical link settles it.
    let refined;
    let resolved = if resolved.marketplace == Marketplace::Eu
        && let Some(href) = extractor::canonical_link(&html)
    {
        refined = resolved.refined_from_page(&href);
        &refined
    } else {
        resolved
    };

    let snapshot = extractor::extract_snapshot(&html, resolved);
    extractor::validate(&snapshot)?;
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    struct AlwaysCaptcha {
        calls: AtomicU32,
    }

    #[async_trait]
    impl PageFetcher for AlwaysCaptcha {
        async fn fetch_page(&self, _url: &str) -> Result<String, ScrapeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ScrapeError::CaptchaDetected)
        }

        async fn expand_url(&self, _url: &str) -> Option<String> {
            None
        }
    }

    struct GoodPage;

    #[async_trait]
    impl PageFetcher for GoodPage {
        async fn fetch_page(&self, _url: &str) -> Result<String, ScrapeError> {
            Ok(r#"<html><body><span id="productTitle">Echo Dot</span></body></html>"#.into())
        }

        async fn expand_url(&self, _url: &str) -> Option<String> {
            None
        }
    }

    struct EmptyThenGood {
        calls: AtomicU32,
    }

    #[async_trait]
    impl PageFetcher for EmptyThenGood {
        async fn fetch_page(&self, _url: &str) -> Result<String, ScrapeError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok("<html><body></body></html>".into())
            } else {
                Ok(r#"<html><body><span id="productTitle">Echo Dot</span></body></html>"#.into())
            }
        }

        async fn expand_url(&self, _url: &str) -> Option<String> {
            None
        }
    }

    fn resolved() -> ResolvedProduct {
        ResolvedProduct {
            asin: "B08N5WRWNW".into(),
            canonical_url: "https://www.amazon.com/dp/B08N5WRWNW".into(),
            marketplace: Marketplace::Us,
            currency: "USD",
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff_base: Duration::ZERO,
            backoff_jitter: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn captcha_exhausts_all_attempts() {
        let fetcher = AlwaysCaptcha {
            calls: AtomicU32::new(0),
        };
        let mut rng = StdRng::seed_from_u64(1);

        let err = scrape_with_retry(&fetcher, &resolved(), &fast_policy(2), &mut rng)
            .await
            .unwrap_err();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        match err {
            ScrapeError::ExhaustedRetries {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 2);
                assert!(last_error.contains("captcha"), "message: {last_error}");
            }
            other => panic!("expected ExhaustedRetries, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_sleeps_between_attempts() {
        let fetcher = AlwaysCaptcha {
            calls: AtomicU32::new(0),
        };
        let mut rng = StdRng::seed_from_u64(1);
        let policy = RetryPolicy {
            max_attempts: 2,
            backoff_base: Duration::from_secs(30),
            backoff_jitter: Duration::from_secs(30),
        };

        let started = tokio::time::Instant::now();
        let _ = scrape_with_retry(&fetcher, &resolved(), &policy, &mut rng).await;
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_secs(30), "slept only {elapsed:?}");
        assert!(elapsed <= Duration::from_secs(61), "slept {elapsed:?}");
    }

    #[tokio::test]
    async fn success_returns_immediately() {
        let mut rng = StdRng::seed_from_u64(1);
        let snapshot = scrape_with_retry(&GoodPage, &resolved(), &fast_policy(2), &mut rng)
            .await
            .unwrap();
        assert_eq!(snapshot.title.as_deref(), Some("Echo Dot"));
        assert_eq!(snapshot.asin, "B08N5WRWNW");
    }

    #[tokio::test]
    async fn invalid_snapshot_retries_then_succeeds() {
        let fetcher = EmptyThenGood {
            calls: AtomicU32::new(0),
        };
        let mut rng = StdRng::seed_from_u64(1);

        let snapshot = scrape_with_retry(&fetcher, &resolved(), &fast_policy(2), &mut rng)
            .await
            .unwrap();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(snapshot.title.as_deref(), Some("Echo Dot"));
    }
}
