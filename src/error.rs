//! Failure kinds for the scraping pipeline

use thiserror::Error;

/// Everything that can go wrong between a raw URL and an accepted snapshot.
///
/// Browser and navigation faults are normalized into these kinds inside the
/// fetcher; nothing below the CDP layer crosses the retry boundary raw.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// No recognizable product identifier in the URL. Never retried.
    #[error("could not extract ASIN from URL: {0}")]
    Resolution(String),

    /// Amazon served a bot-challenge interstitial instead of the product page.
    #[error("bot challenge detected (captcha), try again later")]
    CaptchaDetected,

    /// The page did not reach a ready state within the configured window, or
    /// the navigation itself failed.
    #[error("page fetch failed: {0}")]
    FetchTimeout(String),

    /// Extraction ran but the required fields are missing.
    #[error("scraped data is incomplete: {0}")]
    InvalidSnapshot(String),

    /// Terminal failure after the last retry attempt.
    #[error("failed after {attempts} attempts: {last_error}")]
    ExhaustedRetries { attempts: u32, last_error: String },
}

impl ScrapeError {
    /// Whether another attempt against the same URL could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CaptchaDetected | Self::FetchTimeout(_) | Self::InvalidSnapshot(_)
        )
    }
}
