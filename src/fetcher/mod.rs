//! Browser-backed page fetching with basic bot-detection countermeasures
//!
//! Each fetch attempt gets a freshly launched browser that is closed on every
//! exit path and never reused across attempts or products. CDP-level faults
//! never leave this module raw; they are normalized into [`ScrapeError`]
//! kinds first.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use futures::StreamExt;
use rand::Rng;
use rand::seq::SliceRandom;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::ScrapeError;

/// Desktop user agents rotated per browser session.
const USER_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:132.0) Gecko/20100101 Firefox/132.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15",
];

/// Markup fragments that mark a bot-challenge interstitial.
const CAPTCHA_INDICATORS: [&str; 4] = [
    "captcha",
    "robot check",
    "automated access",
    "unusual traffic",
];

const HIDE_WEBDRIVER_JS: &str =
    "Object.defineProperty(navigator, 'webdriver', { get: () => undefined })";

/// Browser capability the resolver and retry controller depend on.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch fully rendered markup for a product page.
    async fn fetch_page(&self, url: &str) -> Result<String, ScrapeError>;

    /// Follow a shortened link's redirect chain; `None` when expansion fails.
    async fn expand_url(&self, url: &str) -> Option<String>;
}

/// Pick a user agent from the fixed pool with an injected randomness source.
pub fn pick_user_agent(rng: &mut impl Rng) -> &'static str {
    USER_AGENTS.choose(rng).copied().unwrap_or(USER_AGENTS[0])
}

/// Whether captured markup is a bot-challenge page rather than a product.
pub fn is_captcha_page(html: &str) -> bool {
    let text = html.to_lowercase();
    CAPTCHA_INDICATORS
        .iter()
        .any(|indicator| text.contains(indicator))
}

/// One exclusively-owned browser, alive for a single fetch attempt.
struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl BrowserSession {
    async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("failed to close browser session: {}", e);
        }
        self.handler.abort();
    }
}

/// [`PageFetcher`] backed by a headless Chromium driven over CDP.
#[derive(Debug, Clone)]
pub struct ChromeFetcher {
    headless: bool,
    nav_timeout: Duration,
}

impl ChromeFetcher {
    pub fn new(settings: &Settings) -> Self {
        Self {
            headless: settings.headless,
            nav_timeout: settings.nav_timeout,
        }
    }

    async fn open_session(&self) -> Result<BrowserSession, ScrapeError> {
        let mut builder = BrowserConfig::builder()
            .window_size(1920, 1080)
            .no_sandbox()
            .args(vec![
                "--disable-blink-features=AutomationControlled",
                "--disable-dev-shm-usage",
                "--disable-gpu",
                "--lang=en-US,en;q=0.9",
            ]);
        if !self.headless {
            builder = builder.with_head();
        }
        let config = builder
            .build()
            .map_err(|e| ScrapeError::FetchTimeout(format!("browser config: {e}")))?;

        let (browser, mut events) = Browser::launch(config)
            .await
            .map_err(|e| ScrapeError::FetchTimeout(format!("browser launch: {e}")))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(BrowserSession { browser, handler })
    }

    async fn grab_page(&self, session: &BrowserSession, url: &str) -> Result<String, ScrapeError> {
        let page = session
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| ScrapeError::FetchTimeout(format!("new page: {e}")))?;

        let user_agent = pick_user_agent(&mut rand::thread_rng());
        let ua_override = SetUserAgentOverrideParams::builder()
            .user_agent(user_agent)
            .build()
            .map_err(ScrapeError::FetchTimeout)?;
        page.execute(ua_override)
            .await
            .map_err(|e| ScrapeError::FetchTimeout(format!("user agent override: {e}")))?;

        let hide_webdriver = AddScriptToEvaluateOnNewDocumentParams::builder()
            .source(HIDE_WEBDRIVER_JS)
            .build()
            .map_err(ScrapeError::FetchTimeout)?;
        page.execute(hide_webdriver)
            .await
            .map_err(|e| ScrapeError::FetchTimeout(format!("stealth script: {e}")))?;

        debug!("navigating to {} as {}", url, user_agent);

        let navigation = async {
            page.goto(url).await?;
            page.wait_for_navigation().await?;
            // The page counts as ready once its root content exists.
            page.find_element("body").await?;
            Ok::<(), chromiumoxide::error::CdpError>(())
        };
        match tokio::time::timeout(self.nav_timeout, navigation).await {
            Err(_) => return Err(ScrapeError::FetchTimeout("page load timeout".into())),
            Ok(Err(e)) => return Err(ScrapeError::FetchTimeout(format!("navigation: {e}"))),
            Ok(Ok(())) => {}
        }

        // One half-page scroll wakes up lazily-loaded content.
        let _ = page
            .evaluate("window.scrollTo(0, document.body.scrollHeight / 2);")
            .await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let html = page
            .content()
            .await
            .map_err(|e| ScrapeError::FetchTimeout(format!("page content: {e}")))?;

        if is_captcha_page(&html) {
            return Err(ScrapeError::CaptchaDetected);
        }

        Ok(html)
    }

    async fn follow_redirects(&self, session: &BrowserSession, url: &str) -> Option<String> {
        let page = match session.browser.new_page(url).await {
            Ok(page) => page,
            Err(e) => {
                warn!("short link navigation failed for {}: {}", url, e);
                return None;
            }
        };
        // Give the redirect chain a moment to settle.
        tokio::time::sleep(Duration::from_secs(2)).await;
        match page.url().await {
            Ok(final_url) => final_url,
            Err(e) => {
                warn!("could not read final URL for {}: {}", url, e);
                None
            }
        }
    }
}

#[async_trait]
impl PageFetcher for ChromeFetcher {
    async fn fetch_page(&self, url: &str) -> Result<String, ScrapeError> {
        let session = self.open_session().await?;
        let result = self.grab_page(&session, url).await;
        session.close().await;
        result
    }

    async fn expand_url(&self, url: &str) -> Option<String> {
        let session = match self.open_session().await {
            Ok(session) => session,
            Err(e) => {
                warn!("short link expansion failed for {}: {}", url, e);
                return None;
            }
        };
        let resolved = self.follow_redirects(&session, url).await;
        session.close().await;
        resolved
    }
}
