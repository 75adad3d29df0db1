//! Canonicalizes raw product URLs into an ASIN, marketplace and currency

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;
use url::Url;

use crate::error::ScrapeError;
use crate::fetcher::PageFetcher;
use crate::models::Marketplace;

/// Shortened-link hosts that must be expanded before the ASIN is visible.
const SHORT_LINK_HOSTS: [&str; 3] = ["amzn.to", "amzn.eu", "a.co"];

/// Hosts accepted as Amazon product links.
const AMAZON_HOSTS: [&str; 20] = [
    "amazon.com",
    "amazon.de",
    "amazon.co.uk",
    "amazon.fr",
    "amazon.it",
    "amazon.es",
    "amazon.com.br",
    "amazon.in",
    "amazon.ca",
    "a.co",
    "amzn.to",
    "amzn.eu",
    "amzn.com",
    "amzn.co.uk",
    "amzn.de",
    "amzn.fr",
    "amzn.it",
    "amzn.es",
    "amzn.com.br",
    "amzn.in",
];

lazy_static! {
    /// Path shapes an ASIN can hide in, most specific first. The first match
    /// wins.
    static ref ASIN_PATTERNS: Vec<Regex> = [
        r"/dp/([A-Z0-9]{10})",
        r"/product/([A-Z0-9]{10})",
        r"/gp/product/([A-Z0-9]{10})",
        r"/gp/aw/d/([A-Z0-9]{10})",
        r"/aw/d/([A-Z0-9]{10})",
        r"/d/([A-Z0-9]{10})",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap())
    .collect();
}

/// A product URL reduced to its stable identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProduct {
    pub asin: String,
    pub canonical_url: String,
    pub marketplace: Marketplace,
    pub currency: &'static str,
}

impl ResolvedProduct {
    pub fn new(asin: String, marketplace: Marketplace) -> Self {
        let canonical_url = format!("{}/dp/{}", marketplace.base_url(), asin);
        let currency = marketplace.currency();
        Self {
            asin,
            canonical_url,
            marketplace,
            currency,
        }
    }

    /// Re-derive the marketplace from a URL found on the fetched page.
    ///
    /// Used when the pre-fetch inference landed on `EU` because an `amzn.eu`
    /// short link never got expanded.
    pub fn refined_from_page(&self, page_url: &str) -> Self {
        let marketplace = marketplace_from_url(page_url);
        Self::new(self.asin.clone(), marketplace)
    }
}

/// Turn a raw user-supplied URL into its canonical form.
///
/// Short links are expanded through the fetcher's browser; expansion failure
/// is non-fatal and leaves the original URL in place. A URL without a
/// recognizable ASIN fails with [`ScrapeError::Resolution`].
pub async fn resolve(
    raw_url: &str,
    fetcher: &dyn PageFetcher,
) -> Result<ResolvedProduct, ScrapeError> {
    let mut url = raw_url.trim().to_string();

    if is_short_url(&url) {
        match fetcher.expand_url(&url).await {
            Some(expanded) => {
                debug!("expanded short link {} -> {}", url, expanded);
                url = expanded;
            }
            None => debug!("short link {} did not expand, keeping as-is", url),
        }
    }

    let asin = extract_asin(&url).ok_or_else(|| ScrapeError::Resolution(raw_url.to_string()))?;
    let marketplace = marketplace_from_url(&url);

    Ok(ResolvedProduct::new(asin, marketplace))
}

/// Whether the URL points at a known Amazon host (full or shortened).
pub fn is_amazon_url(url: &str) -> bool {
    let host = host_of(url);
    AMAZON_HOSTS.iter().any(|domain| host.contains(domain))
}

/// Whether the URL uses one of the shortened-link hosts.
pub fn is_short_url(url: &str) -> bool {
    SHORT_LINK_HOSTS.iter().any(|domain| url.contains(domain))
}

/// Pull the ASIN out of a product URL, testing each known path shape in
/// order.
pub fn extract_asin(url: &str) -> Option<String> {
    ASIN_PATTERNS
        .iter()
        .find_map(|pattern| pattern.captures(url))
        .map(|captures| captures[1].to_string())
}

/// Infer the marketplace from the URL host.
///
/// Country domains are checked before the `amzn.eu` catch-all; anything
/// unrecognized defaults to the US storefront. The order matters because
/// several host strings share fragments.
pub fn marketplace_from_url(url: &str) -> Marketplace {
    let host = host_of(url);

    if host.contains("amazon.fr") || host.contains("amzn.fr") {
        Marketplace::Fr
    } else if host.contains("amazon.de") || host.contains("amzn.de") {
        Marketplace::De
    } else if host.contains("amazon.co.uk") || host.contains("amzn.co.uk") {
        Marketplace::Uk
    } else if host.contains("amazon.it") || host.contains("amzn.it") {
        Marketplace::It
    } else if host.contains("amazon.es") || host.contains("amzn.es") {
        Marketplace::Es
    } else if host.contains("amzn.eu") {
        Marketplace::Eu
    } else if host.contains("amazon.com.br") || host.contains("amzn.com.br") {
        Marketplace::Br
    } else if host.contains("amazon.in") || host.contains("amzn.in") {
        Marketplace::In
    } else if host.contains("amazon.ca") || host.contains("amzn.ca") {
        Marketplace::Ca
    } else {
        Marketplace::Us
    }
}

/// Lowercased host of the URL, with mobile hosts normalized to `www`.
/// Falls back to the raw string when the URL does not parse.
fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| url.to_lowercase())
        .replace("m.amazon", "www.amazon")
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    struct NoExpand;

    #[async_trait]
    impl PageFetcher for NoExpand {
        async fn fetch_page(&self, _url: &str) -> Result<String, ScrapeError> {
            Err(ScrapeError::FetchTimeout("not a real fetcher".into()))
        }

        async fn expand_url(&self, _url: &str) -> Option<String> {
            None
        }
    }

    struct ExpandTo(&'static str);

    #[async_trait]
    impl PageFetcher for ExpandTo {
        async fn fetch_page(&self, _url: &str) -> Result<String, ScrapeError> {
            Err(ScrapeError::FetchTimeout("not a real fetcher".into()))
        }

        async fn expand_url(&self, _url: &str) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    #[test]
    fn marketplace_for_every_supported_host() {
        let cases = [
            ("https://www.amazon.com/dp/B0EXAMPLE1", Marketplace::Us, "USD"),
            ("https://www.amazon.fr/dp/B0EXAMPLE1", Marketplace::Fr, "EUR"),
            ("https://www.amazon.de/dp/B0EXAMPLE1", Marketplace::De, "EUR"),
            ("https://www.amazon.co.uk/dp/B0EXAMPLE1", Marketplace::Uk, "GBP"),
            ("https://www.amazon.it/dp/B0EXAMPLE1", Marketplace::It, "EUR"),
            ("https://www.amazon.es/dp/B0EXAMPLE1", Marketplace::Es, "EUR"),
            ("https://amzn.eu/d/bvp7pE1xx", Marketplace::Eu, "EUR"),
            ("https://www.amazon.com.br/dp/B0EXAMPLE1", Marketplace::Br, "BRL"),
            ("https://www.amazon.in/dp/B0EXAMPLE1", Marketplace::In, "INR"),
            ("https://www.amazon.ca/dp/B0EXAMPLE1", Marketplace::Ca, "CAD"),
        ];

        for (url, expected, currency) in cases {
            let marketplace = marketplace_from_url(url);
            assert_eq!(marketplace, expected, "url: {url}");
            assert_eq!(marketplace.currency(), currency, "url: {url}");
        }
    }

    #[test]
    fn mobile_host_maps_like_desktop() {
        assert_eq!(
            marketplace_from_url("https://m.amazon.de/dp/B0EXAMPLE1"),
            Marketplace::De
        );
    }

    #[test]
    fn asin_from_each_path_shape() {
        let cases = [
            "https://www.amazon.com/dp/B08N5WRWNW",
            "https://www.amazon.com/product/B08N5WRWNW",
            "https://www.amazon.com/gp/product/B08N5WRWNW",
            "https://www.amazon.com/gp/aw/d/B08N5WRWNW",
            "https://www.amazon.com/aw/d/B08N5WRWNW",
            "https://www.amazon.com/d/B08N5WRWNW",
            "https://www.amazon.fr/Some-Product-Name/dp/B08N5WRWNW/ref=sr_1_1",
        ];
        for url in cases {
            assert_eq!(extract_asin(url).as_deref(), Some("B08N5WRWNW"), "url: {url}");
        }
        assert!(extract_asin("https://www.amazon.com/gp/bestsellers").is_none());
    }

    #[tokio::test]
    async fn canonicalization_is_idempotent() {
        let fetcher = NoExpand;
        let first = resolve("https://www.amazon.fr/Casque-Audio/dp/B08N5WRWNW?th=1", &fetcher)
            .await
            .unwrap();
        assert_eq!(first.canonical_url, "https://www.amazon.fr/dp/B08N5WRWNW");

        let second = resolve(&first.canonical_url, &fetcher).await.unwrap();
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn unresolvable_url_is_fatal() {
        let err = resolve("https://www.amazon.com/gp/bestsellers", &NoExpand)
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Resolution(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn short_link_expands_through_fetcher() {
        let fetcher = ExpandTo("https://www.amazon.fr/dp/B08N5WRWNW");
        let resolved = resolve("https://amzn.eu/d/bvp7pE1", &fetcher).await.unwrap();
        assert_eq!(resolved.asin, "B08N5WRWNW");
        assert_eq!(resolved.marketplace, Marketplace::Fr);
        assert_eq!(resolved.currency, "EUR");
    }

    #[tokio::test]
    async fn failed_expansion_keeps_original_url() {
        // The /d/{asin} pattern can still salvage an unexpanded short link
        // when its token happens to look like an ASIN.
        let resolved = resolve("https://amzn.eu/d/BVP7PE1XQZ", &NoExpand).await.unwrap();
        assert_eq!(resolved.asin, "BVP7PE1XQZ");
        assert_eq!(resolved.marketplace, Marketplace::Eu);
        assert_eq!(resolved.currency, "EUR");
    }

    #[test]
    fn eu_resolution_refines_from_page_url() {
        let resolved = ResolvedProduct::new("B08N5WRWNW".into(), Marketplace::Eu);
        let refined = resolved.refined_from_page("https://www.amazon.de/dp/B08N5WRWNW");
        assert_eq!(refined.marketplace, Marketplace::De);
        assert_eq!(refined.currency, "EUR");
        assert_eq!(refined.canonical_url, "https://www.amazon.de/dp/B08N5WRWNW");
    }

    #[test]
    fn amazon_url_detection() {
        assert!(is_amazon_url("https://www.amazon.co.uk/dp/B08N5WRWNW"));
        assert!(is_amazon_url("https://amzn.to/3xYzAbC"));
        assert!(!is_amazon_url("https://www.ebay.com/itm/1234"));
    }

    #[test]
    fn short_url_detection() {
        assert!(is_short_url("https://amzn.to/3xYzAbC"));
        assert!(is_short_url("https://amzn.eu/d/bvp7pE1"));
        assert!(is_short_url("https://a.co/d/bvp7pE1"));
        assert!(!is_short_url("https://www.amazon.com/dp/B08N5WRWNW"));
    }
}
