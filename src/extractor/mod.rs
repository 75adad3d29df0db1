//! Turns rendered product markup into a typed snapshot
//!
//! Every field is extracted through an ordered list of independent
//! strategies; the first one that yields a non-empty value wins and an
//! all-miss leaves the field absent. A snapshot only becomes an error at
//! validation time, when the required fields are missing.

pub mod price;

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;

use crate::error::ScrapeError;
use crate::models::{Marketplace, ProductSnapshot};
use crate::resolver::ResolvedProduct;

lazy_static! {
    static ref DISCOUNT_RE: Regex = Regex::new(r"-(\d+)%").unwrap();
    static ref STOCK_QTY_RE: Regex =
        Regex::new(r"(?i)only\s+(\d+)\s+left\s+in\s+stock").unwrap();
    static ref RATING_RE: Regex = Regex::new(r"(?i)([\d.,]+)\s+out\s+of\s+5").unwrap();
    static ref REVIEW_COUNT_RE: Regex = Regex::new(r"(?i)(\d+)\s+customer\s+reviews?").unwrap();
    static ref COLOR_IMAGES_RE: Regex =
        Regex::new(r#""colorImages":\s*\{[^}]*"initial":\s*(\[[^\]]+\])"#).unwrap();
    static ref BRAND_PREFIX_RE: Regex = Regex::new(r"(?i)^(Brand:\s*|Marque\s*:\s*)").unwrap();
}

/// Phrases that mark a product as unavailable. Checked before the in-stock
/// phrases; when both classes appear on a page, out-of-stock wins.
const OUT_OF_STOCK_INDICATORS: [&str; 4] = [
    "currently unavailable",
    "out of stock",
    "temporairement en rupture",
    "derzeit nicht verfügbar",
];

const IN_STOCK_INDICATORS: [&str; 5] = [
    "in stock",
    "en stock",
    "auf lager",
    "disponibile",
    "add to cart",
];

/// Extract every field the page offers into one immutable snapshot.
pub fn extract_snapshot(html: &str, resolved: &ResolvedProduct) -> ProductSnapshot {
    let document = Html::parse_document(html);
    let page_text = document.root_element().text().collect::<String>();

    let images = extract_images(&document);
    let image_url = extract_image_url(&document).or_else(|| images.first().cloned());

    ProductSnapshot {
        asin: resolved.asin.clone(),
        url: resolved.canonical_url.clone(),
        marketplace: resolved.marketplace,
        title: extract_title(&document),
        current_price: extract_price(&document, resolved.marketplace),
        original_price: extract_original_price(&document, resolved.marketplace),
        currency: resolved.currency.to_string(),
        discount_percentage: extract_discount_percentage(&page_text),
        availability: extract_availability(&document),
        in_stock: is_in_stock(&page_text),
        stock_quantity: extract_stock_quantity(&page_text),
        image_url,
        images,
        description: extract_description(&document),
        features: extract_features(&document),
        rating: extract_rating(&document),
        rating_count: extract_rating_count(&document),
        review_count: extract_review_count(&page_text),
        categories: extract_categories(&document),
        brand: extract_brand(&document),
        specifications: extract_specifications(&document),
        prime_eligible: is_prime_eligible(&document),
        seller: extract_seller(&document),
        fetched_at: Utc::now(),
    }
}

/// Accept the snapshot iff its required fields are present.
pub fn validate(snapshot: &ProductSnapshot) -> Result<(), ScrapeError> {
    if snapshot.asin.is_empty() {
        return Err(ScrapeError::InvalidSnapshot("missing asin".into()));
    }
    if snapshot.title.as_deref().is_none_or(str::is_empty) {
        return Err(ScrapeError::InvalidSnapshot("missing title".into()));
    }
    Ok(())
}

/// `<link rel="canonical">` of the fetched page, used to refine an `EU`
/// marketplace guess once real markup is available.
pub fn canonical_link(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(r#"link[rel="canonical"]"#).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|link| link.value().attr("href"))
        .map(str::to_string)
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// First non-empty text among the given selectors, in order.
fn select_first_text(document: &Html, selectors: &[&str]) -> Option<String> {
    for css in selectors {
        let Ok(selector) = Selector::parse(css) else {
            continue;
        };
        for element in document.select(&selector) {
            let text = element_text(element);
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

fn extract_title(document: &Html) -> Option<String> {
    if let Some(title) = select_first_text(document, &["#productTitle", "#title", ".product-title"])
    {
        return Some(title);
    }

    // Fallback to the document title, dropping Amazon's suffix.
    let title = select_first_text(document, &["title"])?;
    if title.contains("Amazon") {
        return title.split(':').next().map(|part| part.trim().to_string());
    }
    Some(title)
}

fn extract_price(document: &Html, marketplace: Marketplace) -> Option<f64> {
    const PRICE_SELECTORS: [&str; 4] = [
        "span.a-price-whole",
        "#priceblock_ourprice",
        "span.a-offscreen",
        "span.a-price",
    ];

    for css in PRICE_SELECTORS {
        let Ok(selector) = Selector::parse(css) else {
            continue;
        };
        for element in document.select(&selector) {
            let text = element_text(element);
            if let Some(value) = price::parse_price(&text, marketplace)
                && value > 0.0
            {
                return Some(value);
            }
        }
    }
    None
}

/// Struck-through list price, shown next to a discount.
fn extract_original_price(document: &Html, marketplace: Marketplace) -> Option<f64> {
    for css in [".a-text-price", ".a-text-strike"] {
        let Ok(selector) = Selector::parse(css) else {
            continue;
        };
        for element in document.select(&selector) {
            let text = element_text(element);
            if let Some(value) = price::parse_price(&text, marketplace)
                && value > 0.0
            {
                return Some(value);
            }
        }
    }
    None
}

fn extract_discount_percentage(page_text: &str) -> Option<u32> {
    DISCOUNT_RE
        .captures(page_text)
        .and_then(|captures| captures[1].parse().ok())
}

fn extract_availability(document: &Html) -> String {
    select_first_text(document, &["#availability", ".a-color-success"])
        .unwrap_or_else(|| "Unknown".to_string())
}

/// Out-of-stock phrases take precedence; a page matching neither class of
/// phrase counts as not in stock.
fn is_in_stock(page_text: &str) -> bool {
    let text = page_text.to_lowercase();

    if OUT_OF_STOCK_INDICATORS
        .iter()
        .any(|phrase| text.contains(phrase))
    {
        return false;
    }

    IN_STOCK_INDICATORS.iter().any(|phrase| text.contains(phrase))
}

fn extract_stock_quantity(page_text: &str) -> Option<u32> {
    STOCK_QTY_RE
        .captures(page_text)
        .and_then(|captures| captures[1].parse().ok())
}

fn extract_image_url(document: &Html) -> Option<String> {
    if let Ok(selector) = Selector::parse("img#landingImage")
        && let Some(img) = document.select(&selector).next()
        && let Some(src) = img.value().attr("src")
        && !src.contains("data:image")
    {
        return Some(src.to_string());
    }

    let selector = Selector::parse(r#"img[data-a-image-name="landingImage"]"#).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|img| img.value().attr("src"))
        .map(str::to_string)
}

/// Image gallery: the embedded `colorImages` script payload first (preferring
/// hi-res entries), then a markup fallback. Deduplicated as a set.
fn extract_images(document: &Html) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut images = Vec::new();
    let mut push = |src: &str| {
        if !src.is_empty() && !src.contains("data:image") && seen.insert(src.to_string()) {
            images.push(src.to_string());
        }
    };

    if let Ok(selector) = Selector::parse("script") {
        for script in document.select(&selector) {
            let body = script.text().collect::<String>();
            if !body.contains("colorImages") {
                continue;
            }
            if let Some(captures) = COLOR_IMAGES_RE.captures(&body)
                && let Ok(Value::Array(entries)) = serde_json::from_str::<Value>(&captures[1])
            {
                for entry in entries {
                    let src = entry
                        .get("hiRes")
                        .or_else(|| entry.get("large"))
                        .and_then(Value::as_str);
                    if let Some(src) = src {
                        push(src);
                    }
                }
            }
        }
    }

    if let Ok(selector) = Selector::parse(r#"img[class*="product-image"]"#) {
        for img in document.select(&selector) {
            let src = img
                .value()
                .attr("src")
                .or_else(|| img.value().attr("data-src"));
            if let Some(src) = src {
                push(src);
            }
        }
    }

    images
}

fn extract_description(document: &Html) -> Option<String> {
    select_first_text(document, &["#feature-bullets", "#productDescription"])
}

fn extract_features(document: &Html) -> Vec<String> {
    let Ok(selector) = Selector::parse("#feature-bullets li") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .map(element_text)
        .filter(|feature| !feature.is_empty())
        .collect()
}

fn extract_rating(document: &Html) -> Option<f64> {
    for css in ["#acrPopover", ".a-icon-alt"] {
        let Ok(selector) = Selector::parse(css) else {
            continue;
        };
        for element in document.select(&selector) {
            let text = element_text(element);
            if let Some(captures) = RATING_RE.captures(&text)
                && let Ok(rating) = captures[1].replace(',', ".").parse::<f64>()
            {
                return Some(rating);
            }
        }
    }
    None
}

fn extract_rating_count(document: &Html) -> Option<u64> {
    let selector = Selector::parse("#acrCustomerReviewText").ok()?;
    let element = document.select(&selector).next()?;
    let digits: String = element_text(element)
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

fn extract_review_count(page_text: &str) -> Option<u64> {
    REVIEW_COUNT_RE
        .captures(page_text)
        .and_then(|captures| captures[1].parse().ok())
}

fn extract_categories(document: &Html) -> Vec<String> {
    let Ok(selector) = Selector::parse("#wayfinding-breadcrumbs_feature_div a") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .map(element_text)
        .filter(|category| !category.is_empty())
        .collect()
}

fn extract_brand(document: &Html) -> Option<String> {
    let selector = Selector::parse("a#bylineInfo").ok()?;
    let element = document.select(&selector).next()?;
    let brand = BRAND_PREFIX_RE
        .replace(&element_text(element), "")
        .trim()
        .to_string();
    (!brand.is_empty()).then_some(brand)
}

fn extract_specifications(document: &Html) -> HashMap<String, String> {
    let mut specs = HashMap::new();
    let Ok(row_selector) = Selector::parse("table#productDetails_techSpec_section_1 tr") else {
        return specs;
    };
    let Ok(th) = Selector::parse("th") else {
        return specs;
    };
    let Ok(td) = Selector::parse("td") else {
        return specs;
    };

    for row in document.select(&row_selector) {
        let key = row.select(&th).next().map(element_text);
        let value = row.select(&td).next().map(element_text);
        if let (Some(key), Some(value)) = (key, value)
            && !key.is_empty()
            && !value.is_empty()
        {
            specs.insert(key, value);
        }
    }
    specs
}

fn is_prime_eligible(document: &Html) -> bool {
    Selector::parse(r#"i[class*="a-icon-prime"]"#)
        .map(|selector| document.select(&selector).next().is_some())
        .unwrap_or(false)
}

fn extract_seller(document: &Html) -> Option<String> {
    select_first_text(document, &["#merchant-info", ".seller"])
}
