//! Data models for marketplaces, product snapshots and alert rules

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Regional Amazon storefront.
///
/// Each marketplace pins a currency and a base URL used to build canonical
/// product links. `EU` covers `amzn.eu` short links whose final storefront is
/// not yet known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Marketplace {
    #[serde(rename = "US")]
    Us,
    #[serde(rename = "FR")]
    Fr,
    #[serde(rename = "DE")]
    De,
    #[serde(rename = "UK")]
    Uk,
    #[serde(rename = "IT")]
    It,
    #[serde(rename = "ES")]
    Es,
    #[serde(rename = "EU")]
    Eu,
    #[serde(rename = "BR")]
    Br,
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "CA")]
    Ca,
}

impl Marketplace {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Us => "US",
            Self::Fr => "FR",
            Self::De => "DE",
            Self::Uk => "UK",
            Self::It => "IT",
            Self::Es => "ES",
            Self::Eu => "EU",
            Self::Br => "BR",
            Self::In => "IN",
            Self::Ca => "CA",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "US" => Some(Self::Us),
            "FR" => Some(Self::Fr),
            "DE" => Some(Self::De),
            "UK" => Some(Self::Uk),
            "IT" => Some(Self::It),
            "ES" => Some(Self::Es),
            "EU" => Some(Self::Eu),
            "BR" => Some(Self::Br),
            "IN" => Some(Self::In),
            "CA" => Some(Self::Ca),
            _ => None,
        }
    }

    /// ISO currency code paired with this storefront.
    pub fn currency(self) -> &'static str {
        match self {
            Self::Fr | Self::De | Self::It | Self::Es | Self::Eu => "EUR",
            Self::Uk => "GBP",
            Self::Ca => "CAD",
            Self::Br => "BRL",
            Self::In => "INR",
            Self::Us => "USD",
        }
    }

    /// Base URL used when rebuilding a canonical `/dp/{asin}` link.
    ///
    /// `EU` has no storefront domain of its own, so it falls back to the
    /// default storefront until the real marketplace is known.
    pub fn base_url(self) -> &'static str {
        match self {
            Self::Fr => "https://www.amazon.fr",
            Self::De => "https://www.amazon.de",
            Self::Uk => "https://www.amazon.co.uk",
            Self::It => "https://www.amazon.it",
            Self::Es => "https://www.amazon.es",
            Self::Br => "https://www.amazon.com.br",
            Self::In => "https://www.amazon.in",
            Self::Ca => "https://www.amazon.ca",
            Self::Us | Self::Eu => "https://www.amazon.com",
        }
    }

    /// Storefronts that print prices with a comma decimal separator.
    pub fn uses_comma_decimal(self) -> bool {
        matches!(self, Self::Fr | Self::De | Self::It | Self::Es | Self::Eu)
    }
}

/// One point-in-time capture of a product page.
///
/// Only `asin` and `title` are required for the snapshot to be usable; every
/// other field is best-effort and may be absent depending on what the page
/// rendered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub asin: String,
    pub url: String,
    pub marketplace: Marketplace,
    pub title: Option<String>,
    pub current_price: Option<f64>,
    pub original_price: Option<f64>,
    pub currency: String,
    pub discount_percentage: Option<u32>,
    pub availability: String,
    pub in_stock: bool,
    pub stock_quantity: Option<u32>,
    pub image_url: Option<String>,
    pub images: Vec<String>,
    pub description: Option<String>,
    pub features: Vec<String>,
    pub rating: Option<f64>,
    pub rating_count: Option<u64>,
    pub review_count: Option<u64>,
    pub categories: Vec<String>,
    pub brand: Option<String>,
    pub specifications: HashMap<String, String>,
    pub prime_eligible: bool,
    pub seller: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// Condition a user wants to be alerted about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertType {
    #[serde(rename = "PRICE_DROP")]
    PriceDrop,
    #[serde(rename = "PRICE_INCREASE")]
    PriceIncrease,
    #[serde(rename = "STOCK_AVAILABLE")]
    StockAvailable,
}

impl AlertType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PriceDrop => "PRICE_DROP",
            Self::PriceIncrease => "PRICE_INCREASE",
            Self::StockAvailable => "STOCK_AVAILABLE",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "PRICE_DROP" => Some(Self::PriceDrop),
            "PRICE_INCREASE" => Some(Self::PriceIncrease),
            "STOCK_AVAILABLE" => Some(Self::StockAvailable),
            _ => None,
        }
    }
}

/// A stored alert rule for one product and one user.
///
/// `triggered_at` is set exactly once; a rule that has fired is excluded from
/// every later evaluation pass. The per-channel sent flags are each
/// independently idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: i64,
    pub user_id: i64,
    pub product_id: i64,
    pub alert_type: AlertType,
    pub target_price: f64,
    pub is_active: bool,
    pub email_sent: bool,
    pub push_sent: bool,
    pub whatsapp_sent: bool,
    pub triggered_at: Option<DateTime<Utc>>,
}

/// Delivery channel for a triggered alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationChannel {
    Email,
    Push,
    WhatsApp,
}

impl NotificationChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Push => "push",
            Self::WhatsApp => "whatsapp",
        }
    }
}

/// Notification preferences and channel addresses for one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPrefs {
    pub user_id: i64,
    pub email: String,
    pub email_notifications: bool,
    pub push_notifications: bool,
    pub whatsapp_notifications: bool,
    pub fcm_token: Option<String>,
    pub whatsapp_number: Option<String>,
}

/// A product row as listed for the periodic refresh pass.
#[derive(Debug, Clone)]
pub struct TrackedProduct {
    pub id: i64,
    pub user_id: i64,
    pub asin: String,
    pub marketplace: Marketplace,
    pub amazon_url: String,
}
