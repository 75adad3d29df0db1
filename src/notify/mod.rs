//! Notification dispatch for triggered alerts
//!
//! The core only decides *whether* and *for which channel* a notification
//! should be attempted; delivery itself is a collaborator behind the
//! [`Notifier`] trait. The default implementation posts a JSON payload to a
//! per-channel gateway webhook and degrades gracefully when a gateway is not
//! configured.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{error, info, warn};

use crate::models::{AlertRule, NotificationChannel, ProductSnapshot, UserPrefs};

/// Transport seam for triggered-alert delivery.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Request delivery of one triggered alert over one channel.
    async fn dispatch(
        &self,
        rule: &AlertRule,
        snapshot: &ProductSnapshot,
        prefs: &UserPrefs,
        channel: NotificationChannel,
    ) -> Result<()>;
}

/// Posts alert payloads to per-channel gateway webhooks.
///
/// Gateway URLs come from `PW_EMAIL_WEBHOOK_URL`, `PW_PUSH_WEBHOOK_URL` and
/// `PW_WHATSAPP_WEBHOOK_URL`. A missing URL disables that channel with a
/// warning instead of failing the pipeline.
pub struct WebhookNotifier {
    client: Client,
    email_webhook: Option<String>,
    push_webhook: Option<String>,
    whatsapp_webhook: Option<String>,
}

impl WebhookNotifier {
    pub fn new() -> Self {
        let email_webhook = std::env::var("PW_EMAIL_WEBHOOK_URL").ok();
        let push_webhook = std::env::var("PW_PUSH_WEBHOOK_URL").ok();
        let whatsapp_webhook = std::env::var("PW_WHATSAPP_WEBHOOK_URL").ok();

        if email_webhook.is_none() && push_webhook.is_none() && whatsapp_webhook.is_none() {
            warn!("no notification gateway configured - alerts will trigger without delivery");
        }

        Self {
            client: Client::new(),
            email_webhook,
            push_webhook,
            whatsapp_webhook,
        }
    }

    fn webhook_for(&self, channel: NotificationChannel) -> Option<&str> {
        match channel {
            NotificationChannel::Email => self.email_webhook.as_deref(),
            NotificationChannel::Push => self.push_webhook.as_deref(),
            NotificationChannel::WhatsApp => self.whatsapp_webhook.as_deref(),
        }
    }

    fn address_for(prefs: &UserPrefs, channel: NotificationChannel) -> Option<String> {
        match channel {
            NotificationChannel::Email => Some(prefs.email.clone()),
            NotificationChannel::Push => prefs.fcm_token.clone(),
            NotificationChannel::WhatsApp => prefs.whatsapp_number.clone(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn dispatch(
        &self,
        rule: &AlertRule,
        snapshot: &ProductSnapshot,
        prefs: &UserPrefs,
        channel: NotificationChannel,
    ) -> Result<()> {
        let Some(webhook_url) = self.webhook_for(channel) else {
            info!(
                "no {} gateway configured, skipping alert {}",
                channel.as_str(),
                rule.id
            );
            return Ok(());
        };

        let payload = json!({
            "channel": channel.as_str(),
            "to": Self::address_for(prefs, channel),
            "alert_id": rule.id,
            "alert_type": rule.alert_type.as_str(),
            "target_price": rule.target_price,
            "asin": snapshot.asin,
            "title": snapshot.title,
            "current_price": snapshot.current_price,
            "currency": snapshot.currency,
            "in_stock": snapshot.in_stock,
            "url": snapshot.url,
        });

        let response = self.client.post(webhook_url).json(&payload).send().await?;

        if response.status().is_success() {
            info!(
                "dispatched {} notification for alert {}",
                channel.as_str(),
                rule.id
            );
        } else {
            error!(
                "gateway rejected {} notification for alert {}: {}",
                channel.as_str(),
                rule.id,
                response.status()
            );
        }

        Ok(())
    }
}

impl Clone for WebhookNotifier {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            email_webhook: self.email_webhook.clone(),
            push_webhook: self.push_webhook.clone(),
            whatsapp_webhook: self.whatsapp_webhook.clone(),
        }
    }
}
