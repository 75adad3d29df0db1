//! Alert rule evaluation and channel dispatch decisions

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use crate::models::{AlertRule, AlertType, NotificationChannel, ProductSnapshot, UserPrefs};
use crate::notify::Notifier;
use crate::store::Store;

/// Whether a rule's condition holds against a fresh snapshot.
///
/// A snapshot without a price makes the price rules non-evaluable for this
/// round; they simply do not fire. Stock alerts fire once the product is
/// actually in stock.
pub fn should_trigger(rule: &AlertRule, snapshot: &ProductSnapshot) -> bool {
    if !rule.is_active || rule.triggered_at.is_some() {
        return false;
    }

    match rule.alert_type {
        AlertType::PriceDrop => snapshot
            .current_price
            .is_some_and(|price| price <= rule.target_price),
        AlertType::PriceIncrease => snapshot
            .current_price
            .is_some_and(|price| price >= rule.target_price),
        AlertType::StockAvailable => snapshot.in_stock,
    }
}

/// Channels worth attempting for a freshly triggered rule: enabled by the
/// user, addressed, and not already sent.
pub fn channels_to_attempt(rule: &AlertRule, prefs: &UserPrefs) -> Vec<NotificationChannel> {
    let mut channels = Vec::new();

    if prefs.email_notifications && !rule.email_sent {
        channels.push(NotificationChannel::Email);
    }
    if prefs.push_notifications && !rule.push_sent && prefs.fcm_token.is_some() {
        channels.push(NotificationChannel::Push);
    }
    if prefs.whatsapp_notifications && !rule.whatsapp_sent && prefs.whatsapp_number.is_some() {
        channels.push(NotificationChannel::WhatsApp);
    }

    channels
}

/// Applies rule evaluation to the stored alerts of one product.
pub struct AlertEngine<'a> {
    store: &'a Store,
    notifier: &'a dyn Notifier,
}

impl<'a> AlertEngine<'a> {
    pub fn new(store: &'a Store, notifier: &'a dyn Notifier) -> Self {
        Self { store, notifier }
    }

    /// Evaluate every active, untriggered rule of a product against the
    /// snapshot and return the rules that fired.
    ///
    /// The trigger is a compare-and-set on `triggered_at`; when two
    /// evaluation passes race, only the winner dispatches notifications.
    pub async fn evaluate_product(
        &self,
        product_id: i64,
        snapshot: &ProductSnapshot,
        send_notifications: bool,
    ) -> Result<Vec<AlertRule>> {
        let rules = self.store.list_active_untriggered_alerts(product_id).await?;
        let mut triggered = Vec::new();

        for mut rule in rules {
            if !should_trigger(&rule, snapshot) {
                continue;
            }

            let now = Utc::now();
            if !self.store.mark_alert_triggered(rule.id, now).await? {
                // Another evaluation pass got here first.
                continue;
            }
            rule.triggered_at = Some(now);

            info!(
                "alert {} ({}) fired for product {}",
                rule.id,
                rule.alert_type.as_str(),
                product_id
            );

            if send_notifications {
                self.dispatch_channels(&mut rule, snapshot).await?;
            }

            triggered.push(rule);
        }

        Ok(triggered)
    }

    async fn dispatch_channels(
        &self,
        rule: &mut AlertRule,
        snapshot: &ProductSnapshot,
    ) -> Result<()> {
        let Some(prefs) = self.store.user_prefs(rule.user_id).await? else {
            warn!("alert {} has no owning user, skipping dispatch", rule.id);
            return Ok(());
        };

        for channel in channels_to_attempt(rule, &prefs) {
            match self.notifier.dispatch(rule, snapshot, &prefs, channel).await {
                Ok(()) => {
                    self.store.mark_channel_sent(rule.id, channel).await?;
                    match channel {
                        NotificationChannel::Email => rule.email_sent = true,
                        NotificationChannel::Push => rule.push_sent = true,
                        NotificationChannel::WhatsApp => rule.whatsapp_sent = true,
                    }
                }
                Err(error) => {
                    warn!(
                        "dispatch over {} failed for alert {}: {}",
                        channel.as_str(),
                        rule.id,
                        error
                    );
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::models::Marketplace;

    struct RecordingNotifier {
        sent: Mutex<Vec<(i64, NotificationChannel)>>,
    }

    impl RecordingNotifier {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn dispatch(
            &self,
            rule: &AlertRule,
            _snapshot: &ProductSnapshot,
            _prefs: &UserPrefs,
            channel: NotificationChannel,
        ) -> Result<()> {
            self.sent.lock().unwrap().push((rule.id, channel));
            Ok(())
        }
    }

    fn snapshot(price: Option<f64>, in_stock: bool) -> ProductSnapshot {
        ProductSnapshot {
            asin: "B08N5WRWNW".into(),
            url: "https://www.amazon.com/dp/B08N5WRWNW".into(),
            marketplace: Marketplace::Us,
            title: Some("Echo Dot".into()),
            current_price: price,
            original_price: None,
            currency: "USD".into(),
            discount_percentage: None,
            availability: "In Stock".into(),
            in_stock,
            stock_quantity: None,
            image_url: None,
            images: Vec::new(),
            description: None,
            features: Vec::new(),
            rating: None,
            rating_count: None,
            review_count: None,
            categories: Vec::new(),
            brand: None,
            specifications: HashMap::new(),
            prime_eligible: false,
            seller: None,
            fetched_at: Utc::now(),
        }
    }

    fn rule(alert_type: AlertType, target_price: f64) -> AlertRule {
        AlertRule {
            id: 1,
            user_id: 1,
            product_id: 1,
            alert_type,
            target_price,
            is_active: true,
            email_sent: false,
            push_sent: false,
            whatsapp_sent: false,
            triggered_at: None,
        }
    }

    fn prefs() -> UserPrefs {
        UserPrefs {
            user_id: 1,
            email: "user@example.com".into(),
            email_notifications: true,
            push_notifications: true,
            whatsapp_notifications: true,
            fcm_token: Some("token".into()),
            whatsapp_number: Some("+33600000000".into()),
        }
    }

    #[test]
    fn price_drop_fires_at_or_below_target() {
        let drop = rule(AlertType::PriceDrop, 25.0);
        assert!(should_trigger(&drop, &snapshot(Some(20.0), true)));
        assert!(should_trigger(&drop, &snapshot(Some(25.0), true)));
        assert!(!should_trigger(&drop, &snapshot(Some(30.0), true)));
    }

    #[test]
    fn price_increase_fires_at_or_above_target() {
        let increase = rule(AlertType::PriceIncrease, 25.0);
        assert!(!should_trigger(&increase, &snapshot(Some(20.0), true)));
        assert!(should_trigger(&increase, &snapshot(Some(25.0), true)));
        assert!(should_trigger(&increase, &snapshot(Some(30.0), true)));
    }

    #[test]
    fn missing_price_never_fires_price_rules() {
        assert!(!should_trigger(
            &rule(AlertType::PriceDrop, 25.0),
            &snapshot(None, true)
        ));
        assert!(!should_trigger(
            &rule(AlertType::PriceIncrease, 25.0),
            &snapshot(None, true)
        ));
    }

    #[test]
    fn stock_alert_follows_availability() {
        let stock = rule(AlertType::StockAvailable, 0.0);
        assert!(should_trigger(&stock, &snapshot(None, true)));
        assert!(!should_trigger(&stock, &snapshot(None, false)));
    }

    #[test]
    fn triggered_or_inactive_rules_never_fire() {
        let mut fired = rule(AlertType::PriceDrop, 25.0);
        fired.triggered_at = Some(Utc::now());
        assert!(!should_trigger(&fired, &snapshot(Some(20.0), true)));

        let mut inactive = rule(AlertType::PriceDrop, 25.0);
        inactive.is_active = false;
        assert!(!should_trigger(&inactive, &snapshot(Some(20.0), true)));
    }

    #[test]
    fn channels_require_preference_address_and_fresh_flag() {
        let base = rule(AlertType::PriceDrop, 25.0);
        assert_eq!(
            channels_to_attempt(&base, &prefs()),
            vec![
                NotificationChannel::Email,
                NotificationChannel::Push,
                NotificationChannel::WhatsApp
            ]
        );

        let mut no_token = prefs();
        no_token.fcm_token = None;
        assert_eq!(
            channels_to_attempt(&base, &no_token),
            vec![NotificationChannel::Email, NotificationChannel::WhatsApp]
        );

        let mut already_mailed = base.clone();
        already_mailed.email_sent = true;
        assert_eq!(
            channels_to_attempt(&already_mailed, &prefs()),
            vec![NotificationChannel::Push, NotificationChannel::WhatsApp]
        );

        let mut opted_out = prefs();
        opted_out.email_notifications = false;
        opted_out.push_notifications = false;
        opted_out.whatsapp_notifications = false;
        assert!(channels_to_attempt(&base, &opted_out).is_empty());
    }

    #[tokio::test]
    async fn engine_triggers_once_and_dispatches_enabled_channels() {
        let store = Store::in_memory().await.unwrap();
        let user_id = store.create_user(&prefs()).await.unwrap();
        let snapshot = snapshot(Some(20.0), true);
        let product_id = store.upsert_product(user_id, &snapshot).await.unwrap();
        store
            .create_alert(user_id, product_id, AlertType::PriceDrop, 25.0)
            .await
            .unwrap();

        let notifier = RecordingNotifier::new();
        let engine = AlertEngine::new(&store, &notifier);

        let triggered = engine
            .evaluate_product(product_id, &snapshot, true)
            .await
            .unwrap();
        assert_eq!(triggered.len(), 1);
        assert!(triggered[0].triggered_at.is_some());
        assert!(triggered[0].email_sent);
        assert_eq!(notifier.sent.lock().unwrap().len(), 3);

        // Second pass: the rule already fired, so nothing triggers or sends
        // even though the price predicate still holds.
        let again = engine
            .evaluate_product(product_id, &snapshot, true)
            .await
            .unwrap();
        assert!(again.is_empty());
        assert_eq!(notifier.sent.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn engine_without_dispatch_only_sets_trigger_time() {
        let store = Store::in_memory().await.unwrap();
        let user_id = store.create_user(&prefs()).await.unwrap();
        let snapshot = snapshot(Some(20.0), true);
        let product_id = store.upsert_product(user_id, &snapshot).await.unwrap();
        let alert_id = store
            .create_alert(user_id, product_id, AlertType::PriceDrop, 25.0)
            .await
            .unwrap();

        let notifier = RecordingNotifier::new();
        let engine = AlertEngine::new(&store, &notifier);

        let triggered = engine
            .evaluate_product(product_id, &snapshot, false)
            .await
            .unwrap();
        assert_eq!(triggered.len(), 1);
        assert_eq!(triggered[0].id, alert_id);
        assert!(notifier.sent.lock().unwrap().is_empty());
        assert!(!triggered[0].email_sent);
    }

    #[tokio::test]
    async fn rules_above_target_stay_untriggered() {
        let store = Store::in_memory().await.unwrap();
        let user_id = store.create_user(&prefs()).await.unwrap();
        let snapshot = snapshot(Some(30.0), true);
        let product_id = store.upsert_product(user_id, &snapshot).await.unwrap();
        store
            .create_alert(user_id, product_id, AlertType::PriceDrop, 25.0)
            .await
            .unwrap();

        let notifier = RecordingNotifier::new();
        let engine = AlertEngine::new(&store, &notifier);

        let triggered = engine
            .evaluate_product(product_id, &snapshot, true)
            .await
            .unwrap();
        assert!(triggered.is_empty());

        // Still eligible for the next evaluation round.
        let rules = store.list_active_untriggered_alerts(product_id).await.unwrap();
        assert_eq!(rules.len(), 1);
    }
}
