//! SQLite-backed persistence collaborator
//!
//! The pipeline hands accepted snapshots to this module and reads alert rules
//! back out of it. Snapshot-to-row mapping happens here and nowhere else.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, SqlitePool, migrate::MigrateDatabase, sqlite::SqliteRow};
use tracing::info;

use crate::models::{
    AlertRule, AlertType, Marketplace, NotificationChannel, ProductSnapshot, TrackedProduct,
    UserPrefs,
};

pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn new(database_url: &str) -> Result<Self> {
        if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
            info!("creating database");
            Sqlite::create_database(database_url).await?;
        }

        let pool = SqlitePool::connect(database_url).await?;

        info!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    // An in-memory database is private to its connection, so the test pool
    // must never grow past one.
    #[cfg(test)]
    pub(crate) async fn in_memory() -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Insert or refresh the tracked product for this user, keyed by
    /// `(user_id, asin, marketplace)`. Returns the product row id.
    pub async fn upsert_product(&self, user_id: i64, snapshot: &ProductSnapshot) -> Result<i64> {
        sqlx::query(
            r"
            INSERT INTO products (
                user_id, asin, marketplace, amazon_url, title,
                current_price, original_price, currency, discount_percentage,
                availability, in_stock, stock_quantity, image_url, images,
                description, features, rating, rating_count, review_count,
                categories, brand, specifications, prime_eligible, seller,
                last_price_check
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, asin, marketplace) DO UPDATE SET
                amazon_url = excluded.amazon_url,
                title = excluded.title,
                current_price = excluded.current_price,
                original_price = excluded.original_price,
                currency = excluded.currency,
                discount_percentage = excluded.discount_percentage,
                availability = excluded.availability,
                in_stock = excluded.in_stock,
                stock_quantity = excluded.stock_quantity,
                image_url = excluded.image_url,
                images = excluded.images,
                description = excluded.description,
                features = excluded.features,
                rating = excluded.rating,
                rating_count = excluded.rating_count,
                review_count = excluded.review_count,
                categories = excluded.categories,
                brand = excluded.brand,
                specifications = excluded.specifications,
                prime_eligible = excluded.prime_eligible,
                seller = excluded.seller,
                last_price_check = excluded.last_price_check
            ",
        )
        .bind(user_id)
        .bind(&snapshot.asin)
        .bind(snapshot.marketplace.as_str())
        .bind(&snapshot.url)
        .bind(snapshot.title.clone().unwrap_or_default())
        .bind(snapshot.current_price)
        .bind(snapshot.original_price)
        .bind(&snapshot.currency)
        .bind(snapshot.discount_percentage.map(i64::from))
        .bind(&snapshot.availability)
        .bind(snapshot.in_stock)
        .bind(snapshot.stock_quantity.map(i64::from))
        .bind(&snapshot.image_url)
        .bind(serde_json::to_string(&snapshot.images)?)
        .bind(&snapshot.description)
        .bind(serde_json::to_string(&snapshot.features)?)
        .bind(snapshot.rating)
        .bind(snapshot.rating_count.map(|count| count as i64))
        .bind(snapshot.review_count.map(|count| count as i64))
        .bind(serde_json::to_string(&snapshot.categories)?)
        .bind(&snapshot.brand)
        .bind(serde_json::to_string(&snapshot.specifications)?)
        .bind(snapshot.prime_eligible)
        .bind(&snapshot.seller)
        .bind(snapshot.fetched_at)
        .execute(&self.pool)
        .await?;

        let id = sqlx::query_scalar(
            "SELECT id FROM products WHERE user_id = ? AND asin = ? AND marketplace = ?",
        )
        .bind(user_id)
        .bind(&snapshot.asin)
        .bind(snapshot.marketplace.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Most recently recorded price for a product, if any.
    pub async fn last_price(&self, product_id: i64) -> Result<Option<f64>> {
        let price = sqlx::query_scalar(
            r"
            SELECT price FROM price_history
            WHERE product_id = ?
            ORDER BY recorded_at DESC, id DESC
            LIMIT 1
            ",
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(price)
    }

    /// Append-only, time-ordered price history.
    pub async fn append_price_history(
        &self,
        product_id: i64,
        price: f64,
        recorded_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("INSERT INTO price_history (product_id, price, recorded_at) VALUES (?, ?, ?)")
            .bind(product_id)
            .bind(price)
            .bind(recorded_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Active products due for a refresh pass.
    pub async fn list_tracked_products(&self) -> Result<Vec<TrackedProduct>> {
        let rows = sqlx::query(
            r"
            SELECT id, user_id, asin, marketplace, amazon_url
            FROM products
            WHERE is_active = 1
            ORDER BY id
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let marketplace: String = row.get("marketplace");
                TrackedProduct {
                    id: row.get("id"),
                    user_id: row.get("user_id"),
                    asin: row.get("asin"),
                    marketplace: Marketplace::from_code(&marketplace).unwrap_or(Marketplace::Us),
                    amazon_url: row.get("amazon_url"),
                }
            })
            .collect())
    }

    /// Rules eligible for evaluation: active, never triggered.
    pub async fn list_active_untriggered_alerts(&self, product_id: i64) -> Result<Vec<AlertRule>> {
        let rows = sqlx::query(
            r"
            SELECT id, user_id, product_id, alert_type, target_price,
                   is_active, email_sent, push_sent, whatsapp_sent, triggered_at
            FROM alerts
            WHERE product_id = ? AND is_active = 1 AND triggered_at IS NULL
            ORDER BY id
            ",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(alert_from_row).collect())
    }

    /// Set `triggered_at` iff it is still unset. Returns whether this call
    /// won the flip; losers must not dispatch.
    pub async fn mark_alert_triggered(
        &self,
        alert_id: i64,
        triggered_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result =
            sqlx::query("UPDATE alerts SET triggered_at = ? WHERE id = ? AND triggered_at IS NULL")
                .bind(triggered_at)
                .bind(alert_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Record that one channel's notification was requested for this alert.
    pub async fn mark_channel_sent(
        &self,
        alert_id: i64,
        channel: NotificationChannel,
    ) -> Result<()> {
        let column = match channel {
            NotificationChannel::Email => "email_sent",
            NotificationChannel::Push => "push_sent",
            NotificationChannel::WhatsApp => "whatsapp_sent",
        };

        sqlx::query(&format!("UPDATE alerts SET {column} = 1 WHERE id = ?"))
            .bind(alert_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn user_prefs(&self, user_id: i64) -> Result<Option<UserPrefs>> {
        let row = sqlx::query(
            r"
            SELECT id, email, email_notifications, push_notifications,
                   whatsapp_notifications, fcm_token, whatsapp_number
            FROM users
            WHERE id = ?
            ",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| UserPrefs {
            user_id: row.get("id"),
            email: row.get("email"),
            email_notifications: row.get("email_notifications"),
            push_notifications: row.get("push_notifications"),
            whatsapp_notifications: row.get("whatsapp_notifications"),
            fcm_token: row.get("fcm_token"),
            whatsapp_number: row.get("whatsapp_number"),
        }))
    }

    /// Look up a user by email, registering them with default preferences on
    /// first sight.
    pub async fn ensure_user(&self, email: &str) -> Result<i64> {
        let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(id) = existing {
            return Ok(id);
        }

        self.create_user(&UserPrefs {
            user_id: 0,
            email: email.to_string(),
            email_notifications: true,
            push_notifications: false,
            whatsapp_notifications: false,
            fcm_token: None,
            whatsapp_number: None,
        })
        .await
    }

    /// Product row id for a user's tracked ASIN, if any.
    pub async fn find_product(&self, user_id: i64, asin: &str) -> Result<Option<i64>> {
        let id = sqlx::query_scalar("SELECT id FROM products WHERE user_id = ? AND asin = ?")
            .bind(user_id)
            .bind(asin)
            .fetch_optional(&self.pool)
            .await?;

        Ok(id)
    }

    /// Register a user with their notification preferences.
    pub async fn create_user(&self, prefs: &UserPrefs) -> Result<i64> {
        let result = sqlx::query(
            r"
            INSERT INTO users (email, email_notifications, push_notifications,
                               whatsapp_notifications, fcm_token, whatsapp_number)
            VALUES (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&prefs.email)
        .bind(prefs.email_notifications)
        .bind(prefs.push_notifications)
        .bind(prefs.whatsapp_notifications)
        .bind(&prefs.fcm_token)
        .bind(&prefs.whatsapp_number)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Register an alert rule for a product. Called by the account layer when
    /// a user defines an alert.
    pub async fn create_alert(
        &self,
        user_id: i64,
        product_id: i64,
        alert_type: AlertType,
        target_price: f64,
    ) -> Result<i64> {
        let result = sqlx::query(
            r"
            INSERT INTO alerts (user_id, product_id, alert_type, target_price)
            VALUES (?, ?, ?, ?)
            ",
        )
        .bind(user_id)
        .bind(product_id)
        .bind(alert_type.as_str())
        .bind(target_price)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }
}

fn alert_from_row(row: SqliteRow) -> AlertRule {
    let alert_type: String = row.get("alert_type");
    AlertRule {
        id: row.get("id"),
        user_id: row.get("user_id"),
        product_id: row.get("product_id"),
        alert_type: AlertType::from_code(&alert_type).unwrap_or(AlertType::PriceDrop),
        target_price: row.get("target_price"),
        is_active: row.get("is_active"),
        email_sent: row.get("email_sent"),
        push_sent: row.get("push_sent"),
        whatsapp_sent: row.get("whatsapp_sent"),
        triggered_at: row.get("triggered_at"),
    }
}

impl Clone for Store {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}
