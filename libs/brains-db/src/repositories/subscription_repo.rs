use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::Subscription;
use crate::models::subscription::DEFAULT_AMOUNT;

#[derive(Debug, Clone)]
pub struct SubscriptionRepository {
    pool: PgPool,
}

impl SubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Subscription>> {
        sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch subscription by ID")
    }

    pub async fn get_by_user(&self, user_id: i64) -> Result<Option<Subscription>> {
        sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch subscription for user")
    }

    /// Subscriptions past their end date that are still active and opted in to
    /// notifications. Rows already deactivated by a previous sweep are excluded.
    pub async fn find_all_expired(&self, now: DateTime<Utc>) -> Result<Vec<Subscription>> {
        sqlx::query_as::<_, Subscription>(
            "SELECT * FROM subscriptions
             WHERE end_date < $1 AND is_notify = TRUE AND is_active = TRUE
             ORDER BY end_date ASC",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch expired subscriptions")
    }

    pub async fn add_one(&self, user_id: i64) -> Result<Subscription> {
        sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions (user_id, amount, is_notify, is_active)
            VALUES ($1, $2, TRUE, FALSE)
            ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(DEFAULT_AMOUNT)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create subscription")
    }

    pub async fn edit_one(&self, sub: &Subscription) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE subscriptions
            SET is_notify = $1, is_active = $2, amount = $3, end_date = $4,
                active_protocol = $5, active_server_id = $6,
                wg_key = $7, wg_public_key = $8, wg_allowed_ip = $9,
                xray_key = $10, xray_uuid = $11,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $12
            "#,
        )
        .bind(sub.is_notify)
        .bind(sub.is_active)
        .bind(sub.amount)
        .bind(sub.end_date)
        .bind(&sub.active_protocol)
        .bind(sub.active_server_id)
        .bind(&sub.wg_key)
        .bind(&sub.wg_public_key)
        .bind(&sub.wg_allowed_ip)
        .bind(&sub.xray_key)
        .bind(sub.xray_uuid)
        .bind(sub.id)
        .execute(&self.pool)
        .await
        .context("Failed to update subscription")?;
        Ok(())
    }

    /// Flips `is_active` off for every id in one transaction.
    pub async fn deactivate_many(&self, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.context("Failed to open transaction")?;
        let mut affected = 0;

        for id in ids {
            affected += sqlx::query(
                "UPDATE subscriptions SET is_active = FALSE, updated_at = CURRENT_TIMESTAMP WHERE id = $1",
            )
            .bind(id)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to deactivate subscription {}", id))?
            .rows_affected();
        }

        tx.commit().await.context("Failed to commit deactivation batch")?;
        Ok(affected)
    }

    /// WireGuard addresses held by active WireGuard subscriptions on a server.
    /// Swept rows keep their stale address but no longer hold it.
    pub async fn find_all_allocated_ips(&self, server_id: i64) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT wg_allowed_ip FROM subscriptions
             WHERE active_server_id = $1 AND active_protocol = 'wireguard'
               AND is_active = TRUE AND wg_allowed_ip IS NOT NULL",
        )
        .bind(server_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch allocated WireGuard addresses")
    }

    pub async fn count_active(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions WHERE is_active = TRUE")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count active subscriptions")
    }
}
