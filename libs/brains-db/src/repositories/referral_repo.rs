use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::{Referral, ReferralSummary};

#[derive(Debug, Clone)]
pub struct ReferralRepository {
    pool: PgPool,
}

impl ReferralRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn add_one(&self, referrer_id: i64, referral_id: i64) -> Result<Option<Referral>> {
        sqlx::query_as::<_, Referral>(
            r#"
            INSERT INTO referrals (referrer_id, referral_id)
            VALUES ($1, $2)
            ON CONFLICT (referral_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(referrer_id)
        .bind(referral_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to record referral")
    }

    pub async fn find_all(&self, referrer_id: i64) -> Result<Vec<ReferralSummary>> {
        sqlx::query_as::<_, ReferralSummary>(
            r#"
            SELECT r.referral_id, u.first_name, COALESCE(s.is_active, FALSE) AS is_active
            FROM referrals r
            JOIN users u ON u.id = r.referral_id
            LEFT JOIN subscriptions s ON s.user_id = r.referral_id
            WHERE r.referrer_id = $1
            ORDER BY r.created_at ASC
            "#,
        )
        .bind(referrer_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch referrals")
    }

    pub async fn count_all_active(&self, referrer_id: i64) -> Result<i64> {
        sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM referrals r
            JOIN subscriptions s ON s.user_id = r.referral_id
            WHERE r.referrer_id = $1 AND s.is_active = TRUE
            "#,
        )
        .bind(referrer_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count active referrals")
    }
}
