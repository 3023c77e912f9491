use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::User;

#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user by ID")
    }

    pub async fn get_all(&self) -> Result<Vec<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch all users")
    }

    /// Inserts the user unless it already exists. Returns `true` when a new row
    /// was created.
    pub async fn add_one(
        &self,
        id: i64,
        first_name: &str,
        last_name: &str,
        username: &str,
        language_code: &str,
    ) -> Result<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO users (id, first_name, last_name, username, language_code)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(first_name)
        .bind(last_name)
        .bind(username)
        .bind(language_code)
        .execute(&self.pool)
        .await
        .context("Failed to create user")?
        .rows_affected();

        Ok(inserted > 0)
    }

    pub async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count users")
    }
}
