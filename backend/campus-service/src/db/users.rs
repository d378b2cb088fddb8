/// User persistence behind the `UserStore` seam
use crate::error::{AppError, AppResult};
use crate::models::{User, UserCredential, UserRole};
use async_trait::async_trait;
use sqlx::PgPool;

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Case-insensitive lookup
    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>>;

    /// Insert a user. Fails with `Conflict` when the email is taken.
    async fn create_user(&self, email: &str, password: &str, role: UserRole) -> AppResult<User>;

    /// Every user's `(id, email, password)`, ordered by id
    async fn list_credentials(&self) -> AppResult<Vec<UserCredential>>;

    /// Overwrite the stored credential of user `id`
    async fn update_password(&self, id: i64, password: &str) -> AppResult<()>;
}

/// Names of one-shot data tasks that have completed
#[async_trait]
pub trait MigrationLedger: Send + Sync {
    async fn is_applied(&self, name: &str) -> AppResult<bool>;
    async fn mark_applied(&self, name: &str) -> AppResult<()>;
}

#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, password, role, created_at FROM users WHERE LOWER(email) = LOWER($1)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn create_user(&self, email: &str, password: &str, role: UserRole) -> AppResult<User> {
        let result = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, password, role, created_at)
            VALUES ($1, $2, $3, CURRENT_TIMESTAMP)
            RETURNING id, email, password, role, created_at
            "#,
        )
        .bind(email)
        .bind(password)
        .bind(role.as_str())
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(user) => Ok(user),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(AppError::Conflict("Email already registered".into()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_credentials(&self) -> AppResult<Vec<UserCredential>> {
        let rows = sqlx::query_as::<_, UserCredential>(
            "SELECT id, email, password FROM users ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn update_password(&self, id: i64, password: &str) -> AppResult<()> {
        let result = sqlx::query("UPDATE users SET password = $1 WHERE id = $2")
            .bind(password)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl MigrationLedger for PgUserStore {
    async fn is_applied(&self, name: &str) -> AppResult<bool> {
        let applied = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM app_migrations WHERE name = $1)",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(applied)
    }

    async fn mark_applied(&self, name: &str) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO app_migrations (name, applied_at) VALUES ($1, CURRENT_TIMESTAMP) ON CONFLICT (name) DO NOTHING",
        )
        .bind(name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
