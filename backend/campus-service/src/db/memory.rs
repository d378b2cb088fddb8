//! In-process `UserStore` for tests and local runs without PostgreSQL

use super::users::{MigrationLedger, UserStore};
use crate::error::{AppError, AppResult};
use crate::models::{User, UserCredential, UserRole};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryUserStore {
    users: RwLock<BTreeMap<i64, User>>,
    ledger: RwLock<HashSet<String>>,
    failing_ids: RwLock<HashSet<i64>>,
    writes: AtomicUsize,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row with the credential stored as given, returning its id
    pub async fn insert_raw(&self, email: &str, password: &str) -> i64 {
        let mut users = self.users.write().await;
        let id = users.keys().next_back().map_or(1, |last| last + 1);
        users.insert(
            id,
            User {
                id,
                email: email.to_string(),
                password: password.to_string(),
                role: UserRole::Student.as_str().to_string(),
                created_at: Utc::now(),
            },
        );
        id
    }

    pub async fn password_of(&self, id: i64) -> Option<String> {
        self.users.read().await.get(&id).map(|u| u.password.clone())
    }

    /// Make every later `update_password` for `id` fail
    pub async fn fail_updates_for(&self, id: i64) {
        self.failing_ids.write().await.insert(id);
    }

    /// Number of successful credential writes so far
    pub fn password_writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn create_user(&self, email: &str, password: &str, role: UserRole) -> AppResult<User> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.email.eq_ignore_ascii_case(email)) {
            return Err(AppError::Conflict("Email already registered".into()));
        }

        let id = users.keys().next_back().map_or(1, |last| last + 1);
        let user = User {
            id,
            email: email.to_string(),
            password: password.to_string(),
            role: role.as_str().to_string(),
            created_at: Utc::now(),
        };
        users.insert(id, user.clone());
        Ok(user)
    }

    async fn list_credentials(&self) -> AppResult<Vec<UserCredential>> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .map(|u| UserCredential {
                id: u.id,
                email: u.email.clone(),
                password: u.password.clone(),
            })
            .collect())
    }

    async fn update_password(&self, id: i64, password: &str) -> AppResult<()> {
        if self.failing_ids.read().await.contains(&id) {
            return Err(AppError::Database(format!("write rejected for user {id}")));
        }

        let mut users = self.users.write().await;
        let user = users.get_mut(&id).ok_or(AppError::NotFound)?;
        user.password = password.to_string();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl MigrationLedger for InMemoryUserStore {
    async fn is_applied(&self, name: &str) -> AppResult<bool> {
        Ok(self.ledger.read().await.contains(name))
    }

    async fn mark_applied(&self, name: &str) -> AppResult<()> {
        self.ledger.write().await.insert(name.to_string());
        Ok(())
    }
}
