//! Rewrites plaintext user credentials into bcrypt hashes
//!
//! Every row is classified on its own: values that already look like bcrypt
//! hashes are left alone, anything else is hashed and written back by id.
//! Rows are processed one at a time without a surrounding transaction, so an
//! interrupted run leaves each row either fully migrated or untouched, and a
//! rerun picks up where it stopped.

use crate::db::{MigrationLedger, UserStore};
use crate::error::{AppError, AppResult};
use crate::services::credentials;
use serde::Serialize;
use std::sync::Arc;

/// Ledger name recorded after a successful startup run
pub const PASSWORD_HASH_MIGRATION: &str = "password_hash_v1";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub scanned: usize,
    pub migrated: usize,
    pub skipped: usize,
    pub dry_run: bool,
}

pub struct PasswordMigrationRunner {
    store: Arc<dyn UserStore>,
    cost: u32,
    dry_run: bool,
}

impl PasswordMigrationRunner {
    pub fn new(store: Arc<dyn UserStore>, cost: u32) -> Self {
        Self {
            store,
            cost,
            dry_run: false,
        }
    }

    /// Classify and count without writing anything
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Migrate every plaintext credential. The first failure aborts the
    /// remaining rows and is returned.
    pub async fn run(&self) -> AppResult<MigrationReport> {
        let credentials = self.store.list_credentials().await?;
        let mut report = MigrationReport {
            dry_run: self.dry_run,
            ..MigrationReport::default()
        };

        tracing::info!(
            users = credentials.len(),
            dry_run = self.dry_run,
            "password migration started"
        );

        for credential in credentials {
            report.scanned += 1;

            if crypto_core::is_password_hash(&credential.password) {
                report.skipped += 1;
                tracing::debug!(
                    user_id = credential.id,
                    email = %credential.email,
                    "credential already hashed"
                );
                continue;
            }

            if self.dry_run {
                report.migrated += 1;
                tracing::info!(
                    user_id = credential.id,
                    email = %credential.email,
                    "[DRY RUN] would hash plaintext credential"
                );
                continue;
            }

            let hashed = credentials::hash_password(&credential.password, self.cost)
                .await
                .map_err(|e| {
                    AppError::Migration(format!("user {}: {e}", credential.id))
                })?;
            self.store
                .update_password(credential.id, &hashed)
                .await
                .map_err(|e| {
                    tracing::error!(
                        user_id = credential.id,
                        email = %credential.email,
                        error = %e,
                        "password migration aborted"
                    );
                    AppError::Migration(format!("user {}: {e}", credential.id))
                })?;

            report.migrated += 1;
            tracing::info!(
                user_id = credential.id,
                email = %credential.email,
                "migrated password for user"
            );
        }

        tracing::info!(
            scanned = report.scanned,
            migrated = report.migrated,
            skipped = report.skipped,
            dry_run = report.dry_run,
            "password migration finished"
        );
        Ok(report)
    }

    /// Run unless `ledger` already records [`PASSWORD_HASH_MIGRATION`], then
    /// record it. `None` when skipped.
    pub async fn run_once(&self, ledger: &dyn MigrationLedger) -> AppResult<Option<MigrationReport>> {
        if ledger.is_applied(PASSWORD_HASH_MIGRATION).await? {
            tracing::info!(
                migration = PASSWORD_HASH_MIGRATION,
                "password migration already applied, skipping"
            );
            return Ok(None);
        }

        let report = self.run().await?;
        if !self.dry_run {
            ledger.mark_applied(PASSWORD_HASH_MIGRATION).await?;
        }
        Ok(Some(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryUserStore;
    use crypto_core::password::{BCRYPT_HASH_LEN, BCRYPT_PREFIXES};

    const TEST_COST: u32 = 4;

    fn runner(store: &Arc<InMemoryUserStore>) -> PasswordMigrationRunner {
        PasswordMigrationRunner::new(store.clone(), TEST_COST)
    }

    #[tokio::test]
    async fn test_plaintext_is_hashed() {
        let store = Arc::new(InMemoryUserStore::new());
        let id = store.insert_raw("bob@x.edu", "hunter2").await;
        assert_eq!(id, 1);

        let report = runner(&store).run().await.unwrap();
        assert_eq!(
            report,
            MigrationReport {
                scanned: 1,
                migrated: 1,
                skipped: 0,
                dry_run: false,
            }
        );

        let stored = store.password_of(id).await.unwrap();
        assert_eq!(stored.len(), BCRYPT_HASH_LEN);
        assert!(BCRYPT_PREFIXES.iter().any(|p| stored.starts_with(p)));
        assert!(crypto_core::verify_password("hunter2", &stored).unwrap());
    }

    #[tokio::test]
    async fn test_existing_hash_preserved() {
        let store = Arc::new(InMemoryUserStore::new());
        let hash = crypto_core::hash_password("already", TEST_COST).unwrap();
        let id = store.insert_raw("carol@x.edu", &hash).await;
        store.insert_raw("dan@x.edu", "plain-one").await;

        let report = runner(&store).run().await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.migrated, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(store.password_of(id).await.unwrap(), hash);
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let store = Arc::new(InMemoryUserStore::new());
        store.insert_raw("erin@x.edu", "secret1").await;
        store.insert_raw("frank@x.edu", "secret2").await;

        runner(&store).run().await.unwrap();
        let writes = store.password_writes();
        assert_eq!(writes, 2);

        let report = runner(&store).run().await.unwrap();
        assert_eq!(report.migrated, 0);
        assert_eq!(report.skipped, 2);
        assert_eq!(store.password_writes(), writes);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let store = Arc::new(InMemoryUserStore::new());
        let id = store.insert_raw("gina@x.edu", "plaintext").await;

        let report = runner(&store).dry_run(true).run().await.unwrap();
        assert!(report.dry_run);
        assert_eq!(report.migrated, 1);
        assert_eq!(store.password_of(id).await.unwrap(), "plaintext");
        assert_eq!(store.password_writes(), 0);
    }

    #[tokio::test]
    async fn test_first_failure_aborts_batch() {
        let store = Arc::new(InMemoryUserStore::new());
        let first = store.insert_raw("a@x.edu", "one").await;
        let broken = store.insert_raw("b@x.edu", "two").await;
        let last = store.insert_raw("c@x.edu", "three").await;
        store.fail_updates_for(broken).await;

        let err = runner(&store).run().await.unwrap_err();
        assert!(matches!(err, AppError::Migration(_)));
        assert!(crypto_core::is_password_hash(
            &store.password_of(first).await.unwrap()
        ));
        assert_eq!(store.password_of(broken).await.unwrap(), "two");
        assert_eq!(store.password_of(last).await.unwrap(), "three");
    }

    #[tokio::test]
    async fn test_run_once_gated_by_ledger() {
        let store = Arc::new(InMemoryUserStore::new());
        store.insert_raw("hank@x.edu", "pw").await;

        let first = runner(&store).run_once(store.as_ref()).await.unwrap();
        assert_eq!(first.map(|r| r.migrated), Some(1));
        assert!(store.is_applied(PASSWORD_HASH_MIGRATION).await.unwrap());

        store.insert_raw("ivy@x.edu", "late-plaintext").await;
        let second = runner(&store).run_once(store.as_ref()).await.unwrap();
        assert_eq!(second, None);
    }

    #[tokio::test]
    async fn test_failed_run_not_recorded() {
        let store = Arc::new(InMemoryUserStore::new());
        let id = store.insert_raw("jo@x.edu", "pw").await;
        store.fail_updates_for(id).await;

        assert!(runner(&store).run_once(store.as_ref()).await.is_err());
        assert!(!store.is_applied(PASSWORD_HASH_MIGRATION).await.unwrap());
    }
}
