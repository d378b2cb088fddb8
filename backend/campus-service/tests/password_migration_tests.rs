//! Startup password migration against the in-memory store

mod common;

use campus_service::db::{InMemoryUserStore, MigrationLedger};
use campus_service::services::{PasswordMigrationRunner, PASSWORD_HASH_MIGRATION};
use crypto_core::{is_password_hash, verify_password};
use std::sync::Arc;

#[tokio::test]
async fn test_gated_migration_runs_once() {
    let store = Arc::new(InMemoryUserStore::new());
    let bob = store.insert_raw("bob@x.edu", "hunter2").await;
    let already = crypto_core::hash_password("s3cret-pass", common::TEST_BCRYPT_COST).unwrap();
    let carol = store.insert_raw("carol@x.edu", &already).await;

    let runner = PasswordMigrationRunner::new(store.clone(), common::TEST_BCRYPT_COST);

    let report = runner.run_once(store.as_ref()).await.unwrap().unwrap();
    assert_eq!((report.scanned, report.migrated, report.skipped), (2, 1, 1));
    assert!(store.is_applied(PASSWORD_HASH_MIGRATION).await.unwrap());

    let stored = store.password_of(bob).await.unwrap();
    assert_eq!(stored.len(), 60);
    assert!(is_password_hash(&stored));
    assert!(verify_password("hunter2", &stored).unwrap());
    assert_eq!(store.password_of(carol).await.unwrap(), already);

    // Ledger entry present: the hook is a no-op
    let writes = store.password_writes();
    assert_eq!(runner.run_once(store.as_ref()).await.unwrap(), None);
    assert_eq!(store.password_writes(), writes);
}

#[tokio::test]
async fn test_dry_run_leaves_ledger_untouched() {
    let store = Arc::new(InMemoryUserStore::new());
    let id = store.insert_raw("dana@x.edu", "plaintext").await;

    let report = PasswordMigrationRunner::new(store.clone(), common::TEST_BCRYPT_COST)
        .dry_run(true)
        .run_once(store.as_ref())
        .await
        .unwrap()
        .unwrap();

    assert!(report.dry_run);
    assert_eq!(report.migrated, 1);
    assert_eq!(store.password_of(id).await.unwrap(), "plaintext");
    assert!(!store.is_applied(PASSWORD_HASH_MIGRATION).await.unwrap());
}
