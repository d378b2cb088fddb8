pub mod chat;
pub mod credentials;
pub mod password_migration;

pub use chat::ChatService;
pub use password_migration::{MigrationReport, PasswordMigrationRunner, PASSWORD_HASH_MIGRATION};
