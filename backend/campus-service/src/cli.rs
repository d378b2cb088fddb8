//! Command-line interface handling
//!
//! Separates one-shot operator commands from normal server startup.

use crate::db::{self, PgUserStore};
use crate::error::AppError;
use crate::services::PasswordMigrationRunner;
use db_pool::env_utils::parse_env_with_default;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    /// Hash every plaintext credential once and exit
    MigratePasswords { dry_run: bool },
}

/// Parse the arguments after the binary name. `Ok(None)` means start the
/// server.
pub fn parse_command(args: &[String]) -> Result<Option<CliCommand>, AppError> {
    let Some((command, rest)) = args.split_first() else {
        return Ok(None);
    };

    match command.as_str() {
        "migrate-passwords" => {
            let mut dry_run = false;
            for arg in rest {
                match arg.as_str() {
                    "--dry-run" => dry_run = true,
                    "--execute" => dry_run = false,
                    other => {
                        return Err(AppError::Config(format!(
                            "unknown option for migrate-passwords: {other}"
                        )))
                    }
                }
            }
            Ok(Some(CliCommand::MigratePasswords { dry_run }))
        }
        _ => Ok(None),
    }
}

/// Handle CLI commands.
///
/// Returns true if a command was processed (program should exit).
pub async fn handle_cli_commands() -> Result<bool, AppError> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match parse_command(&args)? {
        Some(CliCommand::MigratePasswords { dry_run }) => {
            migrate_passwords(dry_run).await?;
            Ok(true)
        }
        None => Ok(false),
    }
}

async fn migrate_passwords(dry_run: bool) -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| AppError::Config("DATABASE_URL missing".into()))?;
    let cost = parse_env_with_default("BCRYPT_COST", crypto_core::password::DEFAULT_COST);

    let pool = db::init_pool(&database_url)
        .await
        .map_err(|e| AppError::StartServer(format!("db: {e}")))?;
    let store = Arc::new(PgUserStore::new(pool));

    let report = PasswordMigrationRunner::new(store, cost)
        .dry_run(dry_run)
        .run()
        .await?;

    println!("\n=== Password Migration Summary ===");
    println!("Users scanned:  {}", report.scanned);
    println!("Hashed:         {}", report.migrated);
    println!("Already hashed: {}", report.skipped);
    if dry_run {
        println!("\nThis was a dry run. Re-run without --dry-run to apply changes.");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_no_command_starts_server() {
        assert_eq!(parse_command(&[]).unwrap(), None);
        assert_eq!(parse_command(&args(&["serve"])).unwrap(), None);
    }

    #[test]
    fn test_migrate_passwords() {
        assert_eq!(
            parse_command(&args(&["migrate-passwords"])).unwrap(),
            Some(CliCommand::MigratePasswords { dry_run: false })
        );
        assert_eq!(
            parse_command(&args(&["migrate-passwords", "--dry-run"])).unwrap(),
            Some(CliCommand::MigratePasswords { dry_run: true })
        );
        assert!(parse_command(&args(&["migrate-passwords", "--force"])).is_err());
    }
}
