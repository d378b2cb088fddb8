use actix_cors::Cors;
use actix_middleware::{AccessPolicyMiddleware, Logging};
use actix_web::{web, App, HttpServer};
use campus_service::{
    cli, config,
    db::{self, PgUserStore},
    error::AppError,
    logging, routes,
    services::PasswordMigrationRunner,
    state::AppState,
};
use std::sync::Arc;

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    logging::init_tracing();

    if cli::handle_cli_commands().await? {
        return Ok(());
    }

    let cfg = config::Config::from_env()?;
    let keys = Arc::new(cfg.jwt_keys()?);
    tracing::info!(algorithm = ?keys.algorithm(), "JWT keys loaded");

    let pool = db::init_pool(&cfg.database_url)
        .await
        .map_err(|e| AppError::StartServer(format!("db: {e}")))?;
    let store = Arc::new(PgUserStore::new(pool));

    if cfg.password_migration_on_startup {
        let runner = PasswordMigrationRunner::new(store.clone(), cfg.bcrypt_cost);
        if let Some(report) = runner.run_once(store.as_ref()).await? {
            tracing::info!(
                scanned = report.scanned,
                migrated = report.migrated,
                skipped = report.skipped,
                "startup password migration complete"
            );
        }
    }

    if !cfg.access_policy.enforce {
        tracing::warn!("SECURITY_ENFORCE_AUTH is disabled; every endpoint is public");
    }

    let state = AppState::new(
        store,
        keys.clone(),
        cfg.broker.clone(),
        cfg.websocket.clone(),
        cfg.bcrypt_cost,
    );
    let _reaper = state.polling.spawn_reaper();

    let policy = Arc::new(cfg.access_policy.clone());
    let origins = cfg.cors_allowed_origins.clone();
    let endpoint = cfg.broker.endpoint.clone();

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, socket_endpoint = %endpoint, "starting campus-service");

    HttpServer::new(move || {
        App::new()
            .wrap(AccessPolicyMiddleware::new(policy.clone(), keys.clone()))
            .wrap(Logging)
            .wrap(build_cors(&origins))
            .app_data(web::Data::new(state.clone()))
            .configure(|cfg| routes::configure(cfg, &endpoint))
    })
    .bind(&bind_addr)
    .map_err(|e| AppError::StartServer(format!("bind {bind_addr}: {e}")))?
    .run()
    .await
    .map_err(|e| AppError::StartServer(format!("run server: {e}")))
}

fn build_cors(origins: &[String]) -> Cors {
    let cors = Cors::default()
        .allow_any_method()
        .allow_any_header()
        .max_age(3600);

    if origins.iter().any(|o| o == "*") {
        cors.allow_any_origin()
    } else {
        origins
            .iter()
            .fold(cors, |cors, origin| cors.allowed_origin(origin))
    }
}
