#![allow(dead_code)]

use actix_middleware::AccessPolicy;
use campus_service::config::{BrokerConfig, WebSocketConfig, DEFAULT_PUBLIC_PATHS};
use campus_service::db::InMemoryUserStore;
use campus_service::state::AppState;
use crypto_core::JwtKeys;
use db_pool::env_utils::split_list;
use std::sync::Arc;
use std::time::Duration;

pub const SECRET: &[u8] = b"integration-test-secret-at-least-32-bytes";
pub const TEST_BCRYPT_COST: u32 = 4;

pub fn keys() -> Arc<JwtKeys> {
    Arc::new(JwtKeys::from_secret(SECRET).unwrap())
}

pub fn enforcing_policy() -> Arc<AccessPolicy> {
    Arc::new(AccessPolicy::new(true, split_list(DEFAULT_PUBLIC_PATHS)))
}

pub fn state(store: Arc<InMemoryUserStore>, keys: Arc<JwtKeys>) -> AppState {
    AppState::new(
        store,
        keys,
        BrokerConfig::default(),
        WebSocketConfig {
            poll_timeout: Duration::from_millis(100),
            ..WebSocketConfig::default()
        },
        TEST_BCRYPT_COST,
    )
}

/// Build the service the way `main` wires it. `$state` is evaluated first so
/// callers can pass `keys.clone()` into it alongside `keys`.
macro_rules! init_app {
    ($state:expr, $keys:expr, $policy:expr) => {{
        let state = $state;
        let keys = $keys;
        let policy = $policy;
        actix_web::test::init_service(
            actix_web::App::new()
                .wrap(actix_middleware::AccessPolicyMiddleware::new(policy, keys))
                .wrap(actix_middleware::Logging)
                .app_data(actix_web::web::Data::new(state))
                .configure(|cfg| campus_service::routes::configure(cfg, "/ws")),
        )
        .await
    }};
}
