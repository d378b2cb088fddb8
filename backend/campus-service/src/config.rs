use crate::error::AppError;
use actix_middleware::AccessPolicy;
use crypto_core::JwtKeys;
use db_pool::env_utils::{
    parse_env_bool, parse_env_list, parse_env_required, parse_env_with_default, split_list,
};
use dotenvy::dotenv;
use std::env;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_PUBLIC_PATHS: &str = "/api/auth,/ws,/api/chat,/health,/static";

/// Destination layout of the message broker.
///
/// Fixed at startup and handed to the broker constructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// HTTP path of the socket endpoint
    pub endpoint: String,
    /// Prefixes fanned out by the in-process broker
    pub broker_prefixes: Vec<String>,
    /// Prefix of client-originated application messages
    pub application_prefix: String,
    /// Prefix of principal-addressed destinations
    pub user_prefix: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            endpoint: "/ws".to_string(),
            broker_prefixes: vec!["/topic".to_string(), "/queue".to_string()],
            application_prefix: "/app".to_string(),
            user_prefix: "/user".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub heartbeat_interval: Duration,
    /// Socket connections silent for longer than this are dropped
    pub client_timeout: Duration,
    /// Longest a polling receive request waits for frames
    pub poll_timeout: Duration,
    /// Polling sessions not touched for this long are reaped
    pub poll_idle_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            client_timeout: Duration::from_secs(30),
            poll_timeout: Duration::from_secs(25),
            poll_idle_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Clone)]
pub enum JwtKeySource {
    Secret(String),
    Rsa {
        private_key_pem: Option<String>,
        public_key_pem: String,
    },
}

impl fmt::Debug for JwtKeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JwtKeySource::Secret(_) => f.write_str("Secret([REDACTED])"),
            JwtKeySource::Rsa {
                private_key_pem, ..
            } => f
                .debug_struct("Rsa")
                .field("has_private_key", &private_key_pem.is_some())
                .finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub source: JwtKeySource,
    pub access_ttl_secs: i64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub jwt: JwtConfig,
    pub bcrypt_cost: u32,
    /// Run the ledger-gated password migration during startup
    pub password_migration_on_startup: bool,
    pub websocket: WebSocketConfig,
    pub broker: BrokerConfig,
    pub cors_allowed_origins: Vec<String>,
    pub access_policy: AccessPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let database_url: String =
            parse_env_required("DATABASE_URL").map_err(AppError::Config)?;
        let port = parse_env_with_default("PORT", 8080u16);

        let source = match env::var("JWT_PUBLIC_KEY_PEM") {
            Ok(public_key_pem) => JwtKeySource::Rsa {
                private_key_pem: env::var("JWT_PRIVATE_KEY_PEM").ok(),
                public_key_pem,
            },
            Err(_) => JwtKeySource::Secret(env::var("JWT_SECRET").map_err(|_| {
                AppError::Config("JWT_SECRET or JWT_PUBLIC_KEY_PEM must be set".into())
            })?),
        };
        let jwt = JwtConfig {
            source,
            access_ttl_secs: parse_env_with_default("JWT_ACCESS_TTL_SECS", 86_400i64),
        };

        let bcrypt_cost = parse_env_with_default("BCRYPT_COST", crypto_core::password::DEFAULT_COST);
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(AppError::Config(format!(
                "BCRYPT_COST must be between 4 and 31, got {bcrypt_cost}"
            )));
        }

        let defaults = WebSocketConfig::default();
        let websocket = WebSocketConfig {
            heartbeat_interval: secs_from_env("WS_HEARTBEAT_SECS", defaults.heartbeat_interval),
            client_timeout: secs_from_env("WS_CLIENT_TIMEOUT_SECS", defaults.client_timeout),
            poll_timeout: secs_from_env("WS_POLL_TIMEOUT_SECS", defaults.poll_timeout),
            poll_idle_timeout: secs_from_env("WS_POLL_IDLE_SECS", defaults.poll_idle_timeout),
        };
        for (key, value) in [
            ("WS_HEARTBEAT_SECS", websocket.heartbeat_interval),
            ("WS_CLIENT_TIMEOUT_SECS", websocket.client_timeout),
        ] {
            if value.is_zero() {
                return Err(AppError::Config(format!("{key} must be at least 1")));
            }
        }

        let cors_allowed_origins =
            parse_env_list("CORS_ALLOWED_ORIGINS").unwrap_or_else(|| vec!["*".to_string()]);

        let access_policy = AccessPolicy::new(
            parse_env_bool("SECURITY_ENFORCE_AUTH", true),
            parse_env_list("SECURITY_PUBLIC_PATHS")
                .unwrap_or_else(|| split_list(DEFAULT_PUBLIC_PATHS)),
        );

        Ok(Self {
            database_url,
            port,
            jwt,
            bcrypt_cost,
            password_migration_on_startup: parse_env_bool("PASSWORD_MIGRATION_ON_STARTUP", false),
            websocket,
            broker: BrokerConfig::default(),
            cors_allowed_origins,
            access_policy,
        })
    }

    pub fn jwt_keys(&self) -> Result<JwtKeys, AppError> {
        let keys = match &self.jwt.source {
            JwtKeySource::Secret(secret) => JwtKeys::from_secret(secret.as_bytes()),
            JwtKeySource::Rsa {
                private_key_pem,
                public_key_pem,
            } => JwtKeys::from_rsa_pem(private_key_pem.as_deref(), public_key_pem),
        }
        .map_err(|e| AppError::Config(format!("JWT keys: {e}")))?;

        Ok(keys.with_access_ttl_secs(self.jwt.access_ttl_secs))
    }
}

fn secs_from_env(key: &str, default: Duration) -> Duration {
    Duration::from_secs(parse_env_with_default(key, default.as_secs()))
}
