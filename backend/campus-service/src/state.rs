use crate::broker::Broker;
use crate::config::{BrokerConfig, WebSocketConfig};
use crate::db::UserStore;
use crate::websocket::{ConnectionAuthenticator, PollingRegistry, SessionServices};
use crypto_core::JwtKeys;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserStore>,
    pub keys: Arc<JwtKeys>,
    /// Broker, authenticator, and chat controller shared by all sessions
    pub sessions: SessionServices,
    pub polling: PollingRegistry,
    pub websocket: WebSocketConfig,
    pub bcrypt_cost: u32,
}

impl AppState {
    pub fn new(
        users: Arc<dyn UserStore>,
        keys: Arc<JwtKeys>,
        broker: BrokerConfig,
        websocket: WebSocketConfig,
        bcrypt_cost: u32,
    ) -> Self {
        let sessions = SessionServices::new(
            Broker::new(broker),
            ConnectionAuthenticator::new(keys.clone()),
        );
        let polling = PollingRegistry::new(sessions.clone(), websocket.clone());

        Self {
            users,
            keys,
            sessions,
            polling,
            websocket,
            bcrypt_cost,
        }
    }

    pub fn broker(&self) -> &Broker {
        &self.sessions.broker
    }
}
