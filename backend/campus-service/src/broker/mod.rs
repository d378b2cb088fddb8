//! In-process simple broker
//!
//! Tracks connected sessions, their subscriptions, and which sessions belong
//! to which principal. Deliveries are STOMP `MESSAGE` frames pushed into each
//! session's outbound channel; the transport drains that channel.
//!
//! A `/user/queue/x` subscription is stored under the session-unique
//! destination `/queue/x-user{session_id}`, so a message for
//! `/user/{name}/queue/x` reaches every session whose principal is `name`.

use crate::config::BrokerConfig;
use crate::stomp::Frame;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

pub type SessionId = String;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("destination not handled by the broker: {0}")]
    UnsupportedDestination(String),

    #[error("user destinations need an authenticated principal: {0}")]
    AnonymousUserDestination(String),

    #[error("duplicate subscription id: {0}")]
    DuplicateSubscription(String),
}

#[derive(Clone)]
struct Subscription {
    session_id: SessionId,
    subscription_id: String,
    /// Destination as the client subscribed to it, echoed in MESSAGE frames
    client_destination: String,
    sender: UnboundedSender<Frame>,
}

struct SessionEntry {
    user: Option<String>,
    sender: UnboundedSender<Frame>,
    /// subscription id -> broker destination
    subscriptions: HashMap<String, String>,
}

#[derive(Default)]
struct BrokerInner {
    sessions: DashMap<SessionId, SessionEntry>,
    destinations: DashMap<String, Vec<Subscription>>,
    users: DashMap<String, HashSet<SessionId>>,
    message_seq: AtomicU64,
}

#[derive(Clone)]
pub struct Broker {
    config: Arc<BrokerConfig>,
    inner: Arc<BrokerInner>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config: Arc::new(config),
            inner: Arc::new(BrokerInner::default()),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Register a connected session. `user` is `None` for anonymous
    /// principals, which are not reachable through user destinations.
    pub fn register_session(
        &self,
        session_id: &str,
        user: Option<&str>,
        sender: UnboundedSender<Frame>,
    ) {
        if let Some(user) = user {
            self.inner
                .users
                .entry(user.to_string())
                .or_default()
                .insert(session_id.to_string());
        }

        self.inner.sessions.insert(
            session_id.to_string(),
            SessionEntry {
                user: user.map(str::to_string),
                sender,
                subscriptions: HashMap::new(),
            },
        );

        tracing::debug!(
            session_id = %session_id,
            sessions = self.inner.sessions.len(),
            "broker session registered"
        );
    }

    /// Drop a session with all of its subscriptions
    pub fn unregister_session(&self, session_id: &str) {
        let Some((_, entry)) = self.inner.sessions.remove(session_id) else {
            return;
        };

        for destination in entry.subscriptions.values() {
            self.remove_subscription(destination, session_id, None);
        }

        if let Some(user) = entry.user {
            let now_empty = match self.inner.users.get_mut(&user) {
                Some(mut sessions) => {
                    sessions.remove(session_id);
                    sessions.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.inner.users.remove_if(&user, |_, s| s.is_empty());
            }
        }

        tracing::debug!(
            session_id = %session_id,
            sessions = self.inner.sessions.len(),
            "broker session removed"
        );
    }

    pub fn subscribe(
        &self,
        session_id: &str,
        subscription_id: &str,
        destination: &str,
    ) -> Result<(), BrokerError> {
        let (user, sender, duplicate) = {
            let entry = self
                .inner
                .sessions
                .get(session_id)
                .ok_or_else(|| BrokerError::UnknownSession(session_id.to_string()))?;
            (
                entry.user.clone(),
                entry.sender.clone(),
                entry.subscriptions.contains_key(subscription_id),
            )
        };
        if duplicate {
            return Err(BrokerError::DuplicateSubscription(
                subscription_id.to_string(),
            ));
        }

        let broker_destination = match self.user_suffix(destination) {
            Some(rest) => {
                if user.is_none() {
                    return Err(BrokerError::AnonymousUserDestination(
                        destination.to_string(),
                    ));
                }
                session_destination(rest, session_id)
            }
            None => destination.to_string(),
        };
        if !self.is_broker_destination(&broker_destination) {
            return Err(BrokerError::UnsupportedDestination(destination.to_string()));
        }

        self.inner
            .destinations
            .entry(broker_destination.clone())
            .or_default()
            .push(Subscription {
                session_id: session_id.to_string(),
                subscription_id: subscription_id.to_string(),
                client_destination: destination.to_string(),
                sender,
            });

        if let Some(mut entry) = self.inner.sessions.get_mut(session_id) {
            entry
                .subscriptions
                .insert(subscription_id.to_string(), broker_destination);
        }

        tracing::debug!(
            session_id = %session_id,
            subscription_id = %subscription_id,
            destination = %destination,
            "subscribed"
        );
        Ok(())
    }

    /// Returns whether the subscription existed
    pub fn unsubscribe(&self, session_id: &str, subscription_id: &str) -> bool {
        let destination = self
            .inner
            .sessions
            .get_mut(session_id)
            .and_then(|mut entry| entry.subscriptions.remove(subscription_id));

        match destination {
            Some(destination) => {
                self.remove_subscription(&destination, session_id, Some(subscription_id));
                true
            }
            None => false,
        }
    }

    /// Deliver `body` to every subscriber of a broker destination. Returns the
    /// number of frames handed to live sessions.
    pub fn publish(&self, destination: &str, body: &str) -> usize {
        let targets: Vec<Subscription> = match self.inner.destinations.get(destination) {
            Some(subs) => subs.clone(),
            None => return 0,
        };

        let mut delivered = 0;
        for sub in targets {
            let frame = Frame::message(
                &sub.client_destination,
                &sub.subscription_id,
                &self.next_message_id(),
                body,
            );
            if sub.sender.send(frame).is_ok() {
                delivered += 1;
            } else {
                tracing::debug!(
                    session_id = %sub.session_id,
                    destination = %destination,
                    "dropping delivery to closed session"
                );
            }
        }
        delivered
    }

    /// Deliver to `destination` (e.g. `/queue/private`) in every session of
    /// principal `user`
    pub fn send_to_user(&self, user: &str, destination: &str, body: &str) -> usize {
        let sessions: Vec<SessionId> = match self.inner.users.get(user) {
            Some(sessions) => sessions.iter().cloned().collect(),
            None => {
                tracing::debug!(user = %user, destination = %destination, "no sessions for user");
                return 0;
            }
        };

        sessions
            .iter()
            .map(|sid| self.publish(&session_destination(destination, sid), body))
            .sum()
    }

    pub fn is_application_destination(&self, destination: &str) -> bool {
        has_prefix(destination, &self.config.application_prefix)
    }

    pub fn is_user_destination(&self, destination: &str) -> bool {
        self.user_suffix(destination).is_some()
    }

    /// Names of principals with at least one open session, sorted
    pub fn connected_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self
            .inner
            .users
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect();
        users.sort();
        users
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn subscriber_count(&self, destination: &str) -> usize {
        self.inner
            .destinations
            .get(destination)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    /// Under one of the fan-out prefixes (`/topic`, `/queue`)
    pub fn is_broker_destination(&self, destination: &str) -> bool {
        self.config
            .broker_prefixes
            .iter()
            .any(|prefix| has_prefix(destination, prefix))
    }

    /// `/queue/x` for `/user/queue/x` and `/bob/queue/x` for `/user/bob/queue/x`
    fn user_suffix<'a>(&self, destination: &'a str) -> Option<&'a str> {
        destination
            .strip_prefix(self.config.user_prefix.as_str())
            .filter(|rest| rest.starts_with('/'))
    }

    fn remove_subscription(
        &self,
        destination: &str,
        session_id: &str,
        subscription_id: Option<&str>,
    ) {
        let now_empty = match self.inner.destinations.get_mut(destination) {
            Some(mut subs) => {
                subs.retain(|s| {
                    s.session_id != session_id
                        || subscription_id.is_some_and(|id| s.subscription_id != id)
                });
                subs.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.inner
                .destinations
                .remove_if(destination, |_, subs| subs.is_empty());
        }
    }

    fn next_message_id(&self) -> String {
        let seq = self.inner.message_seq.fetch_add(1, Ordering::Relaxed);
        format!("msg-{seq}")
    }
}

fn has_prefix(destination: &str, prefix: &str) -> bool {
    destination
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

fn session_destination(destination: &str, session_id: &str) -> String {
    format!("{destination}-user{session_id}")
}
