//! Chat controller for `/app` destinations

use crate::broker::Broker;
use crate::models::{ChatMessage, ChatPayload, MessageType};
use crate::websocket::authenticator::Principal;
use thiserror::Error;

pub const PUBLIC_TOPIC: &str = "/topic/public";
pub const PRIVATE_QUEUE: &str = "/queue/private";

pub const ADD_USER: &str = "/chat.addUser";
pub const SEND_MESSAGE: &str = "/chat.sendMessage";
pub const PRIVATE_MESSAGE: &str = "/chat.private";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("malformed message body: {0}")]
    MalformedBody(#[from] serde_json::Error),

    #[error("private message needs a recipient")]
    MissingRecipient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatOutcome {
    Joined,
    Delivered(usize),
    Ignored,
}

#[derive(Clone)]
pub struct ChatService {
    broker: Broker,
}

impl ChatService {
    pub fn new(broker: Broker) -> Self {
        Self { broker }
    }

    /// Dispatch a client `SEND` to an application destination such as
    /// `/app/chat.sendMessage`
    pub fn handle(
        &self,
        principal: &Principal,
        destination: &str,
        body: &str,
    ) -> Result<ChatOutcome, ChatError> {
        let route = destination
            .strip_prefix(self.broker.config().application_prefix.as_str())
            .unwrap_or(destination);

        match route {
            ADD_USER => {
                parse_payload(body)?;
                self.add_user(principal);
                Ok(ChatOutcome::Joined)
            }
            SEND_MESSAGE => {
                let payload = parse_payload(body)?;
                if payload.content.trim().is_empty() {
                    tracing::debug!(sender = %principal.name, "ignoring empty chat message");
                    return Ok(ChatOutcome::Ignored);
                }
                Ok(ChatOutcome::Delivered(
                    self.send_message(principal, &payload.content),
                ))
            }
            PRIVATE_MESSAGE => {
                let payload = parse_payload(body)?;
                let recipient = payload
                    .recipient
                    .as_deref()
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .ok_or(ChatError::MissingRecipient)?;
                Ok(ChatOutcome::Delivered(self.send_private(
                    principal,
                    recipient,
                    &payload.content,
                )))
            }
            _ => {
                tracing::warn!(
                    destination = %destination,
                    sender = %principal.name,
                    "no handler for application destination"
                );
                Ok(ChatOutcome::Ignored)
            }
        }
    }

    pub fn add_user(&self, principal: &Principal) -> usize {
        tracing::info!(user = %principal.name, "user joined chat");
        self.broadcast(&ChatMessage::join(&principal.name))
    }

    pub fn send_message(&self, principal: &Principal, content: &str) -> usize {
        self.broadcast(&ChatMessage::new(
            MessageType::Chat,
            &principal.name,
            content,
        ))
    }

    /// Deliver to the recipient's sessions and echo to the sender's own
    pub fn send_private(&self, principal: &Principal, recipient: &str, content: &str) -> usize {
        let message = ChatMessage::private(&principal.name, recipient, content);
        let Some(body) = encode(&message) else {
            return 0;
        };

        let delivered = self.broker.send_to_user(recipient, PRIVATE_QUEUE, &body);
        if recipient != principal.name {
            self.broker
                .send_to_user(&principal.name, PRIVATE_QUEUE, &body);
        }
        tracing::debug!(
            sender = %principal.name,
            recipient = %recipient,
            delivered,
            "private message routed"
        );
        delivered
    }

    /// Client `SEND` straight to a `/topic` or `/queue` destination. The body
    /// is re-issued as a `CHAT` message stamped with the principal.
    pub fn relay(
        &self,
        principal: &Principal,
        destination: &str,
        body: &str,
    ) -> Result<ChatOutcome, ChatError> {
        let payload = parse_payload(body)?;
        if payload.content.trim().is_empty() {
            return Ok(ChatOutcome::Ignored);
        }
        let message = ChatMessage::new(MessageType::Chat, &principal.name, &payload.content);
        let delivered = encode(&message).map_or(0, |body| self.broker.publish(destination, &body));
        Ok(ChatOutcome::Delivered(delivered))
    }

    pub fn user_left(&self, principal: &Principal) -> usize {
        tracing::info!(user = %principal.name, "user left chat");
        self.broadcast(&ChatMessage::leave(&principal.name))
    }

    fn broadcast(&self, message: &ChatMessage) -> usize {
        match encode(message) {
            Some(body) => self.broker.publish(PUBLIC_TOPIC, &body),
            None => 0,
        }
    }
}

fn parse_payload(body: &str) -> Result<ChatPayload, ChatError> {
    if body.trim().is_empty() {
        return Ok(ChatPayload::default());
    }
    Ok(serde_json::from_str(body)?)
}

fn encode(message: &ChatMessage) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(body) => Some(body),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode chat message");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use crate::stomp::Frame;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn connect(broker: &Broker, sid: &str, user: &str) -> UnboundedReceiver<Frame> {
        let (tx, rx) = unbounded_channel();
        broker.register_session(sid, Some(user), tx);
        broker.subscribe(sid, "pub", PUBLIC_TOPIC).unwrap();
        broker.subscribe(sid, "priv", "/user/queue/private").unwrap();
        rx
    }

    fn body_of(frame: Frame) -> ChatMessage {
        serde_json::from_str(&frame.body).unwrap()
    }

    #[test]
    fn test_send_message_uses_principal_as_sender() {
        let broker = Broker::new(BrokerConfig::default());
        let chat = ChatService::new(broker.clone());
        let mut rx = connect(&broker, "s1", "alice@x.edu");

        let outcome = chat
            .handle(
                &Principal::user("alice@x.edu"),
                "/app/chat.sendMessage",
                r#"{"sender":"mallory","content":"hello","type":"CHAT"}"#,
            )
            .unwrap();
        assert_eq!(outcome, ChatOutcome::Delivered(1));

        let msg = body_of(rx.try_recv().unwrap());
        assert_eq!(msg.message_type, MessageType::Chat);
        assert_eq!(msg.sender, "alice@x.edu");
        assert_eq!(msg.content, "hello");
    }

    #[test]
    fn test_join_and_leave_broadcast() {
        let broker = Broker::new(BrokerConfig::default());
        let chat = ChatService::new(broker.clone());
        let mut rx = connect(&broker, "s1", "bob@x.edu");
        let principal = Principal::user("bob@x.edu");

        assert_eq!(
            chat.handle(&principal, "/app/chat.addUser", "").unwrap(),
            ChatOutcome::Joined
        );
        assert_eq!(body_of(rx.try_recv().unwrap()).message_type, MessageType::Join);

        chat.user_left(&principal);
        assert_eq!(body_of(rx.try_recv().unwrap()).message_type, MessageType::Leave);
    }

    #[test]
    fn test_private_message_delivered_and_echoed() {
        let broker = Broker::new(BrokerConfig::default());
        let chat = ChatService::new(broker.clone());
        let mut alice = connect(&broker, "s1", "alice@x.edu");
        let mut bob = connect(&broker, "s2", "bob@x.edu");

        let outcome = chat
            .handle(
                &Principal::user("alice@x.edu"),
                "/app/chat.private",
                r#"{"recipient":"bob@x.edu","content":"psst"}"#,
            )
            .unwrap();
        assert_eq!(outcome, ChatOutcome::Delivered(1));

        let received = bob.try_recv().unwrap();
        assert_eq!(received.get("destination"), Some("/user/queue/private"));
        let msg = body_of(received);
        assert_eq!(msg.message_type, MessageType::Private);
        assert_eq!(msg.recipient.as_deref(), Some("bob@x.edu"));

        let echo = body_of(alice.try_recv().unwrap());
        assert_eq!(echo.sender, "alice@x.edu");
    }

    #[test]
    fn test_relay_restamps_sender() {
        let broker = Broker::new(BrokerConfig::default());
        let chat = ChatService::new(broker.clone());
        let mut rx = connect(&broker, "s1", "dana@x.edu");

        let outcome = chat
            .relay(
                &Principal::anonymous(),
                PUBLIC_TOPIC,
                r#"{"type":"PRIVATE","sender":"alice@x.edu","content":"hi"}"#,
            )
            .unwrap();
        assert_eq!(outcome, ChatOutcome::Delivered(1));

        let msg = body_of(rx.try_recv().unwrap());
        assert_eq!(msg.message_type, MessageType::Chat);
        assert_eq!(msg.sender, "anonymous");
        assert_eq!(msg.content, "hi");

        assert!(chat.relay(&Principal::anonymous(), PUBLIC_TOPIC, "plain text").is_err());
    }

    #[test]
    fn test_errors_and_unknown_routes() {
        let broker = Broker::new(BrokerConfig::default());
        let chat = ChatService::new(broker);
        let principal = Principal::user("carol@x.edu");

        assert!(matches!(
            chat.handle(&principal, "/app/chat.sendMessage", "{not json"),
            Err(ChatError::MalformedBody(_))
        ));
        assert!(matches!(
            chat.handle(&principal, "/app/chat.private", r#"{"content":"x"}"#),
            Err(ChatError::MissingRecipient)
        ));
        assert_eq!(
            chat.handle(&principal, "/app/chat.unknown", "{}").unwrap(),
            ChatOutcome::Ignored
        );
        assert_eq!(
            chat.handle(&principal, "/app/chat.sendMessage", r#"{"content":"  "}"#)
                .unwrap(),
            ChatOutcome::Ignored
        );
    }
}
