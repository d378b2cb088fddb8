//! STOMP session state machine shared by the socket and polling transports
//!
//! A session owns the outbound half of its channel. Protocol replies and
//! broker deliveries both land in that channel; the transport drains the
//! receiving half. Closing the session drops every sender, so the receiver
//! ends once the queued frames are drained.

use crate::broker::{Broker, BrokerError};
use crate::services::chat::{ChatOutcome, ChatService};
use crate::stomp::frame::{DESTINATION, ID, RECEIPT};
use crate::stomp::{decode_frames, Command, Frame};
use crate::websocket::authenticator::{ConnectionAuthenticator, Principal};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

/// What the transport should do after handing a frame to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionControl {
    Continue,
    Close,
}

/// Shared services every session needs
#[derive(Clone)]
pub struct SessionServices {
    pub broker: Broker,
    pub authenticator: ConnectionAuthenticator,
    pub chat: ChatService,
}

impl SessionServices {
    pub fn new(broker: Broker, authenticator: ConnectionAuthenticator) -> Self {
        let chat = ChatService::new(broker.clone());
        Self {
            broker,
            authenticator,
            chat,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingConnect,
    Connected,
    Closed,
}

pub struct StompSession {
    id: String,
    transport: &'static str,
    phase: Phase,
    principal: Option<Principal>,
    joined: bool,
    services: SessionServices,
    outbound: Option<UnboundedSender<Frame>>,
}

impl StompSession {
    pub fn new(
        transport: &'static str,
        services: SessionServices,
        outbound: UnboundedSender<Frame>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            transport,
            phase: Phase::AwaitingConnect,
            principal: None,
            joined: false,
            services,
            outbound: Some(outbound),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    /// Decode and process every frame in one transport message
    pub fn handle_text(&mut self, text: &str) -> SessionControl {
        let frames = match decode_frames(text) {
            Ok(frames) => frames,
            Err(e) => {
                tracing::debug!(session_id = %self.id, error = %e, "undecodable frame");
                return self.fail("Malformed frame", &e.to_string());
            }
        };

        for frame in frames {
            if self.handle_frame(frame) == SessionControl::Close {
                return SessionControl::Close;
            }
        }
        SessionControl::Continue
    }

    pub fn handle_frame(&mut self, frame: Frame) -> SessionControl {
        let control = match (self.phase, frame.command) {
            (Phase::Closed, _) => return SessionControl::Close,
            (Phase::AwaitingConnect, Command::Connect | Command::Stomp) => self.on_connect(&frame),
            (Phase::AwaitingConnect, command) => {
                return self.fail(
                    "Not connected",
                    &format!("{command} received before CONNECT"),
                )
            }
            (Phase::Connected, Command::Connect | Command::Stomp) => {
                return self.fail("Already connected", "duplicate CONNECT")
            }
            (Phase::Connected, Command::Subscribe) => self.on_subscribe(&frame),
            (Phase::Connected, Command::Unsubscribe) => self.on_unsubscribe(&frame),
            (Phase::Connected, Command::Send) => self.on_send(&frame),
            (Phase::Connected, Command::Disconnect) => SessionControl::Close,
            (
                Phase::Connected,
                Command::Ack | Command::Nack | Command::Begin | Command::Commit | Command::Abort,
            ) => {
                tracing::debug!(session_id = %self.id, command = %frame.command, "ignoring unsupported command");
                SessionControl::Continue
            }
            (Phase::Connected, command) => {
                return self.fail(
                    "Invalid command",
                    &format!("{command} is a server frame"),
                )
            }
        };

        if control == SessionControl::Continue || frame.command == Command::Disconnect {
            if let Some(receipt) = frame.get(RECEIPT) {
                self.reply(Frame::receipt(receipt));
            }
        }
        control
    }

    /// Release broker state and emit the close events. Idempotent.
    pub fn close(&mut self) {
        let previous = std::mem::replace(&mut self.phase, Phase::Closed);
        self.outbound = None;
        let Some(principal) = self.principal.take() else {
            return;
        };
        if previous != Phase::Connected {
            return;
        }

        self.services.broker.unregister_session(&self.id);
        if self.joined {
            self.services.chat.user_left(&principal);
        }

        if principal.is_anonymous() {
            tracing::debug!(session_id = %self.id, transport = self.transport, "anonymous session closed");
        } else {
            tracing::info!(
                session_id = %self.id,
                transport = self.transport,
                user = %principal.name,
                "user disconnected"
            );
        }
    }

    fn on_connect(&mut self, frame: &Frame) -> SessionControl {
        let Some(outbound) = self.outbound.clone() else {
            return SessionControl::Close;
        };
        let principal = self.services.authenticator.authenticate(frame);
        let user = (!principal.is_anonymous()).then_some(principal.name.as_str());
        self.services
            .broker
            .register_session(&self.id, user, outbound);

        tracing::info!(
            session_id = %self.id,
            transport = self.transport,
            user = %principal.name,
            "session connected"
        );
        self.reply(Frame::connected(&principal.name, (0, 0)));
        self.principal = Some(principal);
        self.phase = Phase::Connected;
        SessionControl::Continue
    }

    fn on_subscribe(&mut self, frame: &Frame) -> SessionControl {
        let (Some(id), Some(destination)) = (frame.get(ID), frame.get(DESTINATION)) else {
            return self.fail("Invalid SUBSCRIBE", "id and destination headers are required");
        };

        match self.services.broker.subscribe(&self.id, id, destination) {
            Ok(()) => SessionControl::Continue,
            Err(BrokerError::AnonymousUserDestination(destination)) => {
                tracing::warn!(
                    session_id = %self.id,
                    destination = %destination,
                    "anonymous session cannot subscribe to user destination"
                );
                SessionControl::Continue
            }
            Err(e) => self.fail("Subscription rejected", &e.to_string()),
        }
    }

    fn on_unsubscribe(&mut self, frame: &Frame) -> SessionControl {
        let Some(id) = frame.get(ID) else {
            return self.fail("Invalid UNSUBSCRIBE", "id header is required");
        };
        if !self.services.broker.unsubscribe(&self.id, id) {
            tracing::debug!(session_id = %self.id, subscription_id = %id, "unknown subscription");
        }
        SessionControl::Continue
    }

    fn on_send(&mut self, frame: &Frame) -> SessionControl {
        let Some(destination) = frame.get(DESTINATION) else {
            return self.fail("Invalid SEND", "destination header is required");
        };

        let broker = &self.services.broker;
        if broker.is_user_destination(destination) {
            return self.fail(
                "Send rejected",
                &format!("{destination}: user destinations are reached through /app/chat.private"),
            );
        }
        let application = broker.is_application_destination(destination);
        if !application && !broker.is_broker_destination(destination) {
            return self.fail(
                "Send rejected",
                &format!("destination not handled by the broker: {destination}"),
            );
        }

        let Some(principal) = self.principal.as_ref() else {
            return SessionControl::Close;
        };
        let result = if application {
            self.services.chat.handle(principal, destination, &frame.body)
        } else {
            self.services.chat.relay(principal, destination, &frame.body)
        };

        match result {
            Ok(ChatOutcome::Joined) => {
                self.joined = true;
                SessionControl::Continue
            }
            Ok(_) => SessionControl::Continue,
            Err(e) => self.fail("Invalid message", &e.to_string()),
        }
    }

    /// Send an ERROR frame and ask the transport to close
    fn fail(&mut self, message: &str, detail: &str) -> SessionControl {
        tracing::debug!(
            session_id = %self.id,
            error_message = %message,
            detail = %detail,
            "protocol error"
        );
        self.reply(Frame::error(message, detail));
        SessionControl::Close
    }

    fn reply(&self, frame: Frame) {
        let sent = self
            .outbound
            .as_ref()
            .is_some_and(|outbound| outbound.send(frame).is_ok());
        if !sent {
            tracing::debug!(session_id = %self.id, "outbound channel closed");
        }
    }
}

impl Drop for StompSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use crate::models::{ChatMessage, MessageType};
    use crate::services::chat::PUBLIC_TOPIC;
    use crypto_core::JwtKeys;
    use std::sync::Arc;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    const SECRET: &[u8] = b"session-test-secret-with-32-bytes!!";

    fn services() -> (SessionServices, Arc<JwtKeys>) {
        let keys = Arc::new(JwtKeys::from_secret(SECRET).unwrap());
        let services = SessionServices::new(
            Broker::new(BrokerConfig::default()),
            ConnectionAuthenticator::new(keys.clone()),
        );
        (services, keys)
    }

    fn open(services: &SessionServices) -> (StompSession, UnboundedReceiver<Frame>) {
        let (tx, rx) = unbounded_channel();
        (StompSession::new("test", services.clone(), tx), rx)
    }

    fn connect_as(session: &mut StompSession, rx: &mut UnboundedReceiver<Frame>, email: &str) {
        let control = session.handle_text(&format!("CONNECT\nX-User-Email:{email}\n\n\0"));
        assert_eq!(control, SessionControl::Continue);
        let connected = rx.try_recv().unwrap();
        assert_eq!(connected.command, Command::Connected);
        assert_eq!(connected.get("user-name"), Some(email));
    }

    #[test]
    fn test_connect_with_token() {
        let (services, keys) = services();
        let (mut session, mut rx) = open(&services);
        let token = keys.generate_access_token("alice@x.edu", None).unwrap();

        session.handle_text(&format!(
            "CONNECT\naccept-version:1.2\nAuthorization:Bearer {token}\n\n\0"
        ));
        let connected = rx.try_recv().unwrap();
        assert_eq!(connected.get("version"), Some("1.2"));
        assert_eq!(connected.get("user-name"), Some("alice@x.edu"));
        assert_eq!(session.principal().unwrap().name, "alice@x.edu");
        assert_eq!(services.broker.connected_users(), vec!["alice@x.edu"]);
    }

    #[test]
    fn test_anonymous_connect() {
        let (services, _) = services();
        let (mut session, mut rx) = open(&services);
        session.handle_text("STOMP\n\n\0");
        assert_eq!(rx.try_recv().unwrap().get("user-name"), Some("anonymous"));
        assert!(services.broker.connected_users().is_empty());

        // Ignored, not fatal
        let control = session.handle_text(
            "SUBSCRIBE\nid:sub-1\ndestination:/user/queue/private\nreceipt:r-1\n\n\0",
        );
        assert_eq!(control, SessionControl::Continue);
        assert_eq!(rx.try_recv().unwrap().get("receipt-id"), Some("r-1"));
    }

    #[test]
    fn test_frame_before_connect_is_rejected() {
        let (services, _) = services();
        let (mut session, mut rx) = open(&services);
        let control = session.handle_text("SEND\ndestination:/topic/public\n\nhi\0");
        assert_eq!(control, SessionControl::Close);
        assert_eq!(rx.try_recv().unwrap().command, Command::Error);
    }

    #[test]
    fn test_subscribe_send_and_receipt() {
        let (services, _) = services();
        let (mut session, mut rx) = open(&services);
        connect_as(&mut session, &mut rx, "bob@x.edu");

        session.handle_text(
            "SUBSCRIBE\nid:sub-0\ndestination:/topic/public\nreceipt:r-1\n\n\0",
        );
        assert_eq!(rx.try_recv().unwrap().get("receipt-id"), Some("r-1"));

        session.handle_text(
            "SEND\ndestination:/app/chat.sendMessage\n\n{\"content\":\"hello\"}\0",
        );
        let delivered = rx.try_recv().unwrap();
        assert_eq!(delivered.command, Command::Message);
        assert_eq!(delivered.get("destination"), Some(PUBLIC_TOPIC));
        let msg: ChatMessage = serde_json::from_str(&delivered.body).unwrap();
        assert_eq!(msg.sender, "bob@x.edu");
        assert_eq!(msg.content, "hello");
    }

    #[test]
    fn test_direct_sends_cannot_spoof_sender() {
        let (services, _) = services();
        let (mut bob, mut bob_rx) = open(&services);
        connect_as(&mut bob, &mut bob_rx, "bob@x.edu");
        bob.handle_text(
            "SUBSCRIBE\nid:pub\ndestination:/topic/public\n\n\0SUBSCRIBE\nid:priv\ndestination:/user/queue/private\n\n\0",
        );

        let (mut session, mut rx) = open(&services);
        session.handle_text("CONNECT\n\n\0");
        assert_eq!(rx.try_recv().unwrap().get("user-name"), Some("anonymous"));

        let forged = r#"{"type":"PRIVATE","sender":"alice@x.edu","content":"trust me"}"#;
        let control = session.handle_text(&format!(
            "SEND\ndestination:/topic/public\n\n{forged}\0"
        ));
        assert_eq!(control, SessionControl::Continue);
        let relayed: ChatMessage = serde_json::from_str(&bob_rx.try_recv().unwrap().body).unwrap();
        assert_eq!(relayed.sender, "anonymous");
        assert_eq!(relayed.message_type, MessageType::Chat);

        let control = session.handle_text(&format!(
            "SEND\ndestination:/user/bob@x.edu/queue/private\n\n{forged}\0"
        ));
        assert_eq!(control, SessionControl::Close);
        assert_eq!(rx.try_recv().unwrap().command, Command::Error);
        assert!(bob_rx.try_recv().is_err());
    }

    #[test]
    fn test_malformed_chat_body_yields_error() {
        let (services, _) = services();
        let (mut session, mut rx) = open(&services);
        connect_as(&mut session, &mut rx, "carol@x.edu");

        let control = session.handle_text("SEND\ndestination:/app/chat.sendMessage\n\n{oops\0");
        assert_eq!(control, SessionControl::Close);
        assert_eq!(rx.try_recv().unwrap().command, Command::Error);
    }

    #[test]
    fn test_joined_session_broadcasts_leave_on_close() {
        let (services, _) = services();
        let (mut watcher, mut watcher_rx) = open(&services);
        connect_as(&mut watcher, &mut watcher_rx, "dana@x.edu");
        watcher.handle_text("SUBSCRIBE\nid:w\ndestination:/topic/public\n\n\0");

        let (mut session, mut rx) = open(&services);
        connect_as(&mut session, &mut rx, "erin@x.edu");
        session.handle_text("SEND\ndestination:/app/chat.addUser\n\n{}\0");
        let join: ChatMessage = serde_json::from_str(&watcher_rx.try_recv().unwrap().body).unwrap();
        assert_eq!(join.message_type, MessageType::Join);

        let control = session.handle_text("DISCONNECT\nreceipt:bye\n\n\0");
        assert_eq!(control, SessionControl::Close);
        assert_eq!(rx.try_recv().unwrap().get("receipt-id"), Some("bye"));

        session.close();
        session.close();
        let leave: ChatMessage = serde_json::from_str(&watcher_rx.try_recv().unwrap().body).unwrap();
        assert_eq!(leave.message_type, MessageType::Leave);
        assert_eq!(leave.sender, "erin@x.edu");
        assert!(watcher_rx.try_recv().is_err());
        assert_eq!(services.broker.connected_users(), vec!["dana@x.edu"]);
    }

    #[test]
    fn test_dropped_session_unregisters() {
        let (services, _) = services();
        let (mut session, mut rx) = open(&services);
        connect_as(&mut session, &mut rx, "frank@x.edu");
        assert_eq!(services.broker.session_count(), 1);
        drop(session);
        assert_eq!(services.broker.session_count(), 0);
    }
}
