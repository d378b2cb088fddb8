use crate::config::WebSocketConfig;
use crate::stomp::Frame;
use crate::websocket::session::{SessionControl, SessionServices, StompSession};
use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_web_actors::ws;
use std::time::Instant;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio_stream::wrappers::UnboundedReceiverStream;

/// WebSocket transport for one STOMP session
pub struct WsSession {
    session: StompSession,
    outbound: Option<UnboundedReceiver<Frame>>,
    hb: Instant,
    config: WebSocketConfig,
}

impl WsSession {
    pub fn new(services: SessionServices, config: WebSocketConfig) -> Self {
        let (tx, rx) = unbounded_channel();
        Self {
            session: StompSession::new("websocket", services, tx),
            outbound: Some(rx),
            hb: Instant::now(),
            config,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let client_timeout = self.config.client_timeout;
        ctx.run_interval(self.config.heartbeat_interval, move |act, ctx| {
            if Instant::now().duration_since(act.hb) > client_timeout {
                tracing::warn!(
                    session_id = %act.session.id(),
                    "WebSocket heartbeat failed, disconnecting"
                );
                act.session.close();
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::debug!(session_id = %self.session.id(), "WebSocket session started");
        self.hb(ctx);

        if let Some(rx) = self.outbound.take() {
            ctx.add_stream(UnboundedReceiverStream::new(rx));
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.session.close();
        tracing::debug!(session_id = %self.session.id(), "WebSocket session stopped");
    }
}

/// Frames queued for this client
impl StreamHandler<Frame> for WsSession {
    fn handle(&mut self, frame: Frame, ctx: &mut Self::Context) {
        ctx.text(frame.encode());
    }

    /// The session dropped its senders and everything queued was written
    fn finished(&mut self, ctx: &mut Self::Context) {
        ctx.close(Some(ws::CloseCode::Normal.into()));
        ctx.stop();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        let control = match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
                SessionControl::Continue
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
                SessionControl::Continue
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                self.session.handle_text(&text)
            }
            Ok(ws::Message::Binary(bin)) => {
                self.hb = Instant::now();
                match std::str::from_utf8(&bin) {
                    Ok(text) => self.session.handle_text(text),
                    Err(_) => {
                        tracing::debug!(session_id = %self.session.id(), "non UTF-8 binary frame");
                        SessionControl::Close
                    }
                }
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::debug!(session_id = %self.session.id(), ?reason, "client closed WebSocket");
                self.session.close();
                ctx.close(reason);
                ctx.stop();
                return;
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => SessionControl::Continue,
            Err(e) => {
                tracing::warn!(session_id = %self.session.id(), error = %e, "WebSocket protocol error");
                self.session.close();
                ctx.stop();
                return;
            }
        };

        if control == SessionControl::Close {
            // Pending frames still flush through the outbound stream
            self.session.close();
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        self.session.close();
        ctx.stop();
    }
}
