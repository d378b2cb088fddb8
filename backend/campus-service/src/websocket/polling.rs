//! HTTP long-polling fallback for clients that cannot hold a WebSocket
//!
//! Each polling session wraps the same [`StompSession`] as the socket
//! transport. Clients submit frames with POST and drain queued frames with
//! GET, which waits up to the poll timeout when nothing is queued.

use crate::config::WebSocketConfig;
use crate::stomp::Frame;
use crate::websocket::session::{SessionControl, SessionServices, StompSession};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Result of draining a polling session
#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// Encoded frames, NUL-terminated and concatenated
    Frames(String),
    /// Nothing arrived before the poll timeout
    Empty,
    /// The session is closed and fully drained
    Closed,
}

struct PollEntry {
    session: Mutex<StompSession>,
    outbound: Mutex<UnboundedReceiver<Frame>>,
    /// Milliseconds since the registry epoch
    last_seen: AtomicU64,
}

#[derive(Clone)]
pub struct PollingRegistry {
    services: SessionServices,
    config: WebSocketConfig,
    sessions: Arc<DashMap<String, Arc<PollEntry>>>,
    epoch: Instant,
}

impl PollingRegistry {
    pub fn new(services: SessionServices, config: WebSocketConfig) -> Self {
        Self {
            services,
            config,
            sessions: Arc::new(DashMap::new()),
            epoch: Instant::now(),
        }
    }

    /// Open a session and return its id
    pub fn open(&self) -> String {
        let (tx, rx) = unbounded_channel();
        let session = StompSession::new("polling", self.services.clone(), tx);
        let id = session.id().to_string();

        self.sessions.insert(
            id.clone(),
            Arc::new(PollEntry {
                session: Mutex::new(session),
                outbound: Mutex::new(rx),
                last_seen: AtomicU64::new(self.now_ms()),
            }),
        );
        tracing::debug!(session_id = %id, "polling session opened");
        id
    }

    /// Feed frames to a session. `None` when the id is unknown.
    pub async fn submit(&self, id: &str, text: &str) -> Option<SessionControl> {
        let entry = self.touch(id)?;
        let mut session = entry.session.lock().await;
        let control = session.handle_text(text);
        if control == SessionControl::Close {
            session.close();
        }
        Some(control)
    }

    /// Drain queued frames, waiting up to the poll timeout for the first one.
    /// `None` when the id is unknown.
    pub async fn poll(&self, id: &str) -> Option<PollOutcome> {
        let entry = self.touch(id)?;
        let mut outbound = entry.outbound.lock().await;

        let mut frames = String::new();
        while let Ok(frame) = outbound.try_recv() {
            frames.push_str(&frame.encode());
        }

        if frames.is_empty() {
            match tokio::time::timeout(self.config.poll_timeout, outbound.recv()).await {
                Ok(Some(frame)) => {
                    frames.push_str(&frame.encode());
                    while let Ok(frame) = outbound.try_recv() {
                        frames.push_str(&frame.encode());
                    }
                }
                Ok(None) => {
                    drop(outbound);
                    self.remove(id).await;
                    return Some(PollOutcome::Closed);
                }
                Err(_) => return Some(PollOutcome::Empty),
            }
        }

        entry.last_seen.store(self.now_ms(), Ordering::Relaxed);
        Some(PollOutcome::Frames(frames))
    }

    /// Close and forget a session. Returns whether it existed.
    pub async fn remove(&self, id: &str) -> bool {
        match self.sessions.remove(id) {
            Some((_, entry)) => {
                entry.session.lock().await.close();
                tracing::debug!(session_id = %id, "polling session removed");
                true
            }
            None => false,
        }
    }

    /// Close sessions idle for longer than the idle timeout
    pub async fn reap_idle(&self) -> usize {
        let idle_ms = self.config.poll_idle_timeout.as_millis() as u64;
        let now = self.now_ms();
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| now.saturating_sub(entry.last_seen.load(Ordering::Relaxed)) > idle_ms)
            .map(|entry| entry.key().clone())
            .collect();

        let mut reaped = 0;
        for id in expired {
            if self.remove(&id).await {
                tracing::info!(session_id = %id, "reaped idle polling session");
                reaped += 1;
            }
        }
        reaped
    }

    pub fn spawn_reaper(&self) -> JoinHandle<()> {
        let registry = self.clone();
        let period = (self.config.poll_idle_timeout / 2).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                registry.reap_idle().await;
            }
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn touch(&self, id: &str) -> Option<Arc<PollEntry>> {
        let entry = self.sessions.get(id)?.value().clone();
        entry.last_seen.store(self.now_ms(), Ordering::Relaxed);
        Some(entry)
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}
