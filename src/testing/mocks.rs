//! In-memory transport fakes
//!
//! [`FakeConnector`] stands in for the production WebSocket connector: every
//! `open()` produces a scripted in-memory transport whose remote side is
//! driven by the test through a [`FakeSession`] handle. Opens can be made to
//! fail, frames can be injected, and the connection can be dropped abruptly
//! or left silently half-open.

use crate::channel::{Connector, Transport, TransportError, TransportEvent};
use crate::config::ChannelOptions;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct ConnectorInner {
    open_calls: usize,
    fail_next: usize,
    open_delay: Option<Duration>,
    sessions: Vec<FakeSession>,
}

/// Scripted connector handing out in-memory transports.
#[derive(Clone, Default)]
pub struct FakeConnector {
    inner: Arc<Mutex<ConnectorInner>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` open attempts fail with a handshake error.
    pub fn fail_next_opens(&self, n: usize) {
        self.inner.lock().unwrap().fail_next = n;
    }

    /// Make every open attempt take `delay` before completing, so a test can
    /// interleave commands with an in-flight open.
    pub fn delay_opens(&self, delay: Duration) {
        self.inner.lock().unwrap().open_delay = Some(delay);
    }

    /// Total number of open attempts observed, including failed ones.
    pub fn open_calls(&self) -> usize {
        self.inner.lock().unwrap().open_calls
    }

    /// Handle for the `n`-th successful open (0-based).
    pub fn session(&self, n: usize) -> Option<FakeSession> {
        self.inner.lock().unwrap().sessions.get(n).cloned()
    }

    /// Handle for the most recent successful open.
    pub fn last_session(&self) -> Option<FakeSession> {
        self.inner.lock().unwrap().sessions.last().cloned()
    }

    /// Number of successful opens.
    pub fn session_count(&self) -> usize {
        self.inner.lock().unwrap().sessions.len()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(
        &self,
        _options: &ChannelOptions,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let delay = {
            let mut inner = self.inner.lock().unwrap();
            inner.open_calls += 1;
            if inner.fail_next > 0 {
                inner.fail_next -= 1;
                return Err(TransportError::Handshake("scripted failure".to_string()));
            }
            inner.open_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let shared = Arc::new(SessionShared {
            open: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
            events,
        });
        self.inner.lock().unwrap().sessions.push(FakeSession {
            shared: shared.clone(),
        });
        Ok(Box::new(FakeTransport { shared }))
    }
}

struct SessionShared {
    open: AtomicBool,
    sent: Mutex<Vec<String>>,
    events: mpsc::Sender<TransportEvent>,
}

/// Test-side handle to one fake connection: inject inbound frames, observe
/// outbound ones, and control how the connection dies.
#[derive(Clone)]
pub struct FakeSession {
    shared: Arc<SessionShared>,
}

impl FakeSession {
    /// Deliver an inbound frame, as if the server sent it.
    pub async fn deliver(&self, frame: impl Into<String>) {
        let _ = self
            .shared
            .events
            .send(TransportEvent::Frame(frame.into()))
            .await;
    }

    /// Report a transport error followed by a close, as the production
    /// reader does for socket errors.
    pub async fn fail(&self, message: &str) {
        self.shared.open.store(false, Ordering::SeqCst);
        let _ = self
            .shared
            .events
            .send(TransportEvent::Error(message.to_string()))
            .await;
        let _ = self
            .shared
            .events
            .send(TransportEvent::Closed {
                code: None,
                reason: message.to_string(),
            })
            .await;
    }

    /// Close the connection from the remote side.
    pub async fn drop_connection(&self, code: Option<u16>, reason: &str) {
        self.shared.open.store(false, Ordering::SeqCst);
        let _ = self
            .shared
            .events
            .send(TransportEvent::Closed {
                code,
                reason: reason.to_string(),
            })
            .await;
    }

    /// Kill the socket without delivering any event. This is the half-open
    /// case: the transport reports not-open but the channel has no way to
    /// notice until it tries to use it.
    pub fn mark_half_open(&self) {
        self.shared.open.store(false, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Frames sent by the channel over this connection, in order.
    pub fn sent_frames(&self) -> Vec<String> {
        self.shared.sent.lock().unwrap().clone()
    }
}

/// The transport half handed to the channel under test.
pub struct FakeTransport {
    shared: Arc<SessionShared>,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.shared.sent.lock().unwrap().push(frame);
        Ok(())
    }

    async fn close(&mut self) {
        self.shared.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }
}
