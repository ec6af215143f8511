//! Connection state machine for one room channel
//!
//! A [`RoomChannel`] is created per logical room join. It spawns a single
//! supervisor task that exclusively owns the transport handle, the retry
//! counter, the timers, and the dispatcher; the handle communicates with it
//! through a command queue. That single-task ownership is what makes the
//! state transitions race-free: there is exactly one mutator.
//!
//! Every event that can arrive late - a frame from a torn-down transport, a
//! cancelled timer that already queued its event, an open result for an
//! attempt that was superseded - carries the connection generation it
//! belongs to and is discarded when stale. This is the invariant that makes
//! `close()` final: once it returns, no callback can observe the channel
//! changing again.

use super::backoff::{evaluate_retry, RetryDecision};
use super::dispatcher::{route_frame, FrameRoute, ListenerHandle, ListenerSet, MessageDispatcher};
use super::liveness::{LivenessMonitor, ProbeAction};
use super::signals::{ReconnectSignal, SignalSource, SubscriptionId};
use super::timers::{schedule_once, schedule_repeating, PendingTimers};
use super::{log_state_transition, ConnectionState, Connector, Transport, TransportError, TransportEvent};
use crate::config::ChannelOptions;
use crate::error::{ChannelError, ChannelResult};
use crate::protocol::Envelope;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub use super::dispatcher::MessageCallback;

/// Callback invoked synchronously on every state transition.
pub type StateCallback = Box<dyn FnMut(ConnectionState) + Send + 'static>;

/// A retry counter above this is clamped back to 1 when an external signal
/// requests an immediate reconnect, so the next scheduled delay (if the
/// immediate attempt fails) is short instead of exponentially grown.
const IMMEDIATE_RETRY_CLAMP_THRESHOLD: u32 = 2;

/// Snapshot of the channel's internals, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelHealth {
    pub state: ConnectionState,
    pub retry_attempts: u32,
    pub heartbeat_outstanding: bool,
    pub transport_open: bool,
}

enum Command {
    Connect { ack: oneshot::Sender<ChannelResult<()>> },
    Send { envelope: Envelope, ack: oneshot::Sender<bool> },
    Close { ack: oneshot::Sender<()> },
    Inspect { ack: oneshot::Sender<ChannelHealth> },
}

enum LoopEvent {
    Command(Command),
    Opened {
        generation: u64,
        result: Result<Box<dyn Transport>, TransportError>,
    },
    Transport {
        generation: u64,
        event: TransportEvent,
    },
    RetryTimerFired,
    HeartbeatTick { generation: u64 },
    HeartbeatTimeout { generation: u64 },
    Signal(ReconnectSignal),
}

/// Handle to one room channel. Cheap observers read the watch channel;
/// everything else goes through the supervisor's queue.
pub struct RoomChannel {
    label: String,
    event_tx: mpsc::Sender<LoopEvent>,
    state_rx: watch::Receiver<ConnectionState>,
    listeners: ListenerSet,
    supervisor: JoinHandle<()>,
    signal_subscriptions: Vec<(SubscriptionId, Arc<dyn SignalSource>, JoinHandle<()>)>,
}

impl RoomChannel {
    /// Create a channel. Validates the config immediately; the transport is
    /// not opened until [`connect`](Self::connect) is called.
    pub fn new(
        options: ChannelOptions,
        connector: Arc<dyn Connector>,
        primary: MessageCallback,
    ) -> ChannelResult<Self> {
        Self::with_state_callback(options, connector, primary, None)
    }

    /// Like [`new`](Self::new), with a callback fired synchronously on every
    /// connection state transition.
    pub fn with_state_callback(
        options: ChannelOptions,
        connector: Arc<dyn Connector>,
        primary: MessageCallback,
        state_callback: Option<StateCallback>,
    ) -> ChannelResult<Self> {
        options.config.validate()?;

        let label = options.label.clone();
        let (event_tx, event_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let dispatcher = MessageDispatcher::new(label.clone(), primary);
        let listeners = dispatcher.listeners();

        let supervisor = Supervisor {
            options,
            connector,
            dispatcher,
            liveness: LivenessMonitor::new(),
            state_tx,
            state_callback,
            event_tx: event_tx.clone(),
            transport: None,
            timers: PendingTimers::new(),
            generation: 0,
            retry_attempts: 0,
            retry_armed: false,
            manual_close: false,
            open_in_flight: false,
        };
        let supervisor = tokio::spawn(supervisor.run(event_rx));

        Ok(Self {
            label,
            event_tx,
            state_rx,
            listeners,
            supervisor,
            signal_subscriptions: Vec::new(),
        })
    }

    /// Begin connecting. Idempotent while an attempt is in flight or the
    /// channel is open; fails fast when no auth credential is available.
    /// Returns once the open has been initiated - the result arrives as a
    /// state transition, not a return value.
    pub async fn connect(&self) -> ChannelResult<()> {
        let (ack, ack_rx) = oneshot::channel();
        self.event_tx
            .send(LoopEvent::Command(Command::Connect { ack }))
            .await
            .map_err(|_| ChannelError::SupervisorGone)?;
        ack_rx.await.map_err(|_| ChannelError::SupervisorGone)?
    }

    /// Send an envelope. True only when the channel is connected and the
    /// socket is actually open; never errors on a closed channel.
    pub async fn send(&self, envelope: Envelope) -> bool {
        if *self.state_rx.borrow() != ConnectionState::Connected {
            return false;
        }
        let (ack, ack_rx) = oneshot::channel();
        if self
            .event_tx
            .send(LoopEvent::Command(Command::Send { envelope, ack }))
            .await
            .is_err()
        {
            return false;
        }
        ack_rx.await.unwrap_or(false)
    }

    /// Close the channel for good: cancels every pending timer, detaches the
    /// transport with a normal close, and disables automatic reconnection.
    /// Idempotent. Once this returns, no further callback fires until an
    /// explicit new `connect()`.
    pub async fn close(&self) {
        let (ack, ack_rx) = oneshot::channel();
        if self
            .event_tx
            .send(LoopEvent::Command(Command::Close { ack }))
            .await
            .is_ok()
        {
            let _ = ack_rx.await;
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch receiver observing every state transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Register a secondary listener for forwarded envelopes. The handle
    /// removes it again; removal is idempotent and safe during dispatch.
    pub fn add_listener(&self, callback: MessageCallback) -> ListenerHandle {
        self.listeners.add(callback)
    }

    /// Subscribe this channel to an external reconnect-signal source.
    pub fn bind_signal_source(&mut self, source: Arc<dyn SignalSource>) {
        let (tx, mut rx) = mpsc::channel(8);
        let id = source.subscribe(tx);
        let event_tx = self.event_tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(signal) = rx.recv().await {
                if event_tx.send(LoopEvent::Signal(signal)).await.is_err() {
                    break;
                }
            }
        });
        self.signal_subscriptions.push((id, source, forwarder));
    }

    /// Diagnostic snapshot of the supervisor's internals.
    pub async fn health(&self) -> ChannelResult<ChannelHealth> {
        let (ack, ack_rx) = oneshot::channel();
        self.event_tx
            .send(LoopEvent::Command(Command::Inspect { ack }))
            .await
            .map_err(|_| ChannelError::SupervisorGone)?;
        ack_rx.await.map_err(|_| ChannelError::SupervisorGone)
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for RoomChannel {
    fn drop(&mut self) {
        for (id, source, forwarder) in self.signal_subscriptions.drain(..) {
            source.unsubscribe(id);
            forwarder.abort();
        }
        self.supervisor.abort();
    }
}

/// The single task that owns all mutable channel state.
struct Supervisor {
    options: ChannelOptions,
    connector: Arc<dyn Connector>,
    dispatcher: MessageDispatcher,
    liveness: LivenessMonitor,
    state_tx: watch::Sender<ConnectionState>,
    state_callback: Option<StateCallback>,
    event_tx: mpsc::Sender<LoopEvent>,
    transport: Option<Box<dyn Transport>>,
    timers: PendingTimers,
    /// Bumped on every open attempt and teardown; events tagged with an
    /// older generation are discarded.
    generation: u64,
    retry_attempts: u32,
    /// Guards against a retry timer event that was already queued when the
    /// timer was cancelled.
    retry_armed: bool,
    manual_close: bool,
    open_in_flight: bool,
}

impl Supervisor {
    async fn run(mut self, mut event_rx: mpsc::Receiver<LoopEvent>) {
        while let Some(event) = event_rx.recv().await {
            match event {
                LoopEvent::Command(Command::Connect { ack }) => {
                    let result = self.handle_connect();
                    let _ = ack.send(result);
                }
                LoopEvent::Command(Command::Send { envelope, ack }) => {
                    let ok = self.handle_send(&envelope).await;
                    let _ = ack.send(ok);
                }
                LoopEvent::Command(Command::Close { ack }) => {
                    self.handle_close().await;
                    let _ = ack.send(());
                }
                LoopEvent::Command(Command::Inspect { ack }) => {
                    let _ = ack.send(self.health());
                }
                LoopEvent::Opened { generation, result } => {
                    if generation == self.generation {
                        self.handle_opened(result).await;
                    } else if let Ok(mut transport) = result {
                        debug!(room = %self.options.label, generation, "closing transport from superseded open attempt");
                        transport.close().await;
                    }
                }
                LoopEvent::Transport { generation, event } => {
                    if generation == self.generation {
                        self.handle_transport_event(event).await;
                    } else {
                        debug!(room = %self.options.label, generation, "discarding event from superseded transport");
                    }
                }
                LoopEvent::RetryTimerFired => self.handle_retry_timer(),
                LoopEvent::HeartbeatTick { generation } => {
                    if generation == self.generation {
                        self.handle_heartbeat_tick().await;
                    }
                }
                LoopEvent::HeartbeatTimeout { generation } => {
                    if generation == self.generation {
                        self.handle_heartbeat_timeout().await;
                    }
                }
                LoopEvent::Signal(signal) => self.handle_signal(signal).await,
            }
        }
        // Handle dropped: release everything.
        self.teardown_transport().await;
    }

    fn current_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Transition states. Subscribers are notified synchronously, before any
    /// side effect the transition triggers.
    fn set_state(&mut self, next: ConnectionState) {
        let prev = self.current_state();
        if prev == next {
            return;
        }
        log_state_transition(&self.options.label, prev, next);
        let _ = self.state_tx.send(next);
        if let Some(callback) = self.state_callback.as_mut() {
            callback(next);
        }
    }

    fn health(&self) -> ChannelHealth {
        ChannelHealth {
            state: self.current_state(),
            retry_attempts: self.retry_attempts,
            heartbeat_outstanding: self.liveness.is_outstanding(),
            transport_open: self
                .transport
                .as_ref()
                .map(|transport| transport.is_open())
                .unwrap_or(false),
        }
    }

    fn handle_connect(&mut self) -> ChannelResult<()> {
        let state = self.current_state();
        if self.open_in_flight
            || state == ConnectionState::Connecting
            || state == ConnectionState::Connected
        {
            debug!(room = %self.options.label, ?state, "connect() is a no-op, already active");
            return Ok(());
        }
        if self.options.auth_token.is_none() {
            warn!(room = %self.options.label, "connect refused: no auth credential");
            self.set_state(ConnectionState::Failed);
            return Err(ChannelError::MissingCredential {
                room_id: self.options.room_id.clone(),
            });
        }
        // Explicit connect is the one way out of Failed and manual-close
        // Disconnected; it starts from a clean slate.
        self.manual_close = false;
        self.retry_attempts = 0;
        self.timers.cancel_retry();
        self.retry_armed = false;
        self.begin_open_attempt();
        Ok(())
    }

    /// Initiate a transport open without blocking the loop; the result comes
    /// back as an `Opened` event tagged with this attempt's generation.
    fn begin_open_attempt(&mut self) {
        self.generation += 1;
        self.open_in_flight = true;
        self.set_state(ConnectionState::Connecting);

        let generation = self.generation;
        let connector = self.connector.clone();
        let options = self.options.clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let (transport_tx, mut transport_rx) = mpsc::channel(64);
            let result = connector.open(&options, transport_tx).await;
            if result.is_ok() {
                let forward_tx = event_tx.clone();
                tokio::spawn(async move {
                    while let Some(event) = transport_rx.recv().await {
                        if forward_tx
                            .send(LoopEvent::Transport { generation, event })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                });
            }
            let _ = event_tx.send(LoopEvent::Opened { generation, result }).await;
        });
    }

    async fn handle_opened(&mut self, result: Result<Box<dyn Transport>, TransportError>) {
        self.open_in_flight = false;
        if self.manual_close {
            if let Ok(mut transport) = result {
                transport.close().await;
            }
            return;
        }
        match result {
            Ok(transport) => {
                self.transport = Some(transport);
                self.retry_attempts = 0;
                self.liveness.reset();
                self.set_state(ConnectionState::Connected);
                self.start_heartbeat();
            }
            Err(e) => {
                warn!(room = %self.options.label, error = %e, "transport open failed");
                self.set_state(ConnectionState::Disconnected);
                self.schedule_retry();
            }
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Frame(raw) => self.handle_frame(&raw).await,
            TransportEvent::Error(message) => {
                // Informational only: the reader guarantees a Closed event
                // follows, and that close is authoritative for retries.
                error!(room = %self.options.label, error = %message, "transport error");
            }
            TransportEvent::Closed { code, reason } => {
                info!(room = %self.options.label, ?code, reason = %reason, "transport closed");
                self.teardown_transport().await;
                self.set_state(ConnectionState::Disconnected);
                self.schedule_retry();
            }
        }
    }

    async fn handle_frame(&mut self, raw: &str) {
        match route_frame(raw) {
            Err(e) => {
                warn!(room = %self.options.label, error = %e, "dropping malformed frame");
            }
            Ok(FrameRoute::HeartbeatAck { correlation }) => {
                if self.liveness.on_ack(correlation.as_deref()) {
                    self.timers.cancel_heartbeat_timeout();
                }
            }
            Ok(FrameRoute::HeartbeatRequest { correlation }) => {
                let ack = Envelope::heartbeat_ack(correlation);
                let _ = self.send_frame(&ack).await;
            }
            Ok(FrameRoute::Application(envelope)) => {
                self.dispatcher.dispatch(&envelope);
            }
        }
    }

    async fn handle_send(&mut self, envelope: &Envelope) -> bool {
        if self.current_state() != ConnectionState::Connected {
            return false;
        }
        self.send_frame(envelope).await
    }

    async fn send_frame(&mut self, envelope: &Envelope) -> bool {
        let Some(transport) = self.transport.as_mut() else {
            return false;
        };
        if !transport.is_open() {
            return false;
        }
        let frame = match envelope.encode() {
            Ok(frame) => frame,
            Err(e) => {
                error!(room = %self.options.label, error = %e, "failed to encode envelope");
                return false;
            }
        };
        match transport.send(frame).await {
            Ok(()) => true,
            Err(e) => {
                warn!(room = %self.options.label, kind = %envelope.kind, error = %e, "send failed");
                false
            }
        }
    }

    fn start_heartbeat(&mut self) {
        self.timers.cancel_heartbeat();
        self.timers.cancel_heartbeat_timeout();
        if !self.options.config.heartbeat_enabled() {
            return;
        }
        let generation = self.generation;
        self.timers.heartbeat = Some(schedule_repeating(
            self.options.config.heartbeat_interval(),
            self.event_tx.clone(),
            move || LoopEvent::HeartbeatTick { generation },
        ));
    }

    async fn handle_heartbeat_tick(&mut self) {
        if self.current_state() != ConnectionState::Connected {
            return;
        }
        match self.liveness.on_tick() {
            ProbeAction::Skip => {}
            ProbeAction::Send(probe) => {
                if !self.send_frame(&probe).await {
                    // Known-dead transport: don't wait out the timeout.
                    warn!(room = %self.options.label, "heartbeat send failed, forcing reconnect");
                    self.force_reconnect().await;
                    return;
                }
                let generation = self.generation;
                self.timers.cancel_heartbeat_timeout();
                self.timers.heartbeat_timeout = Some(schedule_once(
                    self.options.config.heartbeat_timeout(),
                    self.event_tx.clone(),
                    LoopEvent::HeartbeatTimeout { generation },
                ));
            }
        }
    }

    async fn handle_heartbeat_timeout(&mut self) {
        if !self.liveness.is_outstanding() {
            return;
        }
        warn!(room = %self.options.label, "heartbeat timed out, channel presumed dead");
        self.force_reconnect().await;
    }

    async fn handle_signal(&mut self, signal: ReconnectSignal) {
        if self.manual_close || self.options.auth_token.is_none() {
            return;
        }
        if self.open_in_flight || self.current_state() == ConnectionState::Connecting {
            debug!(room = %self.options.label, ?signal, "attempt already in flight, ignoring signal");
            return;
        }
        match self.current_state() {
            ConnectionState::Connected => {
                let half_open = self
                    .transport
                    .as_ref()
                    .map(|transport| !transport.is_open())
                    .unwrap_or(true);
                if half_open {
                    info!(room = %self.options.label, ?signal, "socket silently dead, forcing reconnect");
                    self.force_reconnect().await;
                }
            }
            ConnectionState::Reconnecting
            | ConnectionState::Disconnected
            | ConnectionState::Failed => {
                info!(room = %self.options.label, ?signal, "external signal requests immediate reconnect");
                self.timers.cancel_retry();
                self.retry_armed = false;
                if self.retry_attempts > IMMEDIATE_RETRY_CLAMP_THRESHOLD {
                    self.retry_attempts = 1;
                }
                self.begin_open_attempt();
            }
            ConnectionState::Connecting => {}
        }
    }

    /// Tear down the current transport (if any) and attempt to reconnect
    /// right away, bypassing the backoff timer. Used by the liveness monitor
    /// and by external signals that caught a half-open socket.
    async fn force_reconnect(&mut self) {
        self.teardown_transport().await;
        self.set_state(ConnectionState::Disconnected);
        if self.retry_attempts > IMMEDIATE_RETRY_CLAMP_THRESHOLD {
            self.retry_attempts = 1;
        }
        self.begin_open_attempt();
    }

    /// Decide what happens after a non-manual disconnection: schedule one
    /// backoff timer, or give up when the budget is spent.
    fn schedule_retry(&mut self) {
        match evaluate_retry(self.retry_attempts, &self.options.config, self.manual_close) {
            RetryDecision::AbortManualClose => {}
            RetryDecision::AbortBudgetExhausted => {
                error!(
                    room = %self.options.label,
                    attempts = self.retry_attempts,
                    "reconnect budget exhausted"
                );
                self.set_state(ConnectionState::Failed);
            }
            RetryDecision::Schedule { attempt, delay } => {
                self.set_state(ConnectionState::Reconnecting);
                info!(
                    room = %self.options.label,
                    attempt = attempt + 1,
                    max = self.options.config.max_reconnect_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling reconnect"
                );
                self.timers.cancel_retry();
                self.retry_armed = true;
                self.timers.retry = Some(schedule_once(
                    delay,
                    self.event_tx.clone(),
                    LoopEvent::RetryTimerFired,
                ));
            }
        }
    }

    fn handle_retry_timer(&mut self) {
        if !self.retry_armed || self.manual_close {
            return;
        }
        if self.current_state() != ConnectionState::Reconnecting {
            return;
        }
        self.retry_armed = false;
        self.timers.retry = None;
        // The counter moves only when a scheduled attempt actually starts.
        self.retry_attempts += 1;
        self.begin_open_attempt();
    }

    async fn handle_close(&mut self) {
        self.manual_close = true;
        self.open_in_flight = false;
        self.teardown_transport().await;
        self.set_state(ConnectionState::Disconnected);
        info!(room = %self.options.label, "channel closed by caller");
    }

    /// Cancel every timer, invalidate queued events, and close the transport.
    async fn teardown_transport(&mut self) {
        self.timers.cancel_all();
        self.retry_armed = false;
        self.liveness.reset();
        self.generation += 1;
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
    }
}
