//! Timer tokens for the channel supervisor
//!
//! Timers are modeled as explicit cancellation tokens around spawned tasks
//! that feed events back into the supervisor's queue, rather than as raw
//! platform timer objects. Cancelling a token aborts the task, so a
//! cancelled timer can never deliver its event.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Cancellation token for a scheduled timer. Aborts the timer task on
/// `cancel()` or drop.
#[derive(Debug)]
pub struct TimerToken {
    handle: JoinHandle<()>,
}

impl TimerToken {
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for TimerToken {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Deliver `event` into `tx` once, after `delay`.
pub fn schedule_once<E: Send + 'static>(
    delay: Duration,
    tx: mpsc::Sender<E>,
    event: E,
) -> TimerToken {
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = tx.send(event).await;
    });
    TimerToken { handle }
}

/// Deliver a fresh event into `tx` every `period`, starting one period from
/// now. Stops when the receiver is gone.
pub fn schedule_repeating<E, F>(period: Duration, tx: mpsc::Sender<E>, mut make: F) -> TimerToken
where
    E: Send + 'static,
    F: FnMut() -> E + Send + 'static,
{
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // interval fires immediately on the first tick; the contract here is
        // "one period from now"
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if tx.send(make()).await.is_err() {
                break;
            }
        }
    });
    TimerToken { handle }
}

/// The three timer slots a channel may hold. At most one of each is live at
/// once; all are released on teardown.
#[derive(Debug, Default)]
pub struct PendingTimers {
    pub retry: Option<TimerToken>,
    pub heartbeat: Option<TimerToken>,
    pub heartbeat_timeout: Option<TimerToken>,
}

impl PendingTimers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel_retry(&mut self) {
        if let Some(token) = self.retry.take() {
            token.cancel();
        }
    }

    pub fn cancel_heartbeat(&mut self) {
        if let Some(token) = self.heartbeat.take() {
            token.cancel();
        }
    }

    pub fn cancel_heartbeat_timeout(&mut self) {
        if let Some(token) = self.heartbeat_timeout.take() {
            token.cancel();
        }
    }

    pub fn cancel_all(&mut self) {
        self.cancel_retry();
        self.cancel_heartbeat();
        self.cancel_heartbeat_timeout();
    }
}
