//! Pure heartbeat bookkeeping
//!
//! Detects a channel that reports connected but is actually unresponsive.
//! The monitor holds only the outstanding-probe flag and makes pure
//! decisions; the supervisor owns the interval and timeout timers and the
//! forced-reconnect side effects.

use crate::protocol::Envelope;
use tracing::{debug, warn};

/// Decision for one heartbeat interval tick.
#[derive(Debug, PartialEq)]
pub enum ProbeAction {
    /// Send this probe and arm the ack timeout.
    Send(Envelope),
    /// A probe is already outstanding; the timeout timer owns escalation.
    /// Never more than one probe per interval.
    Skip,
}

/// Heartbeat state for one connection.
///
/// Reset whenever the transport changes; a probe from a previous connection
/// must not be matchable against an ack on a new one.
#[derive(Debug, Default)]
pub struct LivenessMonitor {
    outstanding: Option<String>,
}

impl LivenessMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interval tick while connected.
    pub fn on_tick(&mut self) -> ProbeAction {
        if self.outstanding.is_some() {
            return ProbeAction::Skip;
        }
        let probe = Envelope::heartbeat();
        self.outstanding = probe.correlation().map(str::to_string);
        ProbeAction::Send(probe)
    }

    /// An acknowledgment control envelope arrived. Returns true when an
    /// outstanding probe was cleared (the caller cancels the timeout timer).
    ///
    /// A correlation mismatch is logged but still clears: the only probe we
    /// could be waiting on is the last one sent, and a stale ack means the
    /// channel is alive either way.
    pub fn on_ack(&mut self, correlation: Option<&str>) -> bool {
        match self.outstanding.take() {
            Some(expected) => {
                if let Some(got) = correlation {
                    if got != expected {
                        debug!(expected = %expected, got = %got, "heartbeat ack correlation mismatch");
                    }
                }
                true
            }
            None => {
                warn!("heartbeat ack with no probe outstanding");
                false
            }
        }
    }

    pub fn is_outstanding(&self) -> bool {
        self.outstanding.is_some()
    }

    pub fn reset(&mut self) {
        self.outstanding = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::HEARTBEAT;

    #[test]
    fn test_tick_sends_probe_when_idle() {
        let mut monitor = LivenessMonitor::new();
        match monitor.on_tick() {
            ProbeAction::Send(probe) => {
                assert_eq!(probe.kind, HEARTBEAT);
                assert!(probe.correlation().is_some());
            }
            ProbeAction::Skip => panic!("expected a probe"),
        }
        assert!(monitor.is_outstanding());
    }

    #[test]
    fn test_tick_skips_while_outstanding() {
        let mut monitor = LivenessMonitor::new();
        let _ = monitor.on_tick();
        assert_eq!(monitor.on_tick(), ProbeAction::Skip);
    }

    #[test]
    fn test_matching_ack_clears_outstanding() {
        let mut monitor = LivenessMonitor::new();
        let correlation = match monitor.on_tick() {
            ProbeAction::Send(probe) => probe.correlation().map(str::to_string),
            ProbeAction::Skip => panic!("expected a probe"),
        };
        assert!(monitor.on_ack(correlation.as_deref()));
        assert!(!monitor.is_outstanding());
    }

    #[test]
    fn test_mismatched_ack_still_clears() {
        let mut monitor = LivenessMonitor::new();
        let _ = monitor.on_tick();
        assert!(monitor.on_ack(Some("not-the-right-id")));
        assert!(!monitor.is_outstanding());
    }

    #[test]
    fn test_unsolicited_ack_is_ignored() {
        let mut monitor = LivenessMonitor::new();
        assert!(!monitor.on_ack(Some("whatever")));
    }

    #[test]
    fn test_reset_clears_outstanding() {
        let mut monitor = LivenessMonitor::new();
        let _ = monitor.on_tick();
        monitor.reset();
        assert!(!monitor.is_outstanding());
        // and the next tick probes again
        assert!(matches!(monitor.on_tick(), ProbeAction::Send(_)));
    }
}
