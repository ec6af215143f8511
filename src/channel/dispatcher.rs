//! Inbound frame decoding and message fan-out
//!
//! Each inbound frame is decoded once, control envelopes are routed to the
//! liveness path, and everything else goes to the primary handler first and
//! then to every secondary listener in registration order. The dispatcher
//! treats all non-control types uniformly; unknown types pass straight
//! through.

use crate::protocol::{Envelope, HEARTBEAT, HEARTBEAT_ACK};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Consumer callback for forwarded envelopes.
pub type MessageCallback = Box<dyn FnMut(&Envelope) + Send + 'static>;

/// Routing decision for one decoded inbound frame.
#[derive(Debug, PartialEq)]
pub enum FrameRoute {
    /// Heartbeat acknowledgment; clears the outstanding probe. Suppressed
    /// from application consumers.
    HeartbeatAck { correlation: Option<String> },
    /// Server-initiated heartbeat probe; answered in kind and suppressed.
    HeartbeatRequest { correlation: Option<String> },
    /// Everything else is forwarded to consumers as-is.
    Application(Envelope),
}

/// Decode a raw frame and decide where it goes (pure function).
pub fn route_frame(raw: &str) -> Result<FrameRoute, serde_json::Error> {
    let envelope = Envelope::decode(raw)?;
    let route = match envelope.kind.as_str() {
        HEARTBEAT_ACK => FrameRoute::HeartbeatAck {
            correlation: envelope.correlation().map(str::to_string),
        },
        HEARTBEAT => FrameRoute::HeartbeatRequest {
            correlation: envelope.correlation().map(str::to_string),
        },
        _ => FrameRoute::Application(envelope),
    };
    Ok(route)
}

/// An ordered, independently removable set of secondary listeners.
///
/// Cloning shares the underlying set, so registrations made through a clone
/// are visible to the dispatching side.
#[derive(Clone, Default)]
pub struct ListenerSet {
    inner: Arc<Mutex<ListenerInner>>,
}

#[derive(Default)]
struct ListenerInner {
    next_id: u64,
    order: Vec<u64>,
    entries: HashMap<u64, MessageCallback>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; the returned handle removes it again.
    pub fn add(&self, callback: MessageCallback) -> ListenerHandle {
        let mut inner = self.inner.lock().expect("listener set poisoned");
        let id = inner.next_id;
        inner.next_id += 1;
        inner.order.push(id);
        inner.entries.insert(id, callback);
        ListenerHandle {
            id,
            set: self.clone(),
        }
    }

    fn remove_id(&self, id: u64) {
        let mut inner = self.inner.lock().expect("listener set poisoned");
        inner.order.retain(|&entry| entry != id);
        inner.entries.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("listener set poisoned").order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every listener in registration order.
    ///
    /// Each callback is taken out of the set while it runs and re-inserted
    /// afterwards only if it is still registered, so a listener may remove
    /// itself (or any other) mid-dispatch without deadlock and without being
    /// invoked again for this or later frames.
    pub fn dispatch(&self, envelope: &Envelope) {
        let ids: Vec<u64> = {
            let inner = self.inner.lock().expect("listener set poisoned");
            inner.order.clone()
        };
        for id in ids {
            let taken = {
                let mut inner = self.inner.lock().expect("listener set poisoned");
                inner.entries.remove(&id)
            };
            if let Some(mut callback) = taken {
                callback(envelope);
                let mut inner = self.inner.lock().expect("listener set poisoned");
                if inner.order.contains(&id) {
                    inner.entries.insert(id, callback);
                }
            }
        }
    }
}

/// De-registration handle returned by [`ListenerSet::add`]. Removal is
/// idempotent and safe to call during an active dispatch.
pub struct ListenerHandle {
    id: u64,
    set: ListenerSet,
}

impl ListenerHandle {
    pub fn remove(&self) {
        self.set.remove_id(self.id);
    }
}

/// Fans decoded application envelopes out to the primary handler and the
/// secondary listeners.
pub struct MessageDispatcher {
    label: String,
    primary: MessageCallback,
    listeners: ListenerSet,
}

impl MessageDispatcher {
    pub fn new(label: impl Into<String>, primary: MessageCallback) -> Self {
        Self {
            label: label.into(),
            primary,
            listeners: ListenerSet::new(),
        }
    }

    /// Shared handle for registering secondary listeners.
    pub fn listeners(&self) -> ListenerSet {
        self.listeners.clone()
    }

    /// Forward one application envelope: primary handler first, then
    /// secondary listeners in registration order.
    pub fn dispatch(&mut self, envelope: &Envelope) {
        debug!(room = %self.label, kind = %envelope.kind, "dispatching envelope");
        (self.primary)(envelope);
        self.listeners.dispatch(envelope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn envelope(kind: &str) -> Envelope {
        Envelope::application(kind, Map::new())
    }

    #[test]
    fn test_route_heartbeat_ack() {
        let ack = Envelope::heartbeat_ack(Some("abc".to_string()));
        let raw = ack.encode().unwrap();
        assert_eq!(
            route_frame(&raw).unwrap(),
            FrameRoute::HeartbeatAck {
                correlation: Some("abc".to_string())
            }
        );
    }

    #[test]
    fn test_route_heartbeat_request() {
        let probe = Envelope::heartbeat();
        let raw = probe.encode().unwrap();
        assert!(matches!(
            route_frame(&raw).unwrap(),
            FrameRoute::HeartbeatRequest { correlation: Some(_) }
        ));
    }

    #[test]
    fn test_route_application_passthrough() {
        let raw = envelope("totally_unknown_type").encode().unwrap();
        match route_frame(&raw).unwrap() {
            FrameRoute::Application(env) => assert_eq!(env.kind, "totally_unknown_type"),
            other => panic!("expected Application, got {other:?}"),
        }
    }

    #[test]
    fn test_route_malformed_frame_errors() {
        assert!(route_frame("{{{{").is_err());
    }

    #[test]
    fn test_primary_then_listeners_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));

        let primary_log = log.clone();
        let mut dispatcher = MessageDispatcher::new(
            "room-test",
            Box::new(move |_| primary_log.lock().unwrap().push("primary")),
        );

        let listeners = dispatcher.listeners();
        let log_a = log.clone();
        let _a = listeners.add(Box::new(move |_| log_a.lock().unwrap().push("a")));
        let log_b = log.clone();
        let _b = listeners.add(Box::new(move |_| log_b.lock().unwrap().push("b")));

        dispatcher.dispatch(&envelope("tick"));
        assert_eq!(*log.lock().unwrap(), vec!["primary", "a", "b"]);
    }

    #[test]
    fn test_removal_is_idempotent() {
        let set = ListenerSet::new();
        let handle = set.add(Box::new(|_| {}));
        assert_eq!(set.len(), 1);
        handle.remove();
        handle.remove();
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn test_removal_during_dispatch_skips_listener() {
        let set = ListenerSet::new();
        let calls = Arc::new(AtomicUsize::new(0));

        // First listener removes the second mid-dispatch.
        let set_clone = set.clone();
        let victim_handle: Arc<Mutex<Option<ListenerHandle>>> = Arc::new(Mutex::new(None));
        let victim_slot = victim_handle.clone();
        let _first = set.add(Box::new(move |_| {
            if let Some(handle) = victim_slot.lock().unwrap().take() {
                handle.remove();
            }
            let _ = &set_clone;
        }));

        let victim_calls = calls.clone();
        let victim = set.add(Box::new(move |_| {
            victim_calls.fetch_add(1, Ordering::SeqCst);
        }));
        *victim_handle.lock().unwrap() = Some(victim);

        set.dispatch(&envelope("one"));
        set.dispatch(&envelope("two"));
        assert_eq!(calls.load(Ordering::SeqCst), 0, "removed listener ran");
    }

    #[test]
    fn test_self_removal_during_dispatch() {
        let set = ListenerSet::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let slot: Arc<Mutex<Option<ListenerHandle>>> = Arc::new(Mutex::new(None));
        let my_slot = slot.clone();
        let my_calls = calls.clone();
        let handle = set.add(Box::new(move |_| {
            my_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(handle) = my_slot.lock().unwrap().take() {
                handle.remove();
            }
        }));
        *slot.lock().unwrap() = Some(handle);

        set.dispatch(&envelope("one"));
        set.dispatch(&envelope("two"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(set.is_empty());
    }

    #[test]
    fn test_remaining_listeners_unaffected_by_removal() {
        let set = ListenerSet::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let log_a = log.clone();
        let a = set.add(Box::new(move |_| log_a.lock().unwrap().push("a")));
        let log_b = log.clone();
        let _b = set.add(Box::new(move |_| log_b.lock().unwrap().push("b")));

        a.remove();
        set.dispatch(&envelope("tick"));
        assert_eq!(*log.lock().unwrap(), vec!["b"]);
    }
}
