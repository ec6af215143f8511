//! Test doubles and helpers
//!
//! In-memory transport fakes that let the whole channel lifecycle run
//! without a network, plus small wait helpers for asserting on asynchronous
//! state transitions.

pub mod mocks;

pub use mocks::{FakeConnector, FakeSession, FakeTransport};

use crate::channel::ConnectionState;
use std::time::Duration;
use tokio::sync::watch;

/// Wait until the watch channel reports `target`, or panic after 5 seconds.
pub async fn wait_for_state(rx: &mut watch::Receiver<ConnectionState>, target: ConnectionState) {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|state| *state == target))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for state {target:?}"))
        .unwrap_or_else(|_| panic!("state channel closed waiting for {target:?}"));
}

/// Poll `predicate` until it holds, or panic after 5 seconds.
pub async fn wait_until(description: &str, mut predicate: impl FnMut() -> bool) {
    let deadline = Duration::from_secs(5);
    let result = tokio::time::timeout(deadline, async {
        while !predicate() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    if result.is_err() {
        panic!("timed out waiting until: {description}");
    }
}
