// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Sync coordinator -- owns the connection lifecycle on the pulling device
// and publishes state transitions for the UI to observe:
//
//   disconnected -> searching -> connecting(peer) -> connected(peer)
//
// `failed(reason)` is reachable from connecting (handshake or pairing
// failure) or from connected (a later operation failure).  Only a failure
// out of `connected` schedules an automatic return to `searching` after
// the configured backoff; a failed first connection stays failed until
// the user acts.  The pending backoff is cancelled promptly by `stop`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tracing::{debug, info, warn};

use vitalsync_core::error::Result;
use vitalsync_core::types::{ConnectionState, DeviceId, SyncOutcome};

use crate::client::SyncClient;
use crate::payload::PairingPayload;

/// Address and identity of one discovered or scanned peer.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Pinned certificate fingerprint, lowercase hex.
    pub fingerprint: String,
    /// Stored bearer token from a previous pairing, if any.
    pub token: Option<String>,
}

/// Drives the [`SyncClient`] through the connection state machine.
pub struct SyncCoordinator {
    client: Arc<SyncClient>,
    backoff: Duration,
    state_tx: watch::Sender<ConnectionState>,
    /// Wakes (and thereby cancels) a pending reconnect sleep.
    reconnect_cancel: Arc<Notify>,
    /// Transition counter; a scheduled reconnect only fires if no newer
    /// transition has superseded it.
    generation: Arc<AtomicU64>,
}

impl SyncCoordinator {
    pub fn new(client: Arc<SyncClient>, backoff: Duration) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            client,
            backoff,
            state_tx,
            reconnect_cancel: Arc::new(Notify::new()),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current state snapshot.
    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Begin looking for peers. Cancels any pending auto-reconnect.
    pub fn start_search(&self) {
        self.transition(ConnectionState::Searching);
    }

    /// Connect to a known peer, resuming its stored token if present.
    pub async fn connect_to(&self, peer: &PeerInfo) -> Result<()> {
        self.transition(ConnectionState::Connecting(peer.name.clone()));

        match self
            .client
            .connect(
                &peer.host,
                peer.port,
                &peer.fingerprint,
                &peer.name,
                peer.token.clone(),
            )
            .await
        {
            Ok(()) => {
                info!(peer = %peer.name, "connected");
                self.transition(ConnectionState::Connected(peer.name.clone()));
                Ok(())
            }
            Err(e) => {
                warn!(peer = %peer.name, error = %e, "connection failed");
                self.fail(e.to_string(), false);
                Err(e)
            }
        }
    }

    /// Pair with a freshly scanned payload, then mark the peer connected.
    pub async fn pair(&self, payload: &PairingPayload, peer_name: &str) -> Result<DeviceId> {
        self.transition(ConnectionState::Connecting(peer_name.to_owned()));

        match self.client.pair_from_payload(payload, peer_name).await {
            Ok(device) => {
                self.transition(ConnectionState::Connected(peer_name.to_owned()));
                Ok(device)
            }
            Err(e) => {
                self.fail(e.to_string(), false);
                Err(e)
            }
        }
    }

    /// Pull all record kinds from the connected peer.
    ///
    /// A failure here came out of `connected`, so the coordinator drops to
    /// `failed(reason)` and schedules the auto-reconnect return to
    /// `searching` after the backoff.
    pub async fn pull(&self) -> Result<SyncOutcome> {
        let was_connected = self.state().is_connected();

        match self.client.pull_all_data().await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.fail(e.to_string(), was_connected);
                Err(e)
            }
        }
    }

    /// Tear everything down: cancel any pending reconnect, drop the
    /// session, return to `disconnected`. Prompt and idempotent.
    pub fn stop(&self) {
        self.client.disconnect();
        self.transition(ConnectionState::Disconnected);
        debug!("coordinator stopped");
    }

    // -- internal -----------------------------------------------------------

    /// Publish a state and invalidate any scheduled reconnect.
    fn transition(&self, state: ConnectionState) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.reconnect_cancel.notify_waiters();
        debug!(?state, "state transition");
        // send_replace updates the value even with no live subscribers.
        self.state_tx.send_replace(state);
    }

    /// Enter `failed(reason)`; when the failure interrupted an established
    /// connection, schedule the automatic return to `searching`.
    fn fail(&self, reason: String, auto_reconnect: bool) {
        self.transition(ConnectionState::Failed(reason));
        if !auto_reconnect {
            return;
        }

        let scheduled_at = self.generation.load(Ordering::SeqCst);
        let generation = Arc::clone(&self.generation);
        let cancel = Arc::clone(&self.reconnect_cancel);
        let state_tx = self.state_tx.clone();
        let backoff = self.backoff;

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {
                    // Only fire if no newer transition superseded us.
                    if generation.load(Ordering::SeqCst) == scheduled_at {
                        debug!("auto-reconnect backoff elapsed, returning to searching");
                        state_tx.send_replace(ConnectionState::Searching);
                    }
                }
                _ = cancel.notified() => {
                    debug!("auto-reconnect cancelled");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryDeviceRegistry, MemorySecretStore};

    fn coordinator(backoff: Duration) -> SyncCoordinator {
        let client = Arc::new(SyncClient::new(
            "Test Laptop",
            Arc::new(MemorySecretStore::new()),
            Arc::new(MemoryDeviceRegistry::new()),
        ));
        SyncCoordinator::new(client, backoff)
    }

    #[tokio::test]
    async fn starts_disconnected_and_searches_on_demand() {
        let coordinator = coordinator(Duration::from_millis(50));
        assert_eq!(coordinator.state(), ConnectionState::Disconnected);

        coordinator.start_search();
        assert_eq!(coordinator.state(), ConnectionState::Searching);

        coordinator.stop();
        assert_eq!(coordinator.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn failed_connect_stays_failed_without_auto_reconnect() {
        let coordinator = coordinator(Duration::from_millis(20));
        coordinator.start_search();

        let peer = PeerInfo {
            name: "Unreachable".into(),
            host: "127.0.0.1".into(),
            port: 1,
            fingerprint: "ab".repeat(32),
            token: None,
        };
        assert!(coordinator.connect_to(&peer).await.is_err());
        assert!(matches!(coordinator.state(), ConnectionState::Failed(_)));

        // A connect failure never schedules the backoff return.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(matches!(coordinator.state(), ConnectionState::Failed(_)));
    }

    #[tokio::test]
    async fn failure_reason_is_preserved() {
        let coordinator = coordinator(Duration::from_millis(20));
        let peer = PeerInfo {
            name: "Unreachable".into(),
            host: "127.0.0.1".into(),
            port: 1,
            fingerprint: "ab".repeat(32),
            token: None,
        };
        let _ = coordinator.connect_to(&peer).await;
        match coordinator.state() {
            ConnectionState::Failed(reason) => assert!(reason.contains("127.0.0.1:1")),
            other => panic!("expected failed state, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failure_from_connected_returns_to_searching_after_backoff() {
        let coordinator = coordinator(Duration::from_millis(20));
        // Force the connected-failure path directly.
        coordinator.transition(ConnectionState::Connected("Peer".into()));
        coordinator.fail("connection reset by peer".into(), true);
        assert!(matches!(coordinator.state(), ConnectionState::Failed(_)));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(coordinator.state(), ConnectionState::Searching);
    }

    #[tokio::test]
    async fn stop_cancels_a_pending_reconnect() {
        let coordinator = coordinator(Duration::from_millis(30));
        coordinator.transition(ConnectionState::Connected("Peer".into()));
        coordinator.fail("connection reset by peer".into(), true);

        coordinator.stop();
        assert_eq!(coordinator.state(), ConnectionState::Disconnected);

        // The cancelled backoff must not drag us back to searching.
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(coordinator.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn observers_see_transitions() {
        let coordinator = coordinator(Duration::from_millis(20));
        let mut rx = coordinator.subscribe();

        coordinator.start_search();
        rx.changed().await.expect("change");
        assert_eq!(*rx.borrow(), ConnectionState::Searching);
    }
}
