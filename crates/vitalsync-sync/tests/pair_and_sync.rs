// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// End-to-end pairing and sync over real TLS on the loopback interface:
// a server device and a client device in one process, talking through
// actual sockets with fingerprint-pinned handshakes.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use vitalsync_core::config::SyncConfig;
use vitalsync_core::error::VitalSyncError;
use vitalsync_core::types::{ConnectionState, RecordKind};
use vitalsync_security::{AuditLog, IdentityService, PairingService};
use vitalsync_sync::coordinator::{PeerInfo, SyncCoordinator};
use vitalsync_sync::store::{MemoryDeviceRegistry, MemoryRecordStore, MemorySecretStore};
use vitalsync_sync::{SyncClient, SyncServer};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct ServerFixture {
    server: SyncServer,
    audit: Arc<AuditLog>,
}

fn server_fixture() -> ServerFixture {
    let config = SyncConfig {
        device_name: "Server Phone".into(),
        server_port: 0,
        ..SyncConfig::default()
    };

    let records = MemoryRecordStore::new();
    records.set_records(
        RecordKind::StepCount,
        (0..100).map(|i| json!({"date": "2026-08-23", "steps": i * 50})).collect(),
    );
    records.set_records(
        RecordKind::Workout,
        (0..3).map(|i| json!({"kind": "run", "minutes": 20 + i})).collect(),
    );

    let audit = Arc::new(AuditLog::new(256));
    let server = SyncServer::new(
        config,
        Arc::new(IdentityService::new("Server Phone")),
        Arc::new(PairingService::new(Duration::from_secs(300))),
        Arc::clone(&audit),
        Arc::new(records),
    );

    ServerFixture { server, audit }
}

fn client() -> SyncClient {
    SyncClient::new(
        "Client Laptop",
        Arc::new(MemorySecretStore::new()),
        Arc::new(MemoryDeviceRegistry::new()),
    )
}

#[tokio::test]
async fn pair_pull_and_replay_protection() {
    init_tracing();
    let mut fixture = server_fixture();
    fixture.server.start().await.expect("server start");

    let payload = fixture
        .server
        .issue_pairing_payload("127.0.0.1")
        .expect("payload");
    assert!(!payload.is_expired());

    // Pair with the scanned payload and pull everything.
    let client = client();
    client
        .pair_from_payload(&payload, "Server Phone")
        .await
        .expect("pairing");

    let outcome = client.pull_all_data().await.expect("pull");
    assert_eq!(outcome.counts.get(&RecordKind::StepCount), Some(&100));
    assert_eq!(outcome.counts.get(&RecordKind::Workout), Some(&3));
    assert_eq!(outcome.counts.get(&RecordKind::HeartRate), Some(&0));
    assert_eq!(outcome.total_items(), 103);

    // A second redemption of the same one-time code must be rejected.
    let replayer = self::client();
    replayer
        .connect(
            &payload.host,
            payload.port,
            &payload.fingerprint,
            "Server Phone",
            None,
        )
        .await
        .expect("connect");
    match replayer.pair_with_code(&payload.code).await {
        Err(VitalSyncError::PairingRejected(_)) => {}
        other => panic!("replayed code must be rejected, got {other:?}"),
    }

    // Audit saw the whole story.
    let descriptions: Vec<String> = fixture
        .audit
        .all_entries()
        .into_iter()
        .map(|e| e.description)
        .collect();
    assert!(descriptions.iter().any(|d| d.starts_with("Sync server started")));
    assert!(descriptions.contains(&"Pairing succeeded for device \"Client Laptop\"".to_string()));
    assert!(descriptions.contains(&"Data accessed: 100 stepCount item(s)".to_string()));
    assert!(descriptions.iter().any(|d| d.starts_with("Pairing failed")));

    fixture.server.stop().await.expect("server stop");
}

#[tokio::test]
async fn wrong_fingerprint_is_rejected_at_the_handshake() {
    init_tracing();
    let mut fixture = server_fixture();
    fixture.server.start().await.expect("server start");
    let payload = fixture
        .server
        .issue_pairing_payload("127.0.0.1")
        .expect("payload");

    // Flip one hex character of the pinned fingerprint.
    let mut wrong = payload.fingerprint.clone();
    let flipped = if wrong.ends_with('0') { "1" } else { "0" };
    wrong.replace_range(wrong.len() - 1.., flipped);

    let client = client();
    let result = client
        .connect(&payload.host, payload.port, &wrong, "Server Phone", None)
        .await;
    match result {
        Err(VitalSyncError::FingerprintMismatch { expected, actual }) => {
            assert_eq!(expected, wrong);
            assert_eq!(actual, payload.fingerprint);
        }
        other => panic!("expected a fingerprint mismatch, got {other:?}"),
    }
    assert!(!client.is_connected());

    // The correct fingerprint still works on the very next attempt.
    client
        .connect(
            &payload.host,
            payload.port,
            &payload.fingerprint,
            "Server Phone",
            None,
        )
        .await
        .expect("pinned connect");

    fixture.server.stop().await.expect("server stop");
}

#[tokio::test]
async fn forged_token_is_unauthorized_and_audited() {
    init_tracing();
    let mut fixture = server_fixture();
    fixture.server.start().await.expect("server start");
    let payload = fixture
        .server
        .issue_pairing_payload("127.0.0.1")
        .expect("payload");

    let client = client();
    client
        .connect(
            &payload.host,
            payload.port,
            &payload.fingerprint,
            "Server Phone",
            Some("forged-token".into()),
        )
        .await
        .expect("connect");

    match client.pull_all_data().await {
        Err(VitalSyncError::AuthorizationDenied(message)) => {
            assert!(
                message.contains("bearer token"),
                "expected a token refusal, got: {message}"
            );
        }
        other => panic!("expected an authorization failure, got {other:?}"),
    }

    assert!(fixture
        .audit
        .all_entries()
        .iter()
        .any(|e| e.description == "Authorization denied for /api/v1/records"));

    fixture.server.stop().await.expect("server stop");
}

#[tokio::test]
async fn coordinator_tracks_the_full_session() {
    init_tracing();
    let mut fixture = server_fixture();
    fixture.server.start().await.expect("server start");
    let payload = fixture
        .server
        .issue_pairing_payload("127.0.0.1")
        .expect("payload");

    let coordinator = SyncCoordinator::new(Arc::new(client()), Duration::from_millis(50));
    coordinator.start_search();
    assert_eq!(coordinator.state(), ConnectionState::Searching);

    coordinator
        .pair(&payload, "Server Phone")
        .await
        .expect("pair");
    assert_eq!(
        coordinator.state(),
        ConnectionState::Connected("Server Phone".into())
    );

    let outcome = coordinator.pull().await.expect("pull");
    assert_eq!(outcome.total_items(), 103);

    coordinator.stop();
    assert_eq!(coordinator.state(), ConnectionState::Disconnected);

    fixture.server.stop().await.expect("server stop");
}

#[tokio::test]
async fn coordinator_fails_with_reason_on_bad_fingerprint() {
    init_tracing();
    let mut fixture = server_fixture();
    fixture.server.start().await.expect("server start");
    let payload = fixture
        .server
        .issue_pairing_payload("127.0.0.1")
        .expect("payload");

    let mut wrong = payload.fingerprint.clone();
    let flipped = if wrong.ends_with('0') { "1" } else { "0" };
    wrong.replace_range(wrong.len() - 1.., flipped);

    let coordinator = SyncCoordinator::new(Arc::new(client()), Duration::from_millis(50));
    let peer = PeerInfo {
        name: "Server Phone".into(),
        host: payload.host.clone(),
        port: payload.port,
        fingerprint: wrong,
        token: None,
    };
    assert!(coordinator.connect_to(&peer).await.is_err());
    match coordinator.state() {
        ConnectionState::Failed(reason) => {
            assert!(reason.contains("fingerprint mismatch"), "got: {reason}");
        }
        other => panic!("expected failed state, got {other:?}"),
    }

    fixture.server.stop().await.expect("server stop");
}
