// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// LAN sync client -- connects to a peer's sync server over TLS pinned to
// a known certificate fingerprint, pairs, and pulls records.
//
// # Trust model
//
// Peer certificates are self-signed, so chain validation is meaningless.
// Instead the client pins the SHA-256 fingerprint learned out of band
// (pairing payload or mDNS TXT record) and rejects any certificate whose
// digest differs, before a single application byte is sent.  Handshake
// signatures are still verified cryptographically against the presented
// certificate's public key.
//
// Each request opens a fresh connection; the server closes after one
// response.  "Connected" is therefore a logical session (address,
// fingerprint, token), not a held socket.

use std::sync::{Arc, Mutex};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use vitalsync_core::error::{Result, VitalSyncError};
use vitalsync_core::types::{DeviceId, PairedDevice, PeerCredential, RecordKind, SyncOutcome};
use vitalsync_security::{hash_bytes, verify_fingerprint};

use crate::http::{HttpRequest, HttpResponse};
use crate::payload::PairingPayload;
use crate::store::{DeviceRegistry, SecretStore};

/// Maximum response bytes accepted from a peer.
const MAX_RESPONSE_BYTES: usize = 8 * 1024 * 1024; // 8 MiB

// ---------------------------------------------------------------------------
// Fingerprint-pinning certificate verifier
// ---------------------------------------------------------------------------

/// Accepts exactly one certificate: the one whose SHA-256 digest matches
/// the pinned fingerprint.  Expiry, hostname, and issuer are ignored on
/// purpose; the digest is the whole trust decision.
#[derive(Debug)]
struct PinnedCertVerifier {
    expected_fingerprint: String,
    /// The last rejection, kept so the caller can recover the structured
    /// error after rustls has collapsed it into a generic handshake failure.
    mismatch: Mutex<Option<VitalSyncError>>,
    provider: Arc<CryptoProvider>,
}

impl PinnedCertVerifier {
    fn new(expected_fingerprint: &str) -> Self {
        Self {
            expected_fingerprint: expected_fingerprint.to_ascii_lowercase(),
            mismatch: Mutex::new(None),
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        }
    }

    /// Consume the recorded rejection, if the last handshake left one.
    fn take_mismatch(&self) -> Option<VitalSyncError> {
        self.mismatch.lock().expect("mismatch slot poisoned").take()
    }
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        match verify_fingerprint(end_entity.as_ref(), &self.expected_fingerprint) {
            Ok(()) => {
                debug!(
                    fingerprint = %self.expected_fingerprint,
                    "peer certificate matched pinned fingerprint"
                );
                Ok(ServerCertVerified::assertion())
            }
            Err(e) => {
                warn!(error = %e, "peer certificate rejected");
                let message = e.to_string();
                *self.mismatch.lock().expect("mismatch slot poisoned") = Some(e);
                Err(rustls::Error::General(message))
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

// ---------------------------------------------------------------------------
// SyncClient
// ---------------------------------------------------------------------------

/// The logical session with one peer.
#[derive(Debug, Clone)]
struct Session {
    host: String,
    port: u16,
    fingerprint: String,
    peer_name: String,
    token: Option<String>,
    peer_device: Option<DeviceId>,
}

/// Client side of the sync protocol.
///
/// Holds at most one logical session at a time.  Credentials for paired
/// peers go to the [`SecretStore`]; pairing metadata to the
/// [`DeviceRegistry`].
pub struct SyncClient {
    device_name: String,
    secrets: Arc<dyn SecretStore>,
    registry: Arc<dyn DeviceRegistry>,
    session: Mutex<Option<Session>>,
}

impl SyncClient {
    pub fn new(
        device_name: impl Into<String>,
        secrets: Arc<dyn SecretStore>,
        registry: Arc<dyn DeviceRegistry>,
    ) -> Self {
        Self {
            device_name: device_name.into(),
            secrets,
            registry,
            session: Mutex::new(None),
        }
    }

    /// Open a logical session with a peer and verify its certificate
    /// against `fingerprint` with a probe handshake.
    ///
    /// Pass the stored token to resume an existing pairing, or `None`
    /// before the first pairing.  Fails fast on an unreachable peer or a
    /// fingerprint mismatch; no session is kept in that case.
    pub async fn connect(
        &self,
        host: &str,
        port: u16,
        fingerprint: &str,
        peer_name: &str,
        token: Option<String>,
    ) -> Result<()> {
        let session = Session {
            host: host.to_owned(),
            port,
            fingerprint: fingerprint.to_ascii_lowercase(),
            peer_name: peer_name.to_owned(),
            token,
            peer_device: None,
        };

        // Probe handshake: connect, verify the pinned certificate, close.
        let stream = open_tls(&session).await?;
        drop(stream);
        info!(host, port, peer = peer_name, "session established");

        *self.session.lock().expect("session lock poisoned") = Some(session);
        Ok(())
    }

    /// Whether a logical session is open.
    pub fn is_connected(&self) -> bool {
        self.session
            .lock()
            .expect("session lock poisoned")
            .is_some()
    }

    /// Drop the logical session. Idempotent.
    pub fn disconnect(&self) {
        if self
            .session
            .lock()
            .expect("session lock poisoned")
            .take()
            .is_some()
        {
            debug!("session dropped");
        }
    }

    /// Redeem a pairing code with the connected peer.
    ///
    /// On success the bearer token is held in the session, the credential
    /// lands in the secret store keyed by the peer's device identifier,
    /// and the registry records the pairing.  Returns the peer device id.
    pub async fn pair_with_code(&self, code: &str) -> Result<DeviceId> {
        let session = self.current_session()?;

        let mut pair_body = json!({
            "code": code,
            "deviceName": self.device_name,
        });
        // Declare the id we were issued before, if any, so the peer
        // supersedes our old token instead of leaving it valid.
        if let Some(device) = session.peer_device {
            pair_body["deviceID"] = json!(device.to_string());
        }

        let request = HttpRequest {
            method: "POST".into(),
            path: "/api/v1/pair".into(),
            query: Default::default(),
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: Some(serde_json::to_vec(&pair_body)?),
        };

        let response = exchange(&session, &request).await?;
        if response.status == 403 {
            return Err(VitalSyncError::PairingRejected(
                "peer rejected pairing code".into(),
            ));
        }
        if response.status != 200 {
            return Err(VitalSyncError::PairingRejected(format!(
                "unexpected pairing response: HTTP {}",
                response.status
            )));
        }

        let body = response
            .json()
            .ok_or_else(|| VitalSyncError::Client("pairing response was not JSON".into()))?;
        let token = body
            .get("token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| VitalSyncError::Client("pairing response missing token".into()))?
            .to_owned();
        let peer_device = body
            .get("deviceID")
            .and_then(|v| v.as_str())
            .and_then(DeviceId::parse)
            .ok_or_else(|| VitalSyncError::Client("pairing response missing deviceID".into()))?;

        self.secrets.save(
            peer_device,
            &PeerCredential {
                token: token.clone(),
                fingerprint: session.fingerprint.clone(),
            },
        )?;

        // Learn the peer's platform now that we are authorized.
        let mut authorized = session.clone();
        authorized.token = Some(token.clone());
        let platform = fetch_platform(&authorized).await.unwrap_or_default();

        self.registry.upsert(PairedDevice {
            id: peer_device,
            name: session.peer_name.clone(),
            platform,
            token_hash: hash_bytes(token.as_bytes()),
            last_seen: chrono::Utc::now(),
            last_address: Some(format!("{}:{}", session.host, session.port)),
        })?;

        let mut guard = self.session.lock().expect("session lock poisoned");
        if let Some(live) = guard.as_mut() {
            live.token = Some(token);
            live.peer_device = Some(peer_device);
        }

        info!(peer = %peer_device, "pairing complete");
        Ok(peer_device)
    }

    /// Convenience: validate a scanned payload, connect, and pair.
    pub async fn pair_from_payload(
        &self,
        payload: &PairingPayload,
        peer_name: &str,
    ) -> Result<DeviceId> {
        if payload.is_expired() {
            return Err(VitalSyncError::PairingRejected(
                "pairing payload has expired".into(),
            ));
        }
        self.connect(
            &payload.host,
            payload.port,
            &payload.fingerprint,
            peer_name,
            None,
        )
        .await?;
        self.pair_with_code(&payload.code).await
    }

    /// Pull every record kind from the connected peer.
    ///
    /// Requires a paired session.  Returns per-kind item counts; a failure
    /// on any kind aborts the pull.
    pub async fn pull_all_data(&self) -> Result<SyncOutcome> {
        let session = self.current_session()?;
        if session.token.is_none() {
            return Err(VitalSyncError::Client(
                "no bearer token: pair before pulling data".into(),
            ));
        }

        let mut outcome = SyncOutcome::default();
        for kind in RecordKind::all() {
            let request = authorized_get(
                &session,
                "/api/v1/records",
                &[("type", kind.wire_name())],
            );
            let response = exchange(&session, &request).await?;
            if response.status == 401 {
                return Err(VitalSyncError::AuthorizationDenied(format!(
                    "peer refused the bearer token while pulling {kind}"
                )));
            }
            if response.status != 200 {
                return Err(VitalSyncError::Client(format!(
                    "pull of {kind} failed: HTTP {}",
                    response.status
                )));
            }

            let body = response
                .json()
                .ok_or_else(|| VitalSyncError::Client("records response was not JSON".into()))?;
            let count = body
                .get("items")
                .and_then(|v| v.as_array())
                .map(|items| items.len())
                .unwrap_or(0);
            outcome.counts.insert(kind, count);
            debug!(kind = %kind, count, "records pulled");
        }

        if let Some(peer_device) = session.peer_device {
            if let Ok(Some(mut device)) = self.registry.get(peer_device) {
                device.last_seen = chrono::Utc::now();
                let _ = self.registry.upsert(device);
            }
        }

        info!(total = outcome.total_items(), "pull complete");
        Ok(outcome)
    }

    fn current_session(&self) -> Result<Session> {
        self.session
            .lock()
            .expect("session lock poisoned")
            .clone()
            .ok_or_else(|| VitalSyncError::Client("not connected to a peer".into()))
    }
}

// ---------------------------------------------------------------------------
// Wire helpers
// ---------------------------------------------------------------------------

fn authorized_get(session: &Session, path: &str, query: &[(&str, &str)]) -> HttpRequest {
    let mut headers = vec![("Host".into(), session.host.clone())];
    if let Some(token) = &session.token {
        headers.push(("Authorization".into(), format!("Bearer {token}")));
    }
    HttpRequest {
        method: "GET".into(),
        path: path.into(),
        query: query
            .iter()
            .map(|&(k, v)| (k.to_owned(), v.to_owned()))
            .collect(),
        headers,
        body: None,
    }
}

/// GET /api/v1/status and extract the peer's platform string.
async fn fetch_platform(session: &Session) -> Option<String> {
    let request = authorized_get(session, "/api/v1/status", &[]);
    let response = exchange(session, &request).await.ok()?;
    response
        .json()?
        .get("platform")?
        .as_str()
        .map(str::to_owned)
}

/// Open a TCP connection and complete a pinned TLS handshake.
async fn open_tls(
    session: &Session,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>> {
    let verifier = Arc::new(PinnedCertVerifier::new(&session.fingerprint));
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(verifier.clone())
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));

    let address = format!("{}:{}", session.host, session.port);
    let tcp = TcpStream::connect(&address)
        .await
        .map_err(|e| VitalSyncError::Client(format!("connect {address}: {e}")))?;

    let server_name = ServerName::try_from(session.host.clone())
        .map_err(|e| VitalSyncError::Client(format!("invalid peer name {}: {e}", session.host)))?;

    connector.connect(server_name, tcp).await.map_err(|e| {
        // Surface a pinning rejection as the structured mismatch error
        // rather than the flattened rustls message.
        verifier
            .take_mismatch()
            .unwrap_or_else(|| VitalSyncError::Client(format!("TLS handshake with {address}: {e}")))
    })
}

/// One request, one response, one connection.
async fn exchange(session: &Session, request: &HttpRequest) -> Result<HttpResponse> {
    let mut tls = open_tls(session).await?;

    tls.write_all(&request.serialize())
        .await
        .map_err(|e| VitalSyncError::Client(format!("write request: {e}")))?;
    tls.flush()
        .await
        .map_err(|e| VitalSyncError::Client(format!("flush request: {e}")))?;

    // The server writes one response and closes the connection.
    let mut raw = Vec::with_capacity(4096);
    let mut limited = (&mut tls).take(MAX_RESPONSE_BYTES as u64);
    limited
        .read_to_end(&mut raw)
        .await
        .map_err(|e| VitalSyncError::Client(format!("read response: {e}")))?;

    HttpResponse::parse(&raw)
        .ok_or_else(|| VitalSyncError::Client("malformed response from peer".into()))
}
