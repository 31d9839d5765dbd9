// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Embedded HTTPS sync server -- makes this device serve its records to
// paired peers on the local network.
//
// The server listens on a configurable TCP port (0 = OS-assigned) and
// speaks one HTTP/1.1 request per TLS connection.  TLS terminates on the
// device's self-signed identity certificate; clients authenticate it by
// fingerprint pinning, never by chain validation.
//
// # Routes
//
//   - POST /api/v1/pair      exempt from auth; redeems a one-time code
//   - GET  /api/v1/records   bearer-token gated; serves one record kind
//   - GET  /api/v1/status    bearer-token gated; device info
//
// Authorization failures answer 401; a rejected pairing answers 403.
// Every request, grant, denial, and data access lands in the audit log.
//
// # mDNS advertisement
//
// On start the server registers `_vitalsync._tcp.local.` via mDNS-SD so
// peers on the LAN can discover it without typing addresses.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use vitalsync_core::config::SyncConfig;
use vitalsync_core::error::{Result, VitalSyncError};
use vitalsync_core::types::{DeviceId, RecordKind, ServerStatus};
use vitalsync_security::{AuditEvent, AuditLog, IdentityService, PairingService};

use crate::http::{self, HttpRequest, HttpResponse};
use crate::payload::PairingPayload;
use crate::store::RecordStore;

/// Maximum bytes to read from a connection before rejecting it.
/// Prevents unbounded memory consumption from misbehaving clients.
const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1 MiB

/// mDNS service type peers browse for.
const SERVICE_TYPE: &str = "_vitalsync._tcp.local.";

/// Advisory token lifetime reported to pairing clients.  Tokens actually
/// live until revoked; clients that track expiry re-pair after this long.
const TOKEN_EXPIRES_IN_SECS: u64 = 60 * 60 * 24 * 365;

const PAIR_PATH: &str = "/api/v1/pair";
const RECORDS_PATH: &str = "/api/v1/records";
const STATUS_PATH: &str = "/api/v1/status";

// ---------------------------------------------------------------------------
// Shared state passed to connection handlers
// ---------------------------------------------------------------------------

/// State shared across all connection-handling tasks.
struct SharedState {
    device_name: String,
    pairing: Arc<PairingService>,
    audit: Arc<AuditLog>,
    records: Arc<dyn RecordStore>,
    /// Counter of active connections (for the UI).
    active_connections: Arc<AtomicU32>,
}

// ---------------------------------------------------------------------------
// SyncServer
// ---------------------------------------------------------------------------

/// Embedded sync server.
///
/// Binds a TLS-wrapped TCP listener and serves pairing and record-pull
/// requests from other devices.  Created in `Stopped` state; call
/// [`SyncServer::start`] to begin accepting connections.
pub struct SyncServer {
    config: SyncConfig,
    /// Current lifecycle state of the server.
    status: ServerStatus,
    /// The port actually bound, known once running.
    bound_port: Option<u16>,
    /// Notification handle used to signal a graceful shutdown.
    shutdown_signal: Arc<Notify>,
    /// Handle to the Tokio task running the accept loop.
    task_handle: Option<JoinHandle<()>>,
    /// Counter of currently active TLS connections.
    active_connections: Arc<AtomicU32>,
    /// Handle to the mDNS daemon for service advertisement.
    mdns_daemon: Option<mdns_sd::ServiceDaemon>,
    /// The mDNS service fullname (for unregistration on stop).
    mdns_fullname: Option<String>,

    identity: Arc<IdentityService>,
    pairing: Arc<PairingService>,
    audit: Arc<AuditLog>,
    records: Arc<dyn RecordStore>,
}

impl SyncServer {
    pub fn new(
        config: SyncConfig,
        identity: Arc<IdentityService>,
        pairing: Arc<PairingService>,
        audit: Arc<AuditLog>,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            config,
            status: ServerStatus::Stopped,
            bound_port: None,
            shutdown_signal: Arc::new(Notify::new()),
            task_handle: None,
            active_connections: Arc::new(AtomicU32::new(0)),
            mdns_daemon: None,
            mdns_fullname: None,
            identity,
            pairing,
            audit,
            records,
        }
    }

    /// Return the current server status.
    pub fn status(&self) -> ServerStatus {
        self.status
    }

    /// The bound port, once running.
    pub fn port(&self) -> Option<u16> {
        self.bound_port
    }

    /// Return the number of currently active client connections.
    pub fn active_connections(&self) -> u32 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Start the sync server.
    ///
    /// Generates (or reuses) the TLS identity, binds a listener on
    /// `0.0.0.0:{port}` (0 lets the OS pick), registers mDNS, and spawns
    /// the accept loop.  Returns the bound port.
    ///
    /// # Errors
    ///
    /// Returns an error if identity generation fails or the port is
    /// already in use; the server is left in `Stopped` state.
    pub async fn start(&mut self) -> Result<u16> {
        if self.status == ServerStatus::Running {
            debug!("sync server already running");
            return self
                .bound_port
                .ok_or_else(|| VitalSyncError::Server("running with no bound port".into()));
        }

        self.status = ServerStatus::Starting;

        match self.start_inner().await {
            Ok(port) => {
                self.status = ServerStatus::Running;
                self.audit.log(AuditEvent::ServerStarted { port });
                Ok(port)
            }
            Err(e) => {
                self.status = ServerStatus::Stopped;
                Err(e)
            }
        }
    }

    async fn start_inner(&mut self) -> Result<u16> {
        let identity = self.identity.identity()?;

        let tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![identity.certificate_der()], identity.private_key_der())
            .map_err(|e| VitalSyncError::Server(format!("TLS config: {e}")))?;
        let acceptor = TlsAcceptor::from(Arc::new(tls_config));

        let bind_addr: SocketAddr = ([0, 0, 0, 0], self.config.server_port).into();
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| VitalSyncError::Server(format!("bind {bind_addr}: {e}")))?;
        let port = listener
            .local_addr()
            .map_err(|e| VitalSyncError::Server(format!("local_addr: {e}")))?
            .port();

        info!(port, fingerprint = %identity.fingerprint(), "sync server listening");
        self.bound_port = Some(port);

        // Advertise on the LAN so peers discover us.
        self.register_mdns(port, identity.fingerprint());

        let shared = Arc::new(SharedState {
            device_name: self.config.device_name.clone(),
            pairing: Arc::clone(&self.pairing),
            audit: Arc::clone(&self.audit),
            records: Arc::clone(&self.records),
            active_connections: Arc::clone(&self.active_connections),
        });

        let shutdown = Arc::clone(&self.shutdown_signal);
        let handle = tokio::spawn(async move {
            accept_loop(listener, acceptor, shutdown, shared).await;
        });
        self.task_handle = Some(handle);

        Ok(port)
    }

    /// Gracefully stop the server.
    ///
    /// Signals the accept loop to exit and awaits its completion.
    /// Connections mid-request are allowed to finish.  Stopping a server
    /// that is not running is a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        if self.status != ServerStatus::Running {
            return Ok(());
        }

        self.status = ServerStatus::Stopping;
        info!(port = ?self.bound_port, "stopping sync server");

        self.unregister_mdns();
        self.shutdown_signal.notify_one();

        if let Some(handle) = self.task_handle.take() {
            handle
                .await
                .map_err(|e| VitalSyncError::Server(format!("task join: {e}")))?;
        }

        self.status = ServerStatus::Stopped;
        self.bound_port = None;
        self.audit.log(AuditEvent::ServerStopped);
        info!("sync server stopped");
        Ok(())
    }

    /// Mint a one-time pairing code and wrap it with everything the peer
    /// needs to reach and verify this server.  Requires `Running`.
    pub fn issue_pairing_payload(&self, host: &str) -> Result<PairingPayload> {
        let port = match (self.status, self.bound_port) {
            (ServerStatus::Running, Some(port)) => port,
            _ => {
                return Err(VitalSyncError::Server(
                    "pairing payload requires a running server".into(),
                ));
            }
        };

        let fingerprint = self.identity.fingerprint()?;
        let issued = self.pairing.generate_pairing_code();
        Ok(PairingPayload::new(
            host,
            port,
            fingerprint,
            issued.code,
            self.config.pairing_code_lifetime(),
        ))
    }

    /// Register this device via mDNS-SD as `_vitalsync._tcp.local.`.
    ///
    /// If mDNS registration fails we log a warning but do not fail the
    /// server start -- peers can still connect via a scanned payload.
    fn register_mdns(&mut self, port: u16, fingerprint: &str) {
        let daemon = match mdns_sd::ServiceDaemon::new() {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "failed to create mDNS daemon for advertisement");
                return;
            }
        };

        let properties = [
            ("txtvers", "1"),
            ("device", self.config.device_name.as_str()),
            ("fp", fingerprint),
        ];

        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "vitalsync".into());

        match mdns_sd::ServiceInfo::new(
            SERVICE_TYPE,
            &self.config.device_name,
            &format!("{hostname}.local."),
            "", // empty = auto-detect IP
            port,
            &properties[..],
        ) {
            Ok(service_info) => {
                let fullname = service_info.get_fullname().to_owned();
                match daemon.register(service_info) {
                    Ok(_) => {
                        info!(
                            service_type = SERVICE_TYPE,
                            name = %self.config.device_name,
                            port,
                            "mDNS service registered"
                        );
                        self.mdns_fullname = Some(fullname);
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to register mDNS service");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to create mDNS ServiceInfo");
            }
        }

        self.mdns_daemon = Some(daemon);
    }

    /// Unregister the mDNS service and shut down the daemon.
    fn unregister_mdns(&mut self) {
        if let Some(daemon) = self.mdns_daemon.take() {
            if let Some(fullname) = self.mdns_fullname.take() {
                match daemon.unregister(&fullname) {
                    Ok(_) => {
                        info!(name = %fullname, "mDNS service unregistered");
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to unregister mDNS service");
                    }
                }
            }
            if let Err(e) = daemon.shutdown() {
                warn!(error = %e, "failed to shut down mDNS daemon");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Accept loop and connection handling
// ---------------------------------------------------------------------------

/// Runs until the shutdown signal is received.  Each incoming connection
/// is handed off to [`handle_connection`] in a separate task.
async fn accept_loop(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    shutdown: Arc<Notify>,
    shared: Arc<SharedState>,
) {
    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                debug!("accept loop received shutdown signal");
                break;
            }

            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        debug!(peer = %peer_addr, "incoming sync connection");
                        let state = Arc::clone(&shared);
                        let acceptor = acceptor.clone();
                        tokio::spawn(async move {
                            state.active_connections.fetch_add(1, Ordering::Relaxed);
                            if let Err(e) =
                                handle_connection(stream, peer_addr, acceptor, &state).await
                            {
                                warn!(peer = %peer_addr, error = %e, "connection handler error");
                            }
                            state.active_connections.fetch_sub(1, Ordering::Relaxed);
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                    }
                }
            }
        }
    }
}

/// Handle a single incoming connection: TLS handshake, read one complete
/// HTTP request, route it, write the response, close.
///
/// A handshake or framing failure closes the connection without touching
/// the rest of the server.
async fn handle_connection(
    stream: tokio::net::TcpStream,
    peer_addr: SocketAddr,
    acceptor: TlsAcceptor,
    state: &SharedState,
) -> Result<()> {
    let mut tls = match acceptor.accept(stream).await {
        Ok(tls) => tls,
        Err(e) => {
            debug!(peer = %peer_addr, error = %e, "TLS handshake failed");
            return Ok(());
        }
    };

    let raw = match read_complete_message(&mut tls, peer_addr).await? {
        Some(raw) => raw,
        None => {
            debug!(peer = %peer_addr, "connection closed before a request arrived");
            return Ok(());
        }
    };

    let response = match HttpRequest::parse(&raw) {
        Some(request) => route(state, &request, peer_addr),
        None => {
            warn!(peer = %peer_addr, bytes = raw.len(), "malformed HTTP request");
            HttpResponse::json_error(400, "malformed request")
        }
    };

    tls.write_all(&response.serialize())
        .await
        .map_err(|e| VitalSyncError::Server(format!("write to {peer_addr}: {e}")))?;
    tls.flush()
        .await
        .map_err(|e| VitalSyncError::Server(format!("flush to {peer_addr}: {e}")))?;
    let _ = tls.shutdown().await;

    Ok(())
}

/// Read until a complete HTTP message (head plus declared body) has
/// arrived.  `Ok(None)` when the peer closed before sending anything.
async fn read_complete_message<S>(stream: &mut S, peer_addr: SocketAddr) -> Result<Option<Vec<u8>>>
where
    S: tokio::io::AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    loop {
        if let Some(total) = http::message_length(&buf) {
            buf.truncate(total);
            return Ok(Some(buf));
        }
        if buf.len() > MAX_REQUEST_BYTES {
            return Err(VitalSyncError::Server(format!(
                "request from {peer_addr} exceeds {MAX_REQUEST_BYTES} bytes"
            )));
        }

        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| VitalSyncError::Server(format!("read from {peer_addr}: {e}")))?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(VitalSyncError::Server(format!(
                "connection from {peer_addr} closed mid-request"
            )));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Route a parsed request to its handler, enforcing the auth gate.
///
/// Pairing is the only route reachable without a bearer token; everything
/// else answers 401 until a valid token is presented.
fn route(state: &SharedState, request: &HttpRequest, peer_addr: SocketAddr) -> HttpResponse {
    state.audit.log(AuditEvent::RequestReceived {
        method: request.method.clone(),
        path: request.path.clone(),
        peer: peer_addr.to_string(),
    });

    if request.method == "POST" && request.path == PAIR_PATH {
        return handle_pair(state, request, peer_addr);
    }

    // Auth gate for every other route.
    let authorized = request
        .bearer_token()
        .is_some_and(|token| state.pairing.validate_token(token));
    if !authorized {
        state.audit.log(AuditEvent::AuthorizationDenied {
            path: request.path.clone(),
        });
        warn!(peer = %peer_addr, path = %request.path, "request without valid token");
        return HttpResponse::json_error(401, "missing or invalid bearer token");
    }
    state.audit.log(AuditEvent::AuthorizationGranted {
        path: request.path.clone(),
    });

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", RECORDS_PATH) => handle_records(state, request),
        ("GET", STATUS_PATH) => handle_status(state),
        _ => HttpResponse::json_error(404, "no such route"),
    }
}

/// POST /api/v1/pair -- redeem a one-time code for a bearer token.
///
/// Body: `{"code": "123456", "deviceName": "...", "deviceID": "..."}`,
/// where `deviceID` is optional: a re-pairing device presents the id it
/// was issued before so the fresh token supersedes its old one instead of
/// leaving both valid.  Responds 403 on an unknown, expired, or
/// already-consumed code; the reason is logged and audited but never
/// detailed to the peer.
fn handle_pair(state: &SharedState, request: &HttpRequest, peer_addr: SocketAddr) -> HttpResponse {
    let body: serde_json::Value = match request
        .body
        .as_deref()
        .and_then(|b| serde_json::from_slice(b).ok())
    {
        Some(body) => body,
        None => {
            state.audit.log(AuditEvent::PairingFailed {
                reason: "malformed pairing request body".into(),
            });
            return HttpResponse::json_error(400, "malformed pairing request");
        }
    };

    let code = match body.get("code").and_then(|v| v.as_str()) {
        Some(code) => code,
        None => {
            state.audit.log(AuditEvent::PairingFailed {
                reason: "pairing request missing code".into(),
            });
            return HttpResponse::json_error(400, "missing pairing code");
        }
    };
    let device_name = body
        .get("deviceName")
        .and_then(|v| v.as_str())
        .unwrap_or("unnamed device")
        .to_owned();

    let token = match state.pairing.validate_code(code) {
        Some(token) => token,
        None => {
            state.audit.log(AuditEvent::PairingFailed {
                reason: format!("code rejected for peer {peer_addr}"),
            });
            warn!(peer = %peer_addr, "pairing code rejected");
            return HttpResponse::json_error(403, "invalid or expired pairing code");
        }
    };

    let device_id = body
        .get("deviceID")
        .and_then(|v| v.as_str())
        .and_then(DeviceId::parse)
        .unwrap_or_else(DeviceId::new);
    state.pairing.register_device(device_id, &token);
    state.audit.log(AuditEvent::PairingSucceeded {
        device_name: device_name.clone(),
    });
    info!(peer = %peer_addr, device = %device_id, name = %device_name, "device paired");

    HttpResponse::json_ok(&json!({
        "success": true,
        "token": token,
        "deviceID": device_id.to_string(),
        "expiresIn": TOKEN_EXPIRES_IN_SECS,
    }))
}

/// GET /api/v1/records?type=stepCount&limit=100 -- serve one record kind.
fn handle_records(state: &SharedState, request: &HttpRequest) -> HttpResponse {
    let kind = match request
        .query
        .get("type")
        .and_then(|name| RecordKind::from_wire_name(name))
    {
        Some(kind) => kind,
        None => return HttpResponse::json_error(400, "missing or unknown record type"),
    };

    let limit = match request.query.get("limit") {
        Some(raw) => match raw.parse::<usize>() {
            Ok(limit) => Some(limit),
            Err(_) => return HttpResponse::json_error(400, "limit must be a non-negative integer"),
        },
        None => None,
    };

    let items = match state.records.fetch(kind, limit) {
        Ok(items) => items,
        Err(e) => {
            error!(kind = %kind, error = %e, "record store fetch failed");
            return HttpResponse::json_error(500, "record store unavailable");
        }
    };

    state.audit.log(AuditEvent::DataAccessed {
        resource: kind.wire_name().into(),
        count: items.len(),
    });
    debug!(kind = %kind, count = items.len(), "records served");

    HttpResponse::json_ok(&json!({
        "success": true,
        "type": kind.wire_name(),
        "count": items.len(),
        "items": items,
    }))
}

/// GET /api/v1/status -- device info for paired peers.
fn handle_status(state: &SharedState) -> HttpResponse {
    let kinds: Vec<&str> = state
        .records
        .kinds()
        .into_iter()
        .map(|k| k.wire_name())
        .collect();
    HttpResponse::json_ok(&json!({
        "success": true,
        "deviceName": state.device_name,
        "platform": std::env::consts::OS,
        "recordKinds": kinds,
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRecordStore;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    fn test_state() -> SharedState {
        let records = MemoryRecordStore::new();
        records.set_records(
            RecordKind::StepCount,
            (0..5).map(|i| json!({"steps": i * 1000})).collect(),
        );
        SharedState {
            device_name: "Test Phone".into(),
            pairing: Arc::new(PairingService::new(Duration::from_secs(300))),
            audit: Arc::new(AuditLog::new(64)),
            records: Arc::new(records),
            active_connections: Arc::new(AtomicU32::new(0)),
        }
    }

    fn peer() -> SocketAddr {
        "192.168.1.20:50000".parse().expect("addr")
    }

    fn get(path: &str, query: &[(&str, &str)], token: Option<&str>) -> HttpRequest {
        let mut headers = Vec::new();
        if let Some(token) = token {
            headers.push(("Authorization".into(), format!("Bearer {token}")));
        }
        HttpRequest {
            method: "GET".into(),
            path: path.into(),
            query: query
                .iter()
                .map(|&(k, v)| (k.to_owned(), v.to_owned()))
                .collect::<HashMap<_, _>>(),
            headers,
            body: None,
        }
    }

    fn pair_request(code: &str) -> HttpRequest {
        HttpRequest {
            method: "POST".into(),
            path: PAIR_PATH.into(),
            query: HashMap::new(),
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: Some(
                serde_json::to_vec(&json!({"code": code, "deviceName": "Test Laptop"}))
                    .expect("encode"),
            ),
        }
    }

    /// Run the full pair flow against `state` and return the issued token.
    fn pair(state: &SharedState) -> String {
        let issued = state.pairing.generate_pairing_code();
        let response = route(state, &pair_request(&issued.code), peer());
        assert_eq!(response.status, 200);
        response.json().expect("json")["token"]
            .as_str()
            .expect("token")
            .to_owned()
    }

    #[test]
    fn pairing_issues_token_and_device_id() {
        let state = test_state();
        let issued = state.pairing.generate_pairing_code();
        let response = route(&state, &pair_request(&issued.code), peer());

        assert_eq!(response.status, 200);
        let body = response.json().expect("json");
        assert_eq!(body["success"], true);
        assert_eq!(body["token"], issued.token.as_str());
        assert!(DeviceId::parse(body["deviceID"].as_str().expect("id")).is_some());

        // The token now passes the auth gate.
        assert!(state.pairing.validate_token(&issued.token));
    }

    #[test]
    fn replayed_code_is_forbidden() {
        let state = test_state();
        let issued = state.pairing.generate_pairing_code();

        assert_eq!(route(&state, &pair_request(&issued.code), peer()).status, 200);
        let replay = route(&state, &pair_request(&issued.code), peer());
        assert_eq!(replay.status, 403);

        let descriptions: Vec<String> = state
            .audit
            .all_entries()
            .into_iter()
            .map(|e| e.description)
            .collect();
        assert!(descriptions.iter().any(|d| d.starts_with("Pairing failed")));
    }

    #[test]
    fn repairing_with_device_id_supersedes_the_old_token() {
        let state = test_state();

        let first = state.pairing.generate_pairing_code();
        let body = route(&state, &pair_request(&first.code), peer())
            .json()
            .expect("json");
        let first_token = body["token"].as_str().expect("token").to_owned();
        let device_id = body["deviceID"].as_str().expect("id").to_owned();

        // Second pairing declares the id it was issued the first time.
        let second = state.pairing.generate_pairing_code();
        let mut request = pair_request(&second.code);
        request.body = Some(
            serde_json::to_vec(&json!({
                "code": second.code,
                "deviceName": "Test Laptop",
                "deviceID": device_id,
            }))
            .expect("encode"),
        );
        let response = route(&state, &request, peer());
        assert_eq!(response.status, 200);
        let body = response.json().expect("json");
        assert_eq!(body["deviceID"], device_id.as_str());

        let second_token = body["token"].as_str().expect("token");
        assert!(
            !state.pairing.validate_token(&first_token),
            "the superseded token must stop validating"
        );
        assert!(state.pairing.validate_token(second_token));
    }

    #[test]
    fn unknown_code_is_forbidden_not_unauthorized() {
        let state = test_state();
        let response = route(&state, &pair_request("000000"), peer());
        assert_eq!(response.status, 403);
    }

    #[test]
    fn malformed_pair_body_is_bad_request() {
        let state = test_state();
        let mut request = pair_request("123456");
        request.body = Some(b"not json".to_vec());
        assert_eq!(route(&state, &request, peer()).status, 400);

        request.body = Some(b"{}".to_vec());
        assert_eq!(route(&state, &request, peer()).status, 400);
    }

    #[test]
    fn records_require_a_valid_token() {
        let state = test_state();

        // No token at all.
        let response = route(
            &state,
            &get(RECORDS_PATH, &[("type", "stepCount")], None),
            peer(),
        );
        assert_eq!(response.status, 401);

        // A made-up token.
        let response = route(
            &state,
            &get(RECORDS_PATH, &[("type", "stepCount")], Some("forged")),
            peer(),
        );
        assert_eq!(response.status, 401);

        let denied = state
            .audit
            .all_entries()
            .into_iter()
            .filter(|e| e.description.starts_with("Authorization denied"))
            .count();
        assert_eq!(denied, 2);
    }

    #[test]
    fn records_served_with_valid_token_and_audited() {
        let state = test_state();
        let token = pair(&state);

        let response = route(
            &state,
            &get(RECORDS_PATH, &[("type", "stepCount")], Some(&token)),
            peer(),
        );
        assert_eq!(response.status, 200);
        let body = response.json().expect("json");
        assert_eq!(body["count"], 5);
        assert_eq!(body["items"].as_array().expect("items").len(), 5);

        assert!(state
            .audit
            .all_entries()
            .iter()
            .any(|e| e.description == "Data accessed: 5 stepCount item(s)"));
    }

    #[test]
    fn record_limit_is_applied() {
        let state = test_state();
        let token = pair(&state);

        let response = route(
            &state,
            &get(
                RECORDS_PATH,
                &[("type", "stepCount"), ("limit", "2")],
                Some(&token),
            ),
            peer(),
        );
        assert_eq!(response.json().expect("json")["count"], 2);

        let response = route(
            &state,
            &get(
                RECORDS_PATH,
                &[("type", "stepCount"), ("limit", "junk")],
                Some(&token),
            ),
            peer(),
        );
        assert_eq!(response.status, 400);
    }

    #[test]
    fn unknown_record_type_is_bad_request() {
        let state = test_state();
        let token = pair(&state);
        let response = route(
            &state,
            &get(RECORDS_PATH, &[("type", "bloodType")], Some(&token)),
            peer(),
        );
        assert_eq!(response.status, 400);
    }

    #[test]
    fn empty_kind_serves_empty_list() {
        let state = test_state();
        let token = pair(&state);
        let response = route(
            &state,
            &get(RECORDS_PATH, &[("type", "workout")], Some(&token)),
            peer(),
        );
        assert_eq!(response.status, 200);
        assert_eq!(response.json().expect("json")["count"], 0);
    }

    #[test]
    fn status_route_reports_device_info() {
        let state = test_state();
        let token = pair(&state);
        let response = route(&state, &get(STATUS_PATH, &[], Some(&token)), peer());
        assert_eq!(response.status, 200);
        let body = response.json().expect("json");
        assert_eq!(body["deviceName"], "Test Phone");
        assert_eq!(body["recordKinds"].as_array().expect("kinds").len(), 5);
    }

    #[test]
    fn unknown_route_is_not_found() {
        let state = test_state();
        let token = pair(&state);
        let response = route(&state, &get("/api/v1/nothing", &[], Some(&token)), peer());
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn server_lifecycle_and_pairing_payload() {
        let config = SyncConfig {
            device_name: "Lifecycle Phone".into(),
            server_port: 0,
            ..SyncConfig::default()
        };
        let audit = Arc::new(AuditLog::new(16));
        let mut server = SyncServer::new(
            config,
            Arc::new(IdentityService::new("Lifecycle Phone")),
            Arc::new(PairingService::new(Duration::from_secs(300))),
            Arc::clone(&audit),
            Arc::new(MemoryRecordStore::new()),
        );

        assert_eq!(server.status(), ServerStatus::Stopped);
        assert!(server.issue_pairing_payload("127.0.0.1").is_err());

        let port = server.start().await.expect("start");
        assert!(port > 0);
        assert_eq!(server.status(), ServerStatus::Running);

        let payload = server.issue_pairing_payload("127.0.0.1").expect("payload");
        assert_eq!(payload.port, port);
        assert_eq!(payload.fingerprint.len(), 64);
        assert!(!payload.is_expired());

        server.stop().await.expect("stop");
        assert_eq!(server.status(), ServerStatus::Stopped);
        // Stopping again is a no-op.
        server.stop().await.expect("stop again");

        let descriptions: Vec<String> = audit
            .all_entries()
            .into_iter()
            .map(|e| e.description)
            .collect();
        assert!(descriptions.contains(&format!("Sync server started on port {port}")));
        assert!(descriptions.contains(&"Sync server stopped".to_string()));
    }
}
