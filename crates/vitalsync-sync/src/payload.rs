// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pairing payload -- the five facts a connecting device needs, exchanged
// out of band (QR code, clipboard, typed by hand).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Everything required to reach, verify, and pair with a serving device.
///
/// The fingerprint travels here, outside the TLS channel, which is what
/// makes pinning against it meaningful on first contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingPayload {
    /// Address the server is reachable at (IP or hostname).
    pub host: String,
    pub port: u16,
    /// SHA-256 fingerprint of the server certificate, lowercase hex.
    pub fingerprint: String,
    /// Six-digit one-time pairing code.
    pub code: String,
    /// Unix timestamp (seconds) after which the code is dead.
    pub expiry: i64,
}

impl PairingPayload {
    /// Assemble a payload whose code expires `valid_for` from now.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        fingerprint: impl Into<String>,
        code: impl Into<String>,
        valid_for: Duration,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            fingerprint: fingerprint.into(),
            code: code.into(),
            expiry: Utc::now().timestamp() + valid_for.as_secs() as i64,
        }
    }

    /// Encode for transport. All five fields always present.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Decode a received payload. `None` on malformed JSON or any missing
    /// field; extra fields from newer peers are tolerated.
    pub fn from_json(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    /// Whether the embedded code has expired (by wall clock).
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.expiry
    }

    /// Time until expiry, floored at zero.
    pub fn time_remaining(&self) -> Duration {
        let remaining = self.expiry - Utc::now().timestamp();
        Duration::from_secs(remaining.max(0) as u64)
    }
}
