// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pairing state — one-time numeric codes, bearer tokens, and device
// bindings, owned by a single mutex-guarded table.
//
// Concurrency contract: every operation here takes the lock exactly once,
// so callers never observe a half-updated table and a code can only ever be
// redeemed by one winning caller. Code redemption is a remove-if-present
// under that single lock acquisition, never a check followed by a delete.
//
// There are no error returns in this module: invalid input yields `None`
// or `false`.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use tracing::{debug, info, warn};
use vitalsync_core::DeviceId;

/// Number of random bytes behind each bearer token (hex-encoded on issue).
const TOKEN_LEN: usize = 32;

/// A freshly issued pairing code and the token it will redeem into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingCode {
    /// Six-digit numeric string a human can transcribe.
    pub code: String,
    /// The bearer token bound to this code, granted on redemption.
    pub token: String,
    /// Absolute expiry; the code never validates past this instant.
    pub expires_at: DateTime<Utc>,
}

impl PairingCode {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

#[derive(Debug)]
struct CodeEntry {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct PairingState {
    /// Outstanding one-time codes, keyed by the six-digit string.
    codes: HashMap<String, CodeEntry>,
    /// Tokens that have been redeemed and not revoked.
    tokens: HashSet<String>,
    /// Device → token bindings for targeted revocation.
    device_tokens: HashMap<DeviceId, String>,
}

/// Single serialized owner of all pairing and token state.
pub struct PairingService {
    code_lifetime: chrono::Duration,
    rng: SystemRandom,
    state: Mutex<PairingState>,
}

impl PairingService {
    /// Create a service whose codes stay redeemable for `code_lifetime`.
    pub fn new(code_lifetime: Duration) -> Self {
        Self {
            code_lifetime: chrono::Duration::from_std(code_lifetime)
                .unwrap_or_else(|_| chrono::Duration::minutes(5)),
            rng: SystemRandom::new(),
            state: Mutex::new(PairingState::default()),
        }
    }

    /// Issue a fresh six-digit code bound to a fresh random token.
    ///
    /// Multiple codes may be outstanding at once; a collision with an
    /// existing code simply triggers a fresh draw.
    pub fn generate_pairing_code(&self) -> PairingCode {
        let token = self.random_token();
        let expires_at = Utc::now() + self.code_lifetime;

        let mut state = self.state.lock().expect("pairing state lock poisoned");
        let code = loop {
            let candidate = self.random_code();
            if !state.codes.contains_key(&candidate) {
                break candidate;
            }
        };
        state.codes.insert(
            code.clone(),
            CodeEntry {
                token: token.clone(),
                expires_at,
            },
        );

        info!(%code, %expires_at, "pairing code issued");
        PairingCode {
            code,
            token,
            expires_at,
        }
    }

    /// Redeem a code for its bound token. One-time use: the entry is
    /// removed on first lookup whether or not it has expired, so a second
    /// call with the same code always returns `None`.
    pub fn validate_code(&self, code: &str) -> Option<String> {
        let mut state = self.state.lock().expect("pairing state lock poisoned");
        let entry = state.codes.remove(code)?;

        if Utc::now() >= entry.expires_at {
            warn!(%code, "pairing code expired at redemption");
            return None;
        }

        state.tokens.insert(entry.token.clone());
        info!(%code, "pairing code redeemed");
        Some(entry.token)
    }

    /// True iff `token` has been redeemed and not revoked.
    pub fn validate_token(&self, token: &str) -> bool {
        self.state
            .lock()
            .expect("pairing state lock poisoned")
            .tokens
            .contains(token)
    }

    /// Bind a device identifier to a previously issued token so it can be
    /// revoked by device later. Re-binding a device to a new token revokes
    /// its old one.
    pub fn register_device(&self, device: DeviceId, token: &str) {
        let mut state = self.state.lock().expect("pairing state lock poisoned");
        if let Some(old) = state.device_tokens.insert(device, token.to_owned()) {
            if old != token {
                state.tokens.remove(&old);
                debug!(%device, "previous token superseded by re-pairing");
            }
        }
    }

    /// Revoke a single token. Returns whether it was known.
    pub fn revoke_token(&self, token: &str) -> bool {
        let mut state = self.state.lock().expect("pairing state lock poisoned");
        state.device_tokens.retain(|_, bound| bound != token);
        let known = state.tokens.remove(token);
        if known {
            info!("token revoked");
        }
        known
    }

    /// Revoke whatever token is bound to `device`. Returns whether a
    /// binding existed.
    pub fn revoke_device_token(&self, device: DeviceId) -> bool {
        let mut state = self.state.lock().expect("pairing state lock poisoned");
        match state.device_tokens.remove(&device) {
            Some(token) => {
                state.tokens.remove(&token);
                info!(%device, "device token revoked");
                true
            }
            None => false,
        }
    }

    /// Revoke every token and discard every outstanding code.
    pub fn revoke_all(&self) {
        let mut state = self.state.lock().expect("pairing state lock poisoned");
        let tokens = state.tokens.len();
        let codes = state.codes.len();
        state.tokens.clear();
        state.codes.clear();
        state.device_tokens.clear();
        info!(tokens, codes, "all pairings revoked");
    }

    /// Number of outstanding, unexpired codes. Diagnostics only — never
    /// used for authorization decisions.
    pub fn active_code_count(&self) -> usize {
        let now = Utc::now();
        self.state
            .lock()
            .expect("pairing state lock poisoned")
            .codes
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    /// Number of currently valid tokens. Diagnostics only.
    pub fn active_token_count(&self) -> usize {
        self.state
            .lock()
            .expect("pairing state lock poisoned")
            .tokens
            .len()
    }

    // -- internal helpers ---------------------------------------------------

    fn random_code(&self) -> String {
        let mut bytes = [0u8; 4];
        self.rng.fill(&mut bytes).expect("system RNG unavailable");
        let value = u32::from_be_bytes(bytes) % 1_000_000;
        format!("{value:06}")
    }

    fn random_token(&self) -> String {
        let mut bytes = [0u8; TOKEN_LEN];
        self.rng.fill(&mut bytes).expect("system RNG unavailable");
        hex::encode(bytes)
    }
}
