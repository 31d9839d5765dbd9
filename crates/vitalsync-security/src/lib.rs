// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! vitalsync-security — Trust foundation for device-to-device sync.
//!
//! This crate owns everything trust-related on the hosting side: the
//! self-signed TLS identity (hand-assembled X.509 over a ring ECDSA P-256
//! key pair), the DER primitives it is built from, the one-time pairing
//! code and bearer token table, and the in-memory audit trail that observes
//! all of it.

pub mod audit;
pub mod der;
pub mod hashing;
pub mod identity;
pub mod pairing;

// PUBLIC API: Re-export core security primitives
pub use audit::{AuditEntry, AuditEvent, AuditLog};
pub use hashing::{hash_bytes, verify_fingerprint};
pub use identity::{Identity, IdentityService, KeyProvider, RingKeyProvider};
pub use pairing::{PairingCode, PairingService};
