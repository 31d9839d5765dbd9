// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for VitalSync.

use thiserror::Error;

/// Top-level error type for all VitalSync operations.
#[derive(Debug, Error)]
pub enum VitalSyncError {
    // -- Identity / certificate errors --
    #[error("identity creation failed: {0}")]
    IdentityCreation(String),

    #[error("key conversion failed: {0}")]
    KeyConversion(String),

    #[error("certificate assembly failed: {0}")]
    Certificate(String),

    // -- Pairing / authorization --
    #[error("pairing rejected: {0}")]
    PairingRejected(String),

    #[error("authorization denied: {0}")]
    AuthorizationDenied(String),

    // -- Server --
    #[error("sync server error: {0}")]
    Server(String),

    // -- Client --
    #[error("sync client error: {0}")]
    Client(String),

    #[error("certificate fingerprint mismatch: expected {expected}, got {actual}")]
    FingerprintMismatch { expected: String, actual: String },

    // -- Discovery advertisement --
    #[error("service advertisement failed: {0}")]
    Discovery(String),

    // -- External collaborators --
    #[error("secret store error: {0}")]
    SecretStore(String),

    #[error("record store error: {0}")]
    RecordStore(String),

    // -- Plumbing --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, VitalSyncError>;
