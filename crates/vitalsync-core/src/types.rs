// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the VitalSync sync engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Unique identifier for a paired device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub Uuid);

impl DeviceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a device identifier from its canonical string form.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kinds of personal records a peer can serve.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum RecordKind {
    StepCount,
    HeartRate,
    SleepAnalysis,
    Workout,
    BloodPressure,
}

impl RecordKind {
    /// Wire name used in query strings and JSON envelopes.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::StepCount => "stepCount",
            Self::HeartRate => "heartRate",
            Self::SleepAnalysis => "sleepAnalysis",
            Self::Workout => "workout",
            Self::BloodPressure => "bloodPressure",
        }
    }

    /// Parse a wire name back into a kind.
    pub fn from_wire_name(name: &str) -> Option<Self> {
        match name {
            "stepCount" => Some(Self::StepCount),
            "heartRate" => Some(Self::HeartRate),
            "sleepAnalysis" => Some(Self::SleepAnalysis),
            "workout" => Some(Self::Workout),
            "bloodPressure" => Some(Self::BloodPressure),
            _ => None,
        }
    }

    /// Every kind, in a stable order.
    pub fn all() -> [Self; 5] {
        [
            Self::StepCount,
            Self::HeartRate,
            Self::SleepAnalysis,
            Self::Workout,
            Self::BloodPressure,
        ]
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// A device we have paired with, as durably recorded on the connecting side.
///
/// The raw bearer token is never stored here — only its SHA-256 hash, for
/// auditability. The token itself lives in the secret store collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairedDevice {
    pub id: DeviceId,
    pub name: String,
    /// Self-reported platform string (e.g. "ios", "android").
    pub platform: String,
    /// SHA-256 hex digest of the bearer token.
    pub token_hash: String,
    pub last_seen: DateTime<Utc>,
    /// Last address we reached this device at, as "host:port".
    pub last_address: Option<String>,
}

/// Credential persisted per paired device on the connecting side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerCredential {
    /// Opaque bearer token presented on every authenticated request.
    pub token: String,
    /// Pinned SHA-256 fingerprint (lowercase hex) of the peer's certificate.
    pub fingerprint: String,
}

/// Lifecycle states of the embedded sync server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Connection lifecycle as observed by the sync coordinator on the
/// connecting device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Searching,
    Connecting(String),
    Connected(String),
    Failed(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }
}

/// Result of one full pull: how many items arrived for each record kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub counts: BTreeMap<RecordKind, usize>,
}

impl SyncOutcome {
    /// Total items across all record kinds.
    pub fn total_items(&self) -> usize {
        self.counts.values().sum()
    }
}
