// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Audit trail — bounded in-memory log of every security-relevant event.
//
// Entries live in a fixed-capacity ring buffer with strict FIFO eviction
// and are never written to durable storage: the log is scoped to the
// process lifetime by design. Entries are immutable once appended.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

/// The closed set of security-relevant events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AuditEvent {
    RequestReceived { method: String, path: String, peer: String },
    PairingSucceeded { device_name: String },
    PairingFailed { reason: String },
    AuthorizationGranted { path: String },
    AuthorizationDenied { path: String },
    DataAccessed { resource: String, count: usize },
    ServerStarted { port: u16 },
    ServerStopped,
    TokenRevoked { device: Option<String> },
    Custom(String),
}

impl AuditEvent {
    /// Render the human-readable description stored with the entry.
    pub fn description(&self) -> String {
        match self {
            Self::RequestReceived { method, path, peer } => {
                format!("Request received: {method} {path} from {peer}")
            }
            Self::PairingSucceeded { device_name } => {
                format!("Pairing succeeded for device \"{device_name}\"")
            }
            Self::PairingFailed { reason } => format!("Pairing failed: {reason}"),
            Self::AuthorizationGranted { path } => {
                format!("Authorization granted for {path}")
            }
            Self::AuthorizationDenied { path } => {
                format!("Authorization denied for {path}")
            }
            Self::DataAccessed { resource, count } => {
                format!("Data accessed: {count} {resource} item(s)")
            }
            Self::ServerStarted { port } => format!("Sync server started on port {port}"),
            Self::ServerStopped => "Sync server stopped".into(),
            Self::TokenRevoked { device } => match device {
                Some(device) => format!("Token revoked for device {device}"),
                None => "Token revoked".into(),
            },
            Self::Custom(text) => text.clone(),
        }
    }
}

/// A single immutable entry in the audit log.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    /// Precomputed human-readable description.
    pub description: String,
}

/// Append-only, size-bounded audit log.
pub struct AuditLog {
    capacity: usize,
    entries: Mutex<VecDeque<AuditEntry>>,
}

impl AuditLog {
    /// Create a log holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Append an event, evicting the oldest entry once full.
    pub fn log(&self, event: AuditEvent) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            description: event.description(),
            event,
        };
        debug!(description = %entry.description, "audit entry recorded");

        let mut entries = self.entries.lock().expect("audit log lock poisoned");
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Snapshot of every entry, oldest first.
    pub fn all_entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .expect("audit log lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Snapshot of at most `count` entries from the tail, in insertion order.
    pub fn recent_entries(&self, count: usize) -> Vec<AuditEntry> {
        let entries = self.entries.lock().expect("audit log lock poisoned");
        let skip = entries.len().saturating_sub(count);
        entries.iter().skip(skip).cloned().collect()
    }

    /// Empty the log.
    pub fn clear(&self) {
        self.entries
            .lock()
            .expect("audit log lock poisoned")
            .clear();
    }

    /// Current number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("audit log lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of retained entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
