// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the pairing and sync core.
///
/// Everything else (what to sync, export formats, push destinations) is
/// configured by the excluded collaborator components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Name this device advertises and embeds as certificate subject.
    pub device_name: String,
    /// Preferred port for the sync server (0 = let the OS pick).
    pub server_port: u16,
    /// How long a pairing code stays redeemable, in minutes.
    pub pairing_code_lifetime_minutes: u64,
    /// Maximum number of in-memory audit entries before FIFO eviction.
    pub audit_capacity: usize,
    /// Delay before the client returns to searching after a dropped
    /// connection, in seconds.
    pub reconnect_backoff_secs: u64,
}

impl SyncConfig {
    pub fn pairing_code_lifetime(&self) -> Duration {
        Duration::from_secs(self.pairing_code_lifetime_minutes * 60)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            device_name: "VitalSync Device".into(),
            server_port: 0,
            pairing_code_lifetime_minutes: 5,
            audit_capacity: 256,
            reconnect_backoff_secs: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_lifetimes() {
        let config = SyncConfig::default();
        assert_eq!(config.pairing_code_lifetime(), Duration::from_secs(300));
        assert_eq!(config.reconnect_backoff(), Duration::from_secs(5));
        assert_eq!(config.server_port, 0);
    }
}
