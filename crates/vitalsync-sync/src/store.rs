// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Collaborator seams -- the sync engine reads records, keeps credentials,
// and tracks paired devices through these traits so the surrounding app
// (HealthKit bridge, keychain, settings store) can plug in real backends.
// The in-memory implementations back tests and the demo wiring.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use serde_json::Value;
use vitalsync_core::error::{Result, VitalSyncError};
use vitalsync_core::{DeviceId, PairedDevice, PeerCredential, RecordKind};

/// Read-only source of the records this device serves to paired peers.
pub trait RecordStore: Send + Sync {
    /// Fetch records of one kind, newest first, up to `limit` when given.
    fn fetch(&self, kind: RecordKind, limit: Option<usize>) -> Result<Vec<Value>>;

    /// Kinds this store can serve. Stores with partial coverage override.
    fn kinds(&self) -> Vec<RecordKind> {
        RecordKind::all().to_vec()
    }
}

/// Durable, access-protected storage for peer credentials on the
/// connecting side (keychain-backed in the real app).
pub trait SecretStore: Send + Sync {
    fn save(&self, peer: DeviceId, credential: &PeerCredential) -> Result<()>;
    fn load(&self, peer: DeviceId) -> Result<Option<PeerCredential>>;
    fn delete(&self, peer: DeviceId) -> Result<()>;
}

/// Durable record of which devices we have paired with.
pub trait DeviceRegistry: Send + Sync {
    /// Insert or overwrite the record for a device.
    fn upsert(&self, device: PairedDevice) -> Result<()>;
    fn get(&self, id: DeviceId) -> Result<Option<PairedDevice>>;
    fn remove(&self, id: DeviceId) -> Result<()>;
    fn all(&self) -> Result<Vec<PairedDevice>>;
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

/// Record store backed by a plain map. Kinds with no entries serve empty.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<BTreeMap<RecordKind, Vec<Value>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the records held for one kind.
    pub fn set_records(&self, kind: RecordKind, items: Vec<Value>) {
        self.records
            .lock()
            .expect("record store lock poisoned")
            .insert(kind, items);
    }
}

impl RecordStore for MemoryRecordStore {
    fn fetch(&self, kind: RecordKind, limit: Option<usize>) -> Result<Vec<Value>> {
        let records = self.records.lock().map_err(|_| {
            VitalSyncError::RecordStore("record store lock poisoned".into())
        })?;
        let items = records.get(&kind).cloned().unwrap_or_default();
        Ok(match limit {
            Some(limit) => items.into_iter().take(limit).collect(),
            None => items,
        })
    }
}

/// Secret store backed by a plain map. Real deployments substitute the
/// platform keychain behind the same trait.
#[derive(Default)]
pub struct MemorySecretStore {
    credentials: Mutex<HashMap<DeviceId, PeerCredential>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemorySecretStore {
    fn save(&self, peer: DeviceId, credential: &PeerCredential) -> Result<()> {
        self.credentials
            .lock()
            .map_err(|_| VitalSyncError::SecretStore("secret store lock poisoned".into()))?
            .insert(peer, credential.clone());
        Ok(())
    }

    fn load(&self, peer: DeviceId) -> Result<Option<PeerCredential>> {
        Ok(self
            .credentials
            .lock()
            .map_err(|_| VitalSyncError::SecretStore("secret store lock poisoned".into()))?
            .get(&peer)
            .cloned())
    }

    fn delete(&self, peer: DeviceId) -> Result<()> {
        self.credentials
            .lock()
            .map_err(|_| VitalSyncError::SecretStore("secret store lock poisoned".into()))?
            .remove(&peer);
        Ok(())
    }
}

/// Device registry backed by a plain map.
#[derive(Default)]
pub struct MemoryDeviceRegistry {
    devices: Mutex<HashMap<DeviceId, PairedDevice>>,
}

impl MemoryDeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceRegistry for MemoryDeviceRegistry {
    fn upsert(&self, device: PairedDevice) -> Result<()> {
        self.devices
            .lock()
            .map_err(|_| VitalSyncError::SecretStore("device registry lock poisoned".into()))?
            .insert(device.id, device);
        Ok(())
    }

    fn get(&self, id: DeviceId) -> Result<Option<PairedDevice>> {
        Ok(self
            .devices
            .lock()
            .map_err(|_| VitalSyncError::SecretStore("device registry lock poisoned".into()))?
            .get(&id)
            .cloned())
    }

    fn remove(&self, id: DeviceId) -> Result<()> {
        self.devices
            .lock()
            .map_err(|_| VitalSyncError::SecretStore("device registry lock poisoned".into()))?
            .remove(&id);
        Ok(())
    }

    fn all(&self) -> Result<Vec<PairedDevice>> {
        Ok(self
            .devices
            .lock()
            .map_err(|_| VitalSyncError::SecretStore("device registry lock poisoned".into()))?
            .values()
            .cloned()
            .collect())
    }
}
