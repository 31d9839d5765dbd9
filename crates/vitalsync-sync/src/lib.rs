// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! vitalsync-sync — the wire side of device-to-device sync.
//!
//! This crate bridges between the trust primitives in `vitalsync-security`
//! and the network: the embedded HTTPS server that serves records to
//! paired peers, the fingerprint-pinning client that pulls them, the
//! out-of-band pairing payload, and the coordinator state machine the UI
//! observes.

pub mod client;
pub mod coordinator;
pub mod http;
pub mod payload;
pub mod server;
pub mod store;

pub use client::SyncClient;
pub use coordinator::{PeerInfo, SyncCoordinator};
pub use payload::PairingPayload;
pub use server::SyncServer;
pub use store::{
    DeviceRegistry, MemoryDeviceRegistry, MemoryRecordStore, MemorySecretStore, RecordStore,
    SecretStore,
};
