// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// TLS identity — ECDSA P-256 key pair plus a hand-assembled self-signed
// X.509 certificate, generated once per process and cached.
//
// # Design note
//
// `ring` provides key generation and signing but no X.509 builder, so the
// certificate is assembled directly from the DER primitives in [`crate::der`]:
// TBSCertificate (v3, random serial, issuer = subject = the device name,
// validity window, EC public key), signed with ecdsa-with-SHA256.
//
// Key material is reached only through the narrow [`KeyProvider`] seam, so
// the assembly logic stays portable to a hardware-backed keystore; the
// in-tree provider is software-only, backed by ring.
//
// The identity is deliberately never written to durable storage. A fresh
// install gets a fresh key pair and fingerprint, which bounds the blast
// radius of a compromised device at the cost of requiring re-pairing.

use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{ECDSA_P256_SHA256_ASN1_SIGNING, EcdsaKeyPair, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tracing::{debug, instrument};
use vitalsync_core::error::{Result, VitalSyncError};

use crate::der;
use crate::hashing::hash_bytes;

/// Length of the random certificate serial number in bytes.
const SERIAL_LEN: usize = 16;

/// How far into the past the validity window starts, to absorb clock skew
/// between the two devices.
const NOT_BEFORE_SKEW_HOURS: i64 = 24;

/// Certificate lifetime. Pinning makes expiry uninteresting, but keeping it
/// under UTCTime's 2050 horizon keeps the encoding honest.
const VALIDITY_DAYS: i64 = 730;

/// Narrow seam over key-pair generation and signing.
///
/// Certificate assembly only ever sees PKCS#8 bytes, a public point, and a
/// detached signature, so a platform keystore can slot in behind this
/// trait without touching the DER logic.
pub trait KeyProvider: Send + Sync {
    /// Generate a fresh ECDSA P-256 key pair as PKCS#8 DER.
    fn generate_key_pair(&self) -> Result<Vec<u8>>;

    /// The uncompressed public point for a PKCS#8 key.
    fn public_key(&self, pkcs8: &[u8]) -> Result<Vec<u8>>;

    /// ECDSA-with-SHA256 signature over `message`.
    fn sign(&self, pkcs8: &[u8], message: &[u8]) -> Result<Vec<u8>>;
}

/// Software-only provider backed by ring.
pub struct RingKeyProvider {
    rng: SystemRandom,
}

impl RingKeyProvider {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }

    fn key_pair(&self, pkcs8: &[u8]) -> Result<EcdsaKeyPair> {
        EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8, &self.rng)
            .map_err(|e| VitalSyncError::KeyConversion(format!("key parsing failed: {e}")))
    }
}

impl Default for RingKeyProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyProvider for RingKeyProvider {
    fn generate_key_pair(&self) -> Result<Vec<u8>> {
        let document = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &self.rng)
            .map_err(|e| {
                VitalSyncError::IdentityCreation(format!("key generation failed: {e}"))
            })?;
        Ok(document.as_ref().to_vec())
    }

    fn public_key(&self, pkcs8: &[u8]) -> Result<Vec<u8>> {
        Ok(self.key_pair(pkcs8)?.public_key().as_ref().to_vec())
    }

    fn sign(&self, pkcs8: &[u8], message: &[u8]) -> Result<Vec<u8>> {
        let signature = self
            .key_pair(pkcs8)?
            .sign(&self.rng, message)
            .map_err(|e| VitalSyncError::Certificate(format!("signing failed: {e}")))?;
        Ok(signature.as_ref().to_vec())
    }
}

/// A generated TLS server identity: private key, certificate, fingerprint.
pub struct Identity {
    certificate: Vec<u8>,
    pkcs8: Vec<u8>,
    fingerprint: String,
}

impl Identity {
    /// The DER-encoded certificate, ready for a rustls cert chain.
    pub fn certificate_der(&self) -> CertificateDer<'static> {
        CertificateDer::from(self.certificate.clone())
    }

    /// The PKCS#8 private key, ready for a rustls server config.
    pub fn private_key_der(&self) -> PrivateKeyDer<'static> {
        PrivatePkcs8KeyDer::from(self.pkcs8.clone()).into()
    }

    /// SHA-256 over the certificate DER, lowercase hex.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// Produces and caches one self-signed identity per process lifetime.
pub struct IdentityService {
    device_name: String,
    provider: Arc<dyn KeyProvider>,
    cached: Mutex<Option<Arc<Identity>>>,
}

impl IdentityService {
    /// Create a service that will mint certificates for `device_name`
    /// (used as both subject and issuer common name), with the software
    /// key provider.
    pub fn new(device_name: impl Into<String>) -> Self {
        Self::with_provider(device_name, Arc::new(RingKeyProvider::new()))
    }

    /// Create a service with an alternative key provider (e.g. a
    /// platform-keystore adapter).
    pub fn with_provider(device_name: impl Into<String>, provider: Arc<dyn KeyProvider>) -> Self {
        Self {
            device_name: device_name.into(),
            provider,
            cached: Mutex::new(None),
        }
    }

    /// Return the cached identity, generating it on first call.
    #[instrument(skip(self), fields(device = %self.device_name))]
    pub fn identity(&self) -> Result<Arc<Identity>> {
        let mut cached = self.cached.lock().expect("identity cache lock poisoned");
        if let Some(identity) = cached.as_ref() {
            return Ok(Arc::clone(identity));
        }

        let identity = Arc::new(generate_identity(&self.device_name, self.provider.as_ref())?);
        debug!(fingerprint = %identity.fingerprint(), "TLS identity generated");
        *cached = Some(Arc::clone(&identity));
        Ok(identity)
    }

    /// Fingerprint of the current identity (generating it if needed).
    ///
    /// Deterministic for the lifetime of one identity; changes only when
    /// the identity is regenerated (e.g. app reinstall).
    pub fn fingerprint(&self) -> Result<String> {
        Ok(self.identity()?.fingerprint().to_owned())
    }
}

/// Generate a fresh key pair and self-signed certificate.
fn generate_identity(device_name: &str, provider: &dyn KeyProvider) -> Result<Identity> {
    let pkcs8 = provider.generate_key_pair()?;
    let public_key = provider.public_key(&pkcs8)?;

    let tbs = build_tbs_certificate(device_name, &public_key)?;
    let signature = provider.sign(&pkcs8, &tbs)?;

    // Certificate ::= SEQUENCE { tbsCertificate, signatureAlgorithm, signatureValue }
    let signature_algorithm = der::sequence(&[&der::object_identifier(der::OID_ECDSA_WITH_SHA256)]);
    let certificate = der::sequence(&[&tbs, &signature_algorithm, &der::bit_string(&signature)]);

    let fingerprint = hash_bytes(&certificate);

    Ok(Identity {
        certificate,
        pkcs8,
        fingerprint,
    })
}

/// Assemble the TBSCertificate SEQUENCE.
fn build_tbs_certificate(device_name: &str, public_key: &[u8]) -> Result<Vec<u8>> {
    // version [0] EXPLICIT INTEGER 2 (v3)
    let version = der::context(0, &der::integer_from_i64(2));

    let mut serial_bytes = [0u8; SERIAL_LEN];
    SystemRandom::new()
        .fill(&mut serial_bytes)
        .map_err(|e| VitalSyncError::Certificate(format!("serial generation failed: {e}")))?;
    let serial = der::integer_from_bytes(&serial_bytes);

    let signature_algorithm = der::sequence(&[&der::object_identifier(der::OID_ECDSA_WITH_SHA256)]);

    // Self-signed: issuer and subject are the same device name.
    let name = der::distinguished_name(device_name, "VitalSync");

    let now = Utc::now();
    let not_before = now - Duration::hours(NOT_BEFORE_SKEW_HOURS);
    let not_after = now + Duration::days(VALIDITY_DAYS);
    let validity = der::sequence(&[&der::utc_time(&not_before), &der::utc_time(&not_after)]);

    // SubjectPublicKeyInfo for an uncompressed P-256 point.
    let spki_algorithm = der::sequence(&[
        &der::object_identifier(der::OID_EC_PUBLIC_KEY),
        &der::object_identifier(der::OID_PRIME256V1),
    ]);
    let spki = der::sequence(&[&spki_algorithm, &der::bit_string(public_key)]);

    // RFC 5280 field order: validity sits between issuer and subject.
    Ok(der::sequence(&[
        &version,
        &serial,
        &signature_algorithm,
        &name,
        &validity,
        &name,
        &spki,
    ]))
}
