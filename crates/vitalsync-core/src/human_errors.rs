// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Human-readable error messages for pairing and sync failures.
//
// Every technical error is mapped to plain English with a clear suggestion.
// The severity levels drive UI presentation; security-relevant failures get
// their own level so the UI can make them unmissable.

use crate::error::VitalSyncError;

/// Severity of an error from the user's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Network blip, timeout — we can retry automatically.
    Transient,
    /// User must do something (re-scan the code, bring devices closer).
    ActionRequired,
    /// Cannot be fixed by retrying or user action.
    Permanent,
    /// Trust-related failure — the user should stop and check.
    Security,
}

/// A human-readable error with plain English message and actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    /// Plain English summary (shown as a heading).
    pub message: String,
    /// What the user should try (shown as body text).
    pub suggestion: String,
    /// Whether the system should auto-retry.
    pub retriable: bool,
    /// Severity level (drives icon/colour in UI).
    pub severity: Severity,
}

/// Convert a `VitalSyncError` into something a non-technical user can act on.
pub fn humanize_error(err: &VitalSyncError) -> HumanError {
    match err {
        // -- Identity / certificate --
        VitalSyncError::IdentityCreation(_) | VitalSyncError::KeyConversion(_) => HumanError {
            message: "This device couldn't set up its secure identity.".into(),
            suggestion: "Try restarting the app. If this keeps happening, reinstalling will create a fresh identity.".into(),
            retriable: false,
            severity: Severity::Permanent,
        },

        VitalSyncError::Certificate(_) => HumanError {
            message: "Secure connection setup failed.".into(),
            suggestion: "Try turning sharing off and on again to regenerate the security certificate.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        // -- Pairing / authorization --
        VitalSyncError::PairingRejected(detail) => {
            if detail.contains("expired") {
                HumanError {
                    message: "That pairing code has expired.".into(),
                    suggestion: "Ask the other device to show a new QR code, then scan it again.".into(),
                    retriable: false,
                    severity: Severity::ActionRequired,
                }
            } else {
                HumanError {
                    message: "The pairing code wasn't accepted.".into(),
                    suggestion: "Pairing codes only work once. Ask the other device to show a new QR code.".into(),
                    retriable: false,
                    severity: Severity::ActionRequired,
                }
            }
        }

        VitalSyncError::AuthorizationDenied(_) => HumanError {
            message: "This device is no longer authorised.".into(),
            suggestion: "Your access may have been revoked on the other device. Pair the two devices again.".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        // -- Server --
        VitalSyncError::Server(detail) => HumanError {
            message: "Sharing couldn't start on this device.".into(),
            suggestion: format!("Try turning sharing off and on again. ({detail})"),
            retriable: true,
            severity: Severity::Transient,
        },

        // -- Client / network --
        VitalSyncError::Client(detail) => humanize_client_error(detail),

        VitalSyncError::FingerprintMismatch { .. } => HumanError {
            message: "The other device's security certificate doesn't match.".into(),
            suggestion: "Stop and check you're connecting to the right device. If it recently reinstalled the app, you'll need to pair again with a fresh QR code.".into(),
            retriable: false,
            severity: Severity::Security,
        },

        // -- Discovery --
        VitalSyncError::Discovery(_) => HumanError {
            message: "This device can't announce itself on the network.".into(),
            suggestion: "Make sure you're connected to Wi-Fi. Sharing still works if the other device scans the QR code.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        // -- External collaborators --
        VitalSyncError::SecretStore(_) => HumanError {
            message: "Saved device credentials couldn't be read or written.".into(),
            suggestion: "Try pairing the devices again; a new credential will replace the old one.".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        VitalSyncError::RecordStore(_) => HumanError {
            message: "The health records couldn't be read.".into(),
            suggestion: "Try the sync again. If this keeps happening, check the app has permission to read health data.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        // -- Plumbing --
        VitalSyncError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::AddrInUse {
                HumanError {
                    message: "Another app is using the sharing port.".into(),
                    suggestion: "Close other sharing apps, or change the port in Settings.".into(),
                    retriable: false,
                    severity: Severity::ActionRequired,
                }
            } else {
                HumanError {
                    message: "There was a network problem.".into(),
                    suggestion: "Check both devices are on the same Wi-Fi network, then try again.".into(),
                    retriable: true,
                    severity: Severity::Transient,
                }
            }
        }

        VitalSyncError::Serialization(_) => HumanError {
            message: "The app had an internal data problem.".into(),
            suggestion: "Try again. If this keeps happening, please report it.".into(),
            retriable: true,
            severity: Severity::Transient,
        },
    }
}

/// Parse client-side connection failure details into human-readable messages.
fn humanize_client_error(detail: &str) -> HumanError {
    let lower = detail.to_ascii_lowercase();

    if lower.contains("fingerprint") {
        HumanError {
            message: "The other device's security certificate doesn't match.".into(),
            suggestion: "Stop and check you're connecting to the right device, then pair again with a fresh QR code.".into(),
            retriable: false,
            severity: Severity::Security,
        }
    } else if lower.contains("connection refused") {
        HumanError {
            message: "The other device isn't accepting connections.".into(),
            suggestion: "Make sure sharing is turned on over there, then try again.".into(),
            retriable: true,
            severity: Severity::Transient,
        }
    } else if lower.contains("timed out") {
        HumanError {
            message: "The other device didn't respond in time.".into(),
            suggestion: "Check both devices are on the same Wi-Fi network and close to the router, then try again.".into(),
            retriable: true,
            severity: Severity::Transient,
        }
    } else if lower.contains("connection reset") || lower.contains("broken pipe") {
        HumanError {
            message: "The connection was interrupted.".into(),
            suggestion: "This sometimes happens with Wi-Fi. We'll try again automatically.".into(),
            retriable: true,
            severity: Severity::Transient,
        }
    } else {
        HumanError {
            message: "Syncing with the other device failed.".into(),
            suggestion: format!("Try again. (Detail: {detail})"),
            retriable: true,
            severity: Severity::Transient,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_mismatch_is_security() {
        let err = VitalSyncError::FingerprintMismatch {
            expected: "aa".into(),
            actual: "bb".into(),
        };
        let human = humanize_error(&err);
        assert_eq!(human.severity, Severity::Security);
        assert!(!human.retriable);
    }

    #[test]
    fn connection_refused_is_transient() {
        let err = VitalSyncError::Client("connect 192.168.1.20:8443: connection refused".into());
        let human = humanize_error(&err);
        assert_eq!(human.severity, Severity::Transient);
        assert!(human.retriable);
    }

    #[test]
    fn expired_code_is_action_required() {
        let err = VitalSyncError::PairingRejected("code expired".into());
        let human = humanize_error(&err);
        assert_eq!(human.severity, Severity::ActionRequired);
        assert!(!human.retriable);
    }

    #[test]
    fn client_fingerprint_detail_is_security() {
        let err = VitalSyncError::Client("TLS handshake: fingerprint mismatch".into());
        assert_eq!(humanize_error(&err).severity, Severity::Security);
    }

    #[test]
    fn identity_creation_is_permanent() {
        let err = VitalSyncError::IdentityCreation("rng unavailable".into());
        assert_eq!(humanize_error(&err).severity, Severity::Permanent);
    }
}
