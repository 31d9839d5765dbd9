// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// ASN.1 DER primitive encoders — the building blocks for the self-signed
// X.509 certificate assembled in `identity`.
//
// Pure, stateless byte builders with no failure modes: every input is
// caller-controlled and well-formed by construction, and every output is a
// complete TLV whose first byte is the DER tag.

// ---------------------------------------------------------------------------
// Universal tags
// ---------------------------------------------------------------------------

/// INTEGER.
pub const TAG_INTEGER: u8 = 0x02;

/// BIT STRING.
pub const TAG_BIT_STRING: u8 = 0x03;

/// NULL.
pub const TAG_NULL: u8 = 0x05;

/// OBJECT IDENTIFIER.
pub const TAG_OID: u8 = 0x06;

/// UTF8String.
pub const TAG_UTF8_STRING: u8 = 0x0C;

/// UTCTime.
pub const TAG_UTC_TIME: u8 = 0x17;

/// SEQUENCE (constructed).
pub const TAG_SEQUENCE: u8 = 0x30;

/// SET (constructed).
pub const TAG_SET: u8 = 0x31;

// ---------------------------------------------------------------------------
// Object identifiers (pre-encoded OID content bytes)
// ---------------------------------------------------------------------------

/// ecdsa-with-SHA256 (1.2.840.10045.4.3.2), RFC 5758 — parameters absent.
pub const OID_ECDSA_WITH_SHA256: &[u8] = &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x04, 0x03, 0x02];

/// id-ecPublicKey (1.2.840.10045.2.1).
pub const OID_EC_PUBLIC_KEY: &[u8] = &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x02, 0x01];

/// prime256v1 / secp256r1 (1.2.840.10045.3.1.7).
pub const OID_PRIME256V1: &[u8] = &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x03, 0x01, 0x07];

/// X.500 commonName (2.5.4.3).
pub const OID_COMMON_NAME: &[u8] = &[0x55, 0x04, 0x03];

/// X.500 organizationName (2.5.4.10).
pub const OID_ORGANIZATION: &[u8] = &[0x55, 0x04, 0x0A];

// ---------------------------------------------------------------------------
// Length and TLV
// ---------------------------------------------------------------------------

/// Encode a content length per DER's minimal-length rule.
///
/// Lengths below 128 use the short form (one byte). 128..=255 use the
/// one-byte long form `[0x81, len]`; 256..=65535 the two-byte long form
/// `[0x82, hi, lo]`. Certificates assembled here never exceed that.
pub fn encode_length(len: usize) -> Vec<u8> {
    debug_assert!(len <= 0xFFFF, "DER length {len} exceeds two-byte long form");
    if len < 0x80 {
        vec![len as u8]
    } else if len <= 0xFF {
        vec![0x81, len as u8]
    } else {
        vec![0x82, (len >> 8) as u8, (len & 0xFF) as u8]
    }
}

/// Wrap `value` in a tag + length header.
pub fn tlv(tag: u8, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() + 4);
    out.push(tag);
    out.extend_from_slice(&encode_length(value.len()));
    out.extend_from_slice(value);
    out
}

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

/// Encode a signed INTEGER from a native integer (minimal two's complement).
pub fn integer_from_i64(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    // Strip redundant leading bytes while preserving the sign bit.
    while start < bytes.len() - 1 {
        let redundant_zero = bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0;
        let redundant_ff = bytes[start] == 0xFF && bytes[start + 1] & 0x80 != 0;
        if redundant_zero || redundant_ff {
            start += 1;
        } else {
            break;
        }
    }
    tlv(TAG_INTEGER, &bytes[start..])
}

/// Encode a positive INTEGER from raw big-endian magnitude bytes.
///
/// Strips redundant leading zero bytes, then re-inserts exactly one `0x00`
/// prefix byte when the remaining leading byte has its top bit set, so the
/// value stays positive under two's complement. Used for certificate serial
/// numbers and signature components.
pub fn integer_from_bytes(magnitude: &[u8]) -> Vec<u8> {
    let mut start = 0;
    while start < magnitude.len().saturating_sub(1) && magnitude[start] == 0x00 {
        start += 1;
    }
    let trimmed = if magnitude.is_empty() {
        &[0x00][..]
    } else {
        &magnitude[start..]
    };

    if trimmed[0] & 0x80 != 0 {
        let mut value = Vec::with_capacity(trimmed.len() + 1);
        value.push(0x00);
        value.extend_from_slice(trimmed);
        tlv(TAG_INTEGER, &value)
    } else {
        tlv(TAG_INTEGER, trimmed)
    }
}

/// The NULL primitive.
pub fn null() -> Vec<u8> {
    vec![TAG_NULL, 0x00]
}

/// Encode a UTCTime value as `YYMMDDHHMMSSZ` (UTC only).
pub fn utc_time(time: &chrono::DateTime<chrono::Utc>) -> Vec<u8> {
    let formatted = time.format("%y%m%d%H%M%SZ").to_string();
    tlv(TAG_UTC_TIME, formatted.as_bytes())
}

/// Encode a UTF8String.
pub fn utf8_string(value: &str) -> Vec<u8> {
    tlv(TAG_UTF8_STRING, value.as_bytes())
}

/// Encode an OBJECT IDENTIFIER from pre-encoded content bytes.
pub fn object_identifier(content: &[u8]) -> Vec<u8> {
    tlv(TAG_OID, content)
}

/// Encode a BIT STRING with zero unused bits.
pub fn bit_string(data: &[u8]) -> Vec<u8> {
    let mut value = Vec::with_capacity(data.len() + 1);
    value.push(0x00); // unused-bits count
    value.extend_from_slice(data);
    tlv(TAG_BIT_STRING, &value)
}

// ---------------------------------------------------------------------------
// Constructed types
// ---------------------------------------------------------------------------

/// Encode a SEQUENCE from already-encoded parts.
pub fn sequence(parts: &[&[u8]]) -> Vec<u8> {
    constructed(TAG_SEQUENCE, parts)
}

/// Encode a SET from already-encoded parts.
pub fn set(parts: &[&[u8]]) -> Vec<u8> {
    constructed(TAG_SET, parts)
}

/// Encode an EXPLICIT context-specific constructed tag `[n]`.
pub fn context(number: u8, inner: &[u8]) -> Vec<u8> {
    debug_assert!(number < 0x1F, "context tag number {number} out of range");
    tlv(0xA0 | number, inner)
}

fn constructed(tag: u8, parts: &[&[u8]]) -> Vec<u8> {
    let total: usize = parts.iter().map(|p| p.len()).sum();
    let mut value = Vec::with_capacity(total);
    for part in parts {
        value.extend_from_slice(part);
    }
    tlv(tag, &value)
}

/// Build a minimal X.500 distinguished name: commonName + organizationName.
///
/// Structure: SEQUENCE of RDN SETs, each holding one AttributeTypeAndValue.
pub fn distinguished_name(common_name: &str, organization: &str) -> Vec<u8> {
    let cn_attr = sequence(&[
        &object_identifier(OID_COMMON_NAME),
        &utf8_string(common_name),
    ]);
    let o_attr = sequence(&[
        &object_identifier(OID_ORGANIZATION),
        &utf8_string(organization),
    ]);
    sequence(&[&set(&[&cn_attr]), &set(&[&o_attr])])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn length_short_form() {
        assert_eq!(encode_length(0), vec![0x00]);
        assert_eq!(encode_length(42), vec![0x2A]);
        assert_eq!(encode_length(127), vec![0x7F]);
    }

    #[test]
    fn length_one_byte_long_form() {
        assert_eq!(encode_length(128), vec![0x81, 0x80]);
        assert_eq!(encode_length(255), vec![0x81, 0xFF]);
    }

    #[test]
    fn length_two_byte_long_form() {
        assert_eq!(encode_length(256), vec![0x82, 0x01, 0x00]);
        assert_eq!(encode_length(0xABCD), vec![0x82, 0xAB, 0xCD]);
        assert_eq!(encode_length(65535), vec![0x82, 0xFF, 0xFF]);
    }

    #[test]
    fn integer_small_positive() {
        assert_eq!(integer_from_i64(0), vec![0x02, 0x01, 0x00]);
        assert_eq!(integer_from_i64(2), vec![0x02, 0x01, 0x02]);
        assert_eq!(integer_from_i64(127), vec![0x02, 0x01, 0x7F]);
    }

    #[test]
    fn integer_needs_sign_byte() {
        // 128 has its top bit set in one byte, so DER inserts 0x00.
        assert_eq!(integer_from_i64(128), vec![0x02, 0x02, 0x00, 0x80]);
        assert_eq!(integer_from_i64(255), vec![0x02, 0x02, 0x00, 0xFF]);
    }

    #[test]
    fn integer_negative_minimal() {
        assert_eq!(integer_from_i64(-1), vec![0x02, 0x01, 0xFF]);
        assert_eq!(integer_from_i64(-128), vec![0x02, 0x01, 0x80]);
        assert_eq!(integer_from_i64(-129), vec![0x02, 0x02, 0xFF, 0x7F]);
    }

    #[test]
    fn integer_from_bytes_top_bit_set_gets_prefix() {
        let encoded = integer_from_bytes(&[0x80, 0x01]);
        assert_eq!(encoded, vec![0x02, 0x03, 0x00, 0x80, 0x01]);
    }

    #[test]
    fn integer_from_bytes_top_bit_clear_no_prefix() {
        let encoded = integer_from_bytes(&[0x7F, 0xFF]);
        assert_eq!(encoded, vec![0x02, 0x02, 0x7F, 0xFF]);
    }

    #[test]
    fn integer_from_bytes_strips_redundant_zeros() {
        // Leading zeros collapse, then one is re-inserted for the sign.
        assert_eq!(
            integer_from_bytes(&[0x00, 0x00, 0x80]),
            vec![0x02, 0x02, 0x00, 0x80]
        );
        assert_eq!(
            integer_from_bytes(&[0x00, 0x00, 0x01]),
            vec![0x02, 0x01, 0x01]
        );
    }

    #[test]
    fn null_primitive() {
        assert_eq!(null(), vec![0x05, 0x00]);
    }

    #[test]
    fn utc_time_format() {
        let time = chrono::Utc.with_ymd_and_hms(2026, 8, 23, 14, 30, 5).unwrap();
        let encoded = utc_time(&time);
        assert_eq!(encoded[0], TAG_UTC_TIME);
        assert_eq!(&encoded[2..], b"260823143005Z");
    }

    #[test]
    fn bit_string_prefixes_unused_bits() {
        let encoded = bit_string(&[0xDE, 0xAD]);
        assert_eq!(encoded, vec![0x03, 0x03, 0x00, 0xDE, 0xAD]);
    }

    #[test]
    fn sequence_concatenates_parts() {
        let a = integer_from_i64(1);
        let b = null();
        let seq = sequence(&[&a, &b]);
        assert_eq!(seq[0], TAG_SEQUENCE);
        assert_eq!(seq[1] as usize, a.len() + b.len());
        assert_eq!(&seq[2..2 + a.len()], &a[..]);
    }

    #[test]
    fn context_tag_is_constructed() {
        let inner = integer_from_i64(2);
        let wrapped = context(0, &inner);
        assert_eq!(wrapped[0], 0xA0);
        assert_eq!(&wrapped[2..], &inner[..]);
    }

    #[test]
    fn distinguished_name_shape() {
        let dn = distinguished_name("My Phone", "VitalSync");
        // Outer SEQUENCE of two SETs.
        assert_eq!(dn[0], TAG_SEQUENCE);
        assert_eq!(dn[2], TAG_SET);
        // The CN value appears verbatim inside.
        let needle = b"My Phone";
        assert!(
            dn.windows(needle.len()).any(|w| w == needle),
            "common name must appear in encoded DN"
        );
    }

    #[test]
    fn long_form_tlv_round_trip() {
        // A value longer than 127 bytes forces the long-form length.
        let value = vec![0xAB; 200];
        let encoded = tlv(TAG_SEQUENCE, &value);
        assert_eq!(encoded[0], TAG_SEQUENCE);
        assert_eq!(encoded[1], 0x81);
        assert_eq!(encoded[2], 200);
        assert_eq!(&encoded[3..], &value[..]);
    }
}
