//! Stripe `v1` webhook signature scheme: HMAC-SHA256 over `"{t}.{body}"`
//! with a bounded timestamp skew. Verification failure is a hard boundary;
//! nothing downstream of it runs.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted skew between the signed timestamp and now, in seconds.
pub const DEFAULT_TOLERANCE_SECONDS: i64 = 300;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("malformed signature header")]
    Malformed,
    #[error("signature timestamp outside tolerance")]
    Expired,
    #[error("signature mismatch")]
    Mismatch,
}

struct ParsedHeader {
    timestamp: i64,
    signatures: Vec<Vec<u8>>,
}

fn parse_header(header: &str) -> Result<ParsedHeader, SignatureError> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<Vec<u8>> = Vec::new();

    for part in header.split(',') {
        let mut kv = part.trim().splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(value)) => {
                timestamp = Some(value.parse().map_err(|_| SignatureError::Malformed)?);
            }
            (Some("v1"), Some(value)) => {
                // Undecodable hex can never match; treat it as absent.
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            // Ignore unknown schemes (e.g. v0) per the provider's docs.
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed);
    }
    Ok(ParsedHeader {
        timestamp,
        signatures,
    })
}

fn expected_signature(payload: &[u8], secret: &str, timestamp: i64) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Verifies `header` against `payload` at an explicit point in time; the
/// injectable `now` keeps the tolerance check deterministic under test.
pub fn verify_at(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_seconds: i64,
    now_unix: i64,
) -> Result<(), SignatureError> {
    let parsed = parse_header(header)?;

    if (now_unix - parsed.timestamp).abs() > tolerance_seconds {
        return Err(SignatureError::Expired);
    }

    let expected = expected_signature(payload, secret, parsed.timestamp);
    let matched = parsed
        .signatures
        .iter()
        .any(|candidate| candidate.ct_eq(expected.as_slice()).into());
    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Verifies against the current wall clock with the default tolerance.
pub fn verify(payload: &[u8], header: &str, secret: &str) -> Result<(), SignatureError> {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    verify_at(payload, header, secret, DEFAULT_TOLERANCE_SECONDS, now)
}
