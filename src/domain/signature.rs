//! HMAC-SHA256 verification of provider webhook bodies.
//!
//! The provider posts a compact JWS-style envelope: three base64url segments
//! `header.payload.signature`, where the signature is
//! `HMAC-SHA256(secret, header || "." || payload)`.

use {
    base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD},
    hmac::{Hmac, Mac},
    sha2::Sha256,
    std::sync::Arc,
    subtle::ConstantTimeEq,
};

type HmacSha256 = Hmac<Sha256>;

const SIGNED_HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    /// Not exactly three segments, or a segment is not base64url.
    Malformed,
    Mismatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Valid(Vec<u8>),
    Invalid(InvalidReason),
}

#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Arc<[u8]>,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier").finish_non_exhaustive()
    }
}

impl SignatureVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: Arc::from(secret.as_ref()),
        }
    }

    pub fn verify(&self, body: &str) -> Verification {
        let body = body.trim();
        let mut segments = body.split('.');
        let (Some(header), Some(payload), Some(signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Verification::Invalid(InvalidReason::Malformed);
        };

        if decode_segment(header).is_none() {
            return Verification::Invalid(InvalidReason::Malformed);
        }
        let Some(payload_bytes) = decode_segment(payload) else {
            return Verification::Invalid(InvalidReason::Malformed);
        };
        let Some(provided) = decode_segment(signature) else {
            return Verification::Invalid(InvalidReason::Malformed);
        };

        let expected = self.mac(header, payload);

        // Length is public (always 32 bytes for SHA-256); only the content
        // comparison has to be constant-time.
        if expected.len() != provided.len() {
            return Verification::Invalid(InvalidReason::Mismatch);
        }
        if bool::from(expected.ct_eq(&provided)) {
            Verification::Valid(payload_bytes)
        } else {
            Verification::Invalid(InvalidReason::Mismatch)
        }
    }

    /// Builds a signed three-segment body for `payload`.
    pub fn sign(&self, payload: &[u8]) -> String {
        let header = URL_SAFE_NO_PAD.encode(SIGNED_HEADER);
        let payload = URL_SAFE_NO_PAD.encode(payload);
        let signature = URL_SAFE_NO_PAD.encode(self.mac(&header, &payload));
        format!("{header}.{payload}.{signature}")
    }

    fn mac(&self, header: &str, payload: &str) -> Vec<u8> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(header.as_bytes());
        mac.update(b".");
        mac.update(payload.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

/// Decodes one base64url segment, tolerating `=` padding.
fn decode_segment(segment: &str) -> Option<Vec<u8>> {
    if segment.is_empty() {
        return None;
    }
    URL_SAFE_NO_PAD.decode(segment.trim_end_matches('=')).ok()
}
