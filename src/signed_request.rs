//! Verification of the provider's signed `<signature>.<payload>` data
//! deletion callback.
//!
//! The payload is a base64url JSON object carrying the participant whose
//! data must be purged. Earlier drafts of this contract let an operator
//! supply a hard-coded fallback verification token; that path fails closed
//! here instead (see DESIGN.md's Open Question decision) — every request is
//! HMAC-verified against the app secret before it is actioned.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::AppError;

#[derive(Debug, Clone, Deserialize)]
struct SignedPayload {
    user_id: String,
    #[allow(dead_code)]
    algorithm: Option<String>,
    #[allow(dead_code)]
    issued_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct VerifiedDeletionRequest {
    pub participant_id: String,
}

/// Verify a `<sig>.<payload>` signed request, both base64url-encoded.
pub fn verify(signed_request: &str, app_secret: &str) -> Result<VerifiedDeletionRequest, AppError> {
    let (sig_b64, payload_b64) = signed_request
        .split_once('.')
        .ok_or_else(|| AppError::MalformedPayload("signed request missing `.` separator".into()))?;

    let provided_sig = URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|_| AppError::MalformedPayload("signature is not valid base64url".into()))?;

    let mut mac = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload_b64.as_bytes());
    let expected_sig = mac.finalize().into_bytes();

    if !bool::from(provided_sig.ct_eq(&expected_sig)) {
        return Err(AppError::InvalidSignature);
    }

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AppError::MalformedPayload("payload is not valid base64url".into()))?;

    let payload: SignedPayload = serde_json::from_slice(&payload_bytes)
        .map_err(|e| AppError::MalformedPayload(format!("payload is not valid JSON: {e}")))?;

    Ok(VerifiedDeletionRequest {
        participant_id: payload.user_id,
    })
}

/// Generates a confirmation code in the `DEL########` shape used in the
/// status URL returned to the provider.
#[must_use]
pub fn generate_confirmation_code<R: rand::Rng + ?Sized>(rng: &mut R) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let suffix: String = (0..8)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("DEL{suffix}")
}

#[must_use]
pub fn status_url(public_site_url: &str, confirmation_code: &str) -> String {
    format!("{}/data-deletion/status/{}", public_site_url.trim_end_matches('/'), confirmation_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(app_secret: &str, payload_json: &serde_json::Value) -> String {
        let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload_json).unwrap());
        let mut mac = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()).unwrap();
        mac.update(payload_b64.as_bytes());
        let sig = mac.finalize().into_bytes();
        format!("{}.{}", URL_SAFE_NO_PAD.encode(sig), payload_b64)
    }

    #[test]
    fn valid_request_extracts_user_id() {
        let secret = "app-secret";
        let signed = sign(secret, &serde_json::json!({"user_id": "P123", "algorithm": "HMAC-SHA256", "issued_at": 1}));
        let verified = verify(&signed, secret).unwrap();
        assert_eq!(verified.participant_id, "P123");
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let secret = "app-secret";
        let signed = sign(secret, &serde_json::json!({"user_id": "P123"}));
        let (sig, _payload) = signed.split_once('.').unwrap();
        let forged_payload = URL_SAFE_NO_PAD.encode(br#"{"user_id":"MALLORY"}"#);
        let forged = format!("{sig}.{forged_payload}");
        assert!(matches!(verify(&forged, secret), Err(AppError::InvalidSignature)));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let signed = sign("real-secret", &serde_json::json!({"user_id": "P1"}));
        assert!(matches!(verify(&signed, "wrong-secret"), Err(AppError::InvalidSignature)));
    }

    #[test]
    fn missing_separator_is_malformed() {
        assert!(matches!(verify("not-a-signed-request", "secret"), Err(AppError::MalformedPayload(_))));
    }

    #[test]
    fn confirmation_code_has_expected_shape() {
        let mut rng = rand::thread_rng();
        let code = generate_confirmation_code(&mut rng);
        assert!(code.starts_with("DEL"));
        assert_eq!(code.len(), 11);
    }

    #[test]
    fn status_url_strips_trailing_slash() {
        let url = status_url("https://example.com/", "DELABCDEFGH");
        assert_eq!(url, "https://example.com/data-deletion/status/DELABCDEFGH");
    }
}
