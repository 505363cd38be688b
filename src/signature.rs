//! HMAC signature verification over the raw webhook request body.
//!
//! Computed over the exact bytes the provider sent, before any JSON parsing.
//! `X-Hub-Signature-256` (HMAC-SHA256) is preferred; `X-Hub-Signature`
//! (HMAC-SHA1) is accepted only when the 256 header is absent.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::AppError;

const HEADER_SHA256: &str = "x-hub-signature-256";
const HEADER_SHA1: &str = "x-hub-signature";

/// Verify the signature of a raw request body against the configured app
/// secret.
///
/// `disabled` lets an operator explicitly opt out at startup: verification
/// is warn-and-pass only when the operator has explicitly disabled signature
/// checking. The caller is responsible for emitting the warning log.
pub fn verify(
    headers: &axum::http::HeaderMap,
    body: &[u8],
    app_secret: &str,
    disabled: bool,
) -> Result<(), AppError> {
    let header_value = headers
        .get(HEADER_SHA256)
        .or_else(|| headers.get(HEADER_SHA1))
        .map(|v| v.to_str().map_err(|_| AppError::MalformedHeader("non-ASCII signature header".into())))
        .transpose()?;

    let Some(header_value) = header_value else {
        return if disabled {
            Ok(())
        } else {
            Err(AppError::MissingSignature)
        };
    };

    let (algo, hex_digest) = header_value
        .split_once('=')
        .ok_or_else(|| AppError::MalformedHeader(format!("expected `<algo>=<hex>`, got `{header_value}`")))?;

    let provided = hex::decode(hex_digest)
        .map_err(|_| AppError::MalformedHeader("signature is not valid hex".into()))?;

    let matches: bool = match algo {
        "sha256" => compute_hmac_sha256(app_secret, body).ct_eq(&provided).into(),
        "sha1" => compute_hmac_sha1(app_secret, body).ct_eq(&provided).into(),
        other => return Err(AppError::MalformedHeader(format!("unsupported algorithm `{other}`"))),
    };

    if matches {
        Ok(())
    } else if disabled {
        Ok(())
    } else {
        Err(AppError::InvalidSignature)
    }
}

fn compute_hmac_sha256(secret: &str, body: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(body);
    mac.finalize().into_bytes().to_vec()
}

fn compute_hmac_sha1(secret: &str, body: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(body);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};

    fn sha256_header(secret: &str, body: &[u8]) -> String {
        let digest = compute_hmac_sha256(secret, body);
        format!("sha256={}", hex::encode(digest))
    }

    #[test]
    fn accepts_valid_sha256_signature() {
        let secret = "top-secret";
        let body = br#"{"hello":"world"}"#;
        let mut headers = HeaderMap::new();
        headers.insert(
            HEADER_SHA256,
            HeaderValue::from_str(&sha256_header(secret, body)).unwrap(),
        );

        assert!(verify(&headers, body, secret, false).is_ok());
    }

    #[test]
    fn rejects_tampered_body() {
        let secret = "top-secret";
        let body = br#"{"hello":"world"}"#;
        let mut headers = HeaderMap::new();
        headers.insert(
            HEADER_SHA256,
            HeaderValue::from_str(&sha256_header(secret, body)).unwrap(),
        );

        let tampered = br#"{"hello":"mallory"}"#;
        assert!(matches!(
            verify(&headers, tampered, secret, false),
            Err(AppError::InvalidSignature)
        ));
    }

    #[test]
    fn falls_back_to_sha1_when_sha256_absent() {
        let secret = "top-secret";
        let body = b"raw-body";
        let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let digest = mac.finalize().into_bytes();

        let mut headers = HeaderMap::new();
        headers.insert(
            HEADER_SHA1,
            HeaderValue::from_str(&format!("sha1={}", hex::encode(digest))).unwrap(),
        );

        assert!(verify(&headers, body, secret, false).is_ok());
    }

    #[test]
    fn prefers_sha256_over_sha1_when_both_present() {
        let secret = "top-secret";
        let body = b"raw-body";
        let mut headers = HeaderMap::new();
        headers.insert(
            HEADER_SHA256,
            HeaderValue::from_str(&sha256_header(secret, body)).unwrap(),
        );
        headers.insert(HEADER_SHA1, HeaderValue::from_static("sha1=deadbeef"));

        assert!(verify(&headers, body, secret, false).is_ok());
    }

    #[test]
    fn fails_closed_when_header_missing_and_not_disabled() {
        let headers = HeaderMap::new();
        assert!(matches!(
            verify(&headers, b"body", "secret", false),
            Err(AppError::MissingSignature)
        ));
    }

    #[test]
    fn warns_and_passes_when_disabled() {
        let headers = HeaderMap::new();
        assert!(verify(&headers, b"body", "secret", true).is_ok());
    }

    #[test]
    fn malformed_header_format_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_SHA256, HeaderValue::from_static("not-a-valid-header"));
        assert!(matches!(
            verify(&headers, b"body", "secret", false),
            Err(AppError::MalformedHeader(_))
        ));
    }
}
