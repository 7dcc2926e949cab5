use base64::Engine as _;
use serde_json::Value;

use crate::constants::{AUTH_CLAIM_NAMESPACE, PROFILE_CLAIM_NAMESPACE};

/// Identity fields pulled out of an access token's payload. The token is
/// never verified here; it was just handed to us by the vendor's token
/// endpoint over TLS.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityClaims {
    pub account_id: Option<String>,
    pub email: Option<String>,
}

fn decode_payload_segment(segment: &str) -> Option<Value> {
    let trimmed = segment.trim_end_matches('=');
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(trimmed)
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Splits the token at dots and parses the middle segment as JSON. Any
/// malformed token yields "no claims" rather than an error.
pub fn decode_identity_claims(access_token: &str) -> Option<IdentityClaims> {
    let mut segments = access_token.split('.');
    let _header = segments.next()?;
    let payload = segments.next()?;
    let claims = decode_payload_segment(payload)?;

    let account_id = claims
        .get(AUTH_CLAIM_NAMESPACE)
        .and_then(|auth| auth.get("chatgpt_account_id"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let email = claims
        .get(PROFILE_CLAIM_NAMESPACE)
        .and_then(|profile| profile.get("email"))
        .and_then(Value::as_str)
        .or_else(|| claims.get("email").and_then(Value::as_str))
        .map(str::to_string);

    Some(IdentityClaims { account_id, email })
}
