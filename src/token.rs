// Access token codec
// Decodes the expiry claim embedded in a JWT without validating the
// signature. An unreadable token is reported as already expired, never as
// an error.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: i64,
}

/// Decode the `exp` claim of `token` to epoch milliseconds.
///
/// Returns 0 (the epoch, always in the past) when the token cannot be read,
/// so a malformed token is never mistaken for a valid one.
pub fn decode_expiry_ms(token: &str) -> i64 {
    parse_expiry(token).unwrap_or(0)
}

fn parse_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claim: ExpiryClaim = serde_json::from_slice(&bytes).ok()?;
    claim.exp.checked_mul(1000)
}

/// Whether `token` is expired right now (or unreadable).
pub fn is_expired(token: &str) -> bool {
    Utc::now().timestamp_millis() >= decode_expiry_ms(token)
}

/// Time remaining before `token` expires, floored at zero.
pub fn time_until_expiry(token: &str) -> Duration {
    let remaining = decode_expiry_ms(token) - Utc::now().timestamp_millis();
    Duration::from_millis(remaining.max(0) as u64)
}

/// Build an unsigned token whose `exp` claim lies `ttl_secs` from now.
/// Available in test builds and integration tests.
#[cfg(any(test, feature = "test-utils"))]
pub fn forge_token(ttl_secs: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let exp = Utc::now().timestamp() + ttl_secs;
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#));
    format!("{header}.{payload}.forged")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decode_forged_expiry() {
        let token = forge_token(600);
        let expiry = decode_expiry_ms(&token);
        let now = Utc::now().timestamp_millis();

        assert!(expiry > now);
        assert!(expiry <= now + 601_000);
    }

    #[test]
    fn test_malformed_tokens_are_expired() {
        assert!(is_expired(""));
        assert!(is_expired("not-a-token"));
        assert!(is_expired("a.b.c"));
        assert!(is_expired("a.!!!not-base64!!!.c"));
        // valid base64 but not JSON
        let payload = URL_SAFE_NO_PAD.encode(b"plain text");
        assert!(is_expired(&format!("h.{payload}.s")));
    }

    #[test]
    fn test_missing_exp_claim_is_expired() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"1"}"#);
        assert!(is_expired(&format!("h.{payload}.s")));
    }

    #[test]
    fn test_valid_token_is_not_expired() {
        assert!(!is_expired(&forge_token(600)));
        assert!(is_expired(&forge_token(-600)));
    }

    #[test]
    fn test_time_until_expiry_floors_at_zero() {
        assert_eq!(time_until_expiry(&forge_token(-600)), Duration::ZERO);
        assert_eq!(time_until_expiry("garbage"), Duration::ZERO);
    }

    #[test]
    fn test_time_until_expiry_never_increases() {
        let token = forge_token(600);
        let first = time_until_expiry(&token);
        let second = time_until_expiry(&token);
        assert!(second <= first);
    }

    #[test]
    fn test_expiry_a_thousand_seconds_out() {
        let token = forge_token(1000);
        let remaining = time_until_expiry(&token);
        assert!(remaining <= Duration::from_millis(1_000_000));
        assert!(remaining >= Duration::from_millis(998_000));
    }

    proptest! {
        #[test]
        fn arbitrary_strings_never_validate(s in "[A-Za-z0-9_-]{0,64}") {
            // no dot-separated payload segment, so the decode must fail closed
            prop_assert!(is_expired(&s));
        }

        #[test]
        fn forged_ttl_round_trips(ttl in 1i64..=86_400) {
            let token = forge_token(ttl);
            let remaining = time_until_expiry(&token);
            prop_assert!(remaining <= Duration::from_secs(ttl as u64));
            prop_assert!(
                remaining >= Duration::from_secs(ttl as u64).saturating_sub(Duration::from_secs(5))
            );
        }
    }
}
