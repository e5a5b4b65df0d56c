//! Signing and verification of session tokens

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::Secret;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{Result, VerifyError};

type HmacSha256 = Hmac<Sha256>;

const FIELD_SEPARATOR: char = '|';

/// Tolerated clock drift between proxy replicas sharing one seed.
const MAX_CLOCK_SKEW: Duration = Duration::from_secs(60);

/// Sign `value` for the cookie `name` at time `now`.
///
/// Output depends only on the inputs: the same seed, name, value and second
/// always produce the same token.
pub fn sign(seed: &[u8], name: &str, value: &str, now: SystemTime) -> String {
    let payload = URL_SAFE_NO_PAD.encode(value.as_bytes());
    let issued_at = unix_secs(now).to_string();
    let signature = URL_SAFE_NO_PAD.encode(compute_mac(seed, name, &payload, &issued_at));
    format!("{payload}{FIELD_SEPARATOR}{issued_at}{FIELD_SEPARATOR}{signature}")
}

/// Verify a token produced by [`sign`] and return the embedded value.
///
/// Fails closed on any structural problem. The MAC is checked before the
/// payload is decoded, and the comparison runs in constant time.
pub fn verify(
    seed: &[u8],
    name: &str,
    token: &str,
    now: SystemTime,
    max_age: Duration,
) -> Result<String> {
    let mut fields = token.split(FIELD_SEPARATOR);
    let (Some(payload), Some(issued_at), Some(signature), None) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(VerifyError::Malformed("expected three fields"));
    };

    if issued_at.is_empty() || !issued_at.bytes().all(|b| b.is_ascii_digit()) {
        return Err(VerifyError::Malformed("issue time is not a unix timestamp"));
    }
    let issued_secs: u64 = issued_at
        .parse()
        .map_err(|_| VerifyError::Malformed("issue time out of range"))?;

    let provided = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| VerifyError::Malformed("signature is not base64url"))?;
    let expected = compute_mac(seed, name, payload, issued_at);
    if !bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
        return Err(VerifyError::BadSignature);
    }

    let now_secs = unix_secs(now);
    if issued_secs > now_secs.saturating_add(MAX_CLOCK_SKEW.as_secs()) {
        return Err(VerifyError::FromFuture);
    }
    let age_secs = now_secs.saturating_sub(issued_secs);
    if age_secs > max_age.as_secs() {
        return Err(VerifyError::Expired {
            age_secs,
            max_age_secs: max_age.as_secs(),
        });
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| VerifyError::Malformed("payload is not base64url"))?;
    String::from_utf8(bytes).map_err(|_| VerifyError::Malformed("payload is not UTF-8"))
}

fn compute_mac(seed: &[u8], name: &str, payload: &str, issued_at: &str) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(seed).expect("HMAC accepts keys of any length");
    mac.update(name.as_bytes());
    mac.update(b"|");
    mac.update(payload.as_bytes());
    mac.update(b"|");
    mac.update(issued_at.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// A cookie name, seed and lifetime bundled together.
///
/// Built once at startup and shared read-only across requests.
#[derive(Debug, Clone)]
pub struct CookieCodec {
    name: String,
    seed: Secret<String>,
    max_age: Duration,
}

impl CookieCodec {
    pub fn new(name: impl Into<String>, seed: Secret<String>, max_age: Duration) -> Self {
        Self {
            name: name.into(),
            seed,
            max_age,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Produce a fresh token for `value`, issued at `now`.
    pub fn seal(&self, value: &str, now: SystemTime) -> String {
        sign(self.seed.expose().as_bytes(), &self.name, value, now)
    }

    /// Check a token presented at `now` against this codec's seed and lifetime.
    pub fn open(&self, token: &str, now: SystemTime) -> Result<String> {
        verify(
            self.seed.expose().as_bytes(),
            &self.name,
            token,
            now,
            self.max_age,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: &[u8] = b"0123456789abcdef-cookie-seed";
    const NAME: &str = "_oauthproxy";
    const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn signed_value_verifies_within_lifetime() {
        let token = sign(SEED, NAME, "alice@example.com", at(1_700_000_000));

        for later in [0, 1, 3600, WEEK.as_secs()] {
            let value = verify(SEED, NAME, &token, at(1_700_000_000 + later), WEEK).unwrap();
            assert_eq!(value, "alice@example.com", "offset {later}s must verify");
        }
    }

    #[test]
    fn token_layout_has_three_fields() {
        let token = sign(SEED, NAME, "authenticated", at(42));
        let fields: Vec<&str> = token.split('|').collect();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0], URL_SAFE_NO_PAD.encode("authenticated"));
        assert_eq!(fields[1], "42");
        // HMAC-SHA256 is 32 bytes → 43 base64url chars
        assert_eq!(fields[2].len(), 43);
    }

    #[test]
    fn signing_is_deterministic() {
        let a = sign(SEED, NAME, "v", at(100));
        let b = sign(SEED, NAME, "v", at(100));
        assert_eq!(a, b);
        assert_ne!(a, sign(SEED, NAME, "v", at(101)));
    }

    #[test]
    fn flipping_any_byte_fails_verification() {
        let token = sign(SEED, NAME, "alice@example.com", at(1_000));
        let bytes = token.as_bytes();

        for i in 0..bytes.len() {
            let mut tampered = bytes.to_vec();
            tampered[i] ^= 0x01;
            let tampered = String::from_utf8(tampered).unwrap();
            assert!(
                verify(SEED, NAME, &tampered, at(1_000), WEEK).is_err(),
                "flipping byte {i} of {token} must be detected"
            );
        }
    }

    #[test]
    fn expired_token_is_rejected_even_with_valid_signature() {
        let token = sign(SEED, NAME, "alice@example.com", at(1_000));
        let err = verify(SEED, NAME, &token, at(1_000 + WEEK.as_secs() + 1), WEEK).unwrap_err();
        assert_eq!(
            err,
            VerifyError::Expired {
                age_secs: WEEK.as_secs() + 1,
                max_age_secs: WEEK.as_secs(),
            }
        );
    }

    #[test]
    fn rotated_seed_rejects_old_tokens() {
        let token = sign(b"old-seed", NAME, "alice@example.com", at(1_000));
        assert_eq!(
            verify(b"new-seed", NAME, &token, at(1_000), WEEK),
            Err(VerifyError::BadSignature)
        );
    }

    #[test]
    fn token_is_bound_to_cookie_name() {
        let token = sign(SEED, "_other_cookie", "alice@example.com", at(1_000));
        assert_eq!(
            verify(SEED, NAME, &token, at(1_000), WEEK),
            Err(VerifyError::BadSignature)
        );
    }

    #[test]
    fn malformed_tokens_fail_closed() {
        let cases = [
            "",
            "onlyonefield",
            "a|b",
            "a|1|sig|extra",
            "YWJj|notanumber|c2ln",
            "YWJj||c2ln",
            "YWJj|-5|c2ln",
            "YWJj|+5|c2ln",
            "YWJj|99999999999999999999999|c2ln",
            "YWJj|5|not base64!",
        ];
        for case in cases {
            assert!(
                matches!(
                    verify(SEED, NAME, case, at(10), WEEK),
                    Err(VerifyError::Malformed(_))
                ),
                "{case:?} must be rejected as malformed"
            );
        }
    }

    #[test]
    fn forged_signature_over_new_payload_is_rejected() {
        let genuine = sign(SEED, NAME, "mallory@evil.test", at(1_000));
        let sig = genuine.rsplit('|').next().unwrap();
        let forged = format!(
            "{}|1000|{sig}",
            URL_SAFE_NO_PAD.encode("admin@example.com")
        );
        assert_eq!(
            verify(SEED, NAME, &forged, at(1_000), WEEK),
            Err(VerifyError::BadSignature)
        );
    }

    #[test]
    fn token_from_the_future_is_rejected() {
        let token = sign(SEED, NAME, "v", at(10_000));
        assert_eq!(
            verify(SEED, NAME, &token, at(1_000), WEEK),
            Err(VerifyError::FromFuture)
        );
        // small drift between replicas is tolerated
        assert!(verify(SEED, NAME, &token, at(10_000 - 30), WEEK).is_ok());
    }

    #[test]
    fn codec_round_trips_and_enforces_lifetime() {
        let codec = CookieCodec::new(NAME, Secret::new("seed".to_string()), WEEK);
        let now = SystemTime::now();
        let token = codec.seal("authenticated", now);

        assert_eq!(codec.open(&token, now).unwrap(), "authenticated");
        assert!(codec.open(&token, now + WEEK + Duration::from_secs(2)).is_err());
        assert_eq!(codec.name(), NAME);
        assert_eq!(codec.max_age(), WEEK);
    }

    #[test]
    fn codec_debug_redacts_seed() {
        let codec = CookieCodec::new(NAME, Secret::new("super-secret-seed".to_string()), WEEK);
        let debug = format!("{codec:?}");
        assert!(!debug.contains("super-secret-seed"), "got: {debug}");
    }
}
