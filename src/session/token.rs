use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: Option<i64>,
}

/// Reads the `exp` claim of a JWT bearer token without checking its signature.
///
/// Bearer tokens are opaque to this crate; this only lets bootstrap skip a
/// pointless round-trip when the token is a JWT that has visibly expired.
/// Returns `None` for opaque tokens and for JWTs without `exp`.
pub fn expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<ExpiryClaim>(token, &DecodingKey::from_secret(&[]), &validation).ok()?;
    data.claims
        .exp
        .and_then(|exp| Utc.timestamp_opt(exp, 0).single())
}

pub fn is_expired(token: &str, now: DateTime<Utc>) -> bool {
    expiry(token).map_or(false, |exp| exp <= now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct Claims {
        sub: String,
        exp: i64,
    }

    fn jwt(exp: i64) -> String {
        let claims = Claims {
            sub: "user-1".to_string(),
            exp,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret("server-side-secret".as_ref()),
        )
        .expect("Failed to encode JWT")
    }

    #[test]
    fn test_expired_jwt_is_detected() {
        let now = Utc::now();
        let token = jwt(now.timestamp() - 60);
        assert!(is_expired(&token, now));
    }

    #[test]
    fn test_live_jwt_is_not_expired() {
        let now = Utc::now();
        let token = jwt(now.timestamp() + 3600);
        assert!(!is_expired(&token, now));
        assert_eq!(
            expiry(&token).map(|e| e.timestamp()),
            Some(now.timestamp() + 3600)
        );
    }

    #[test]
    fn test_opaque_token_has_no_expiry() {
        assert_eq!(expiry("3f2a9c1e-opaque"), None);
        assert!(!is_expired("3f2a9c1e-opaque", Utc::now()));
    }
}
