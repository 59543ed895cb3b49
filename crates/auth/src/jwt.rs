//! Bearer token verification.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};

use crate::claims::{JwtClaims, TokenValidationError, validate_claims};

/// Verifies a raw bearer token and yields its claims.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError>;
}

/// HMAC-SHA256 shared-secret validator.
///
/// Expiry is carried in our own `issued_at`/`expires_at` claims rather than
/// the registered `exp` claim, so the library's time checks are disabled and
/// [`validate_claims`] runs after the signature check.
pub struct Hs256JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256JwtValidator {
    pub fn new(secret: Vec<u8>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        Self {
            key: DecodingKey::from_secret(&secret),
            validation,
        }
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError> {
        let data = jsonwebtoken::decode::<JwtClaims>(token, &self.key, &self.validation)
            .map_err(|e| TokenValidationError::Malformed(e.to_string()))?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use evently_core::UserId;
    use jsonwebtoken::{EncodingKey, Header};

    use crate::Role;

    fn mint(secret: &[u8], claims: &JwtClaims) -> String {
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret),
        )
        .unwrap()
    }

    fn claims(now: DateTime<Utc>) -> JwtClaims {
        JwtClaims {
            sub: UserId::new(),
            role: Role::ORGANIZER,
            issued_at: now,
            expires_at: now + Duration::minutes(10),
        }
    }

    #[test]
    fn accepts_token_signed_with_same_secret() {
        let now = Utc::now();
        let c = claims(now);
        let token = mint(b"secret", &c);

        let validator = Hs256JwtValidator::new(b"secret".to_vec());
        let decoded = validator.validate(&token, now).unwrap();
        assert_eq!(decoded, c);
    }

    #[test]
    fn rejects_token_signed_with_other_secret() {
        let now = Utc::now();
        let token = mint(b"other", &claims(now));

        let validator = Hs256JwtValidator::new(b"secret".to_vec());
        let err = validator.validate(&token, now).unwrap_err();
        assert!(matches!(err, TokenValidationError::Malformed(_)));
    }

    #[test]
    fn rejects_expired_token_after_signature_check() {
        let now = Utc::now();
        let token = mint(b"secret", &claims(now));

        let validator = Hs256JwtValidator::new(b"secret".to_vec());
        let err = validator.validate(&token, now + Duration::hours(1)).unwrap_err();
        assert_eq!(err, TokenValidationError::Expired);
    }
}
