//! JWT (JSON Web Token) based authentication.
//!
//! Authenticates clients using signed JWTs. The principal role is the `sub`
//! claim and the principal expires with the `exp` claim, so a session
//! re-authenticates when the token runs out.
//!
//! # Configuration
//!
//! Set `RELAYMQ_JWT_SECRET` with the HMAC secret key, or use
//! `RELAYMQ_JWT_RSA_PUBLIC_KEY` / `RELAYMQ_JWT_EC_PUBLIC_KEY` for public key
//! verification.
//!
//! # Example JWT Payload
//!
//! ```json
//! {
//!   "sub": "tenant-a",
//!   "exp": 1735689600,
//!   "iss": "relaymq-auth"
//! }
//! ```

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::carrier::{bearer_credential, AuthenticationDataSource};
use crate::error::{AuthError, AuthResult};
use crate::principal::Principal;
use crate::provider::AuthenticationProvider;

/// Scheme name served by [`JwtProvider`].
pub const JWT_SCHEME: &str = "jwt";

/// JWT claims structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (role identifier).
    pub sub: String,

    /// Expiration time (Unix timestamp).
    pub exp: u64,

    /// Issued at time (Unix timestamp).
    #[serde(default)]
    pub iat: Option<u64>,

    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,

    /// Audience.
    #[serde(default)]
    pub aud: Option<String>,
}

/// JWT provider configuration.
#[derive(Clone)]
pub struct JwtConfig {
    /// Algorithm to use for verification.
    pub algorithm: Algorithm,

    /// Whether to validate expiration.
    pub validate_exp: bool,

    /// Required issuer (if any).
    pub required_issuer: Option<String>,

    /// Required audience (if any).
    pub required_audience: Option<String>,

    /// Leeway in seconds for expiration check.
    pub leeway_secs: u64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::HS256,
            validate_exp: true,
            required_issuer: None,
            required_audience: None,
            leeway_secs: 60,
        }
    }
}

/// Provider that verifies JWTs and maps the subject to a principal.
pub struct JwtProvider {
    decoding_key: DecodingKey,
    config: JwtConfig,
}

impl JwtProvider {
    /// Create a provider with an HMAC secret.
    pub fn with_secret(secret: &[u8]) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            config: JwtConfig::default(),
        }
    }

    /// Create a provider with an HMAC secret string.
    pub fn with_secret_str(secret: &str) -> Self {
        Self::with_secret(secret.as_bytes())
    }

    /// Create a provider with an RSA public key (PEM format).
    pub fn with_rsa_pem(public_key_pem: &[u8]) -> AuthResult<Self> {
        let key = DecodingKey::from_rsa_pem(public_key_pem)
            .map_err(|e| AuthError::failed(format!("invalid RSA public key: {}", e)))?;

        Ok(Self {
            decoding_key: key,
            config: JwtConfig {
                algorithm: Algorithm::RS256,
                ..Default::default()
            },
        })
    }

    /// Create a provider with an EC public key (PEM format).
    pub fn with_ec_pem(public_key_pem: &[u8]) -> AuthResult<Self> {
        let key = DecodingKey::from_ec_pem(public_key_pem)
            .map_err(|e| AuthError::failed(format!("invalid EC public key: {}", e)))?;

        Ok(Self {
            decoding_key: key,
            config: JwtConfig {
                algorithm: Algorithm::ES256,
                ..Default::default()
            },
        })
    }

    /// Load from environment variables.
    ///
    /// Checks in order:
    /// 1. `RELAYMQ_JWT_SECRET` - HMAC secret
    /// 2. `RELAYMQ_JWT_RSA_PUBLIC_KEY` - RSA public key (PEM)
    /// 3. `RELAYMQ_JWT_EC_PUBLIC_KEY` - EC public key (PEM)
    ///
    /// Returns `None` when no key is configured.
    pub fn from_env() -> AuthResult<Option<Self>> {
        if let Ok(secret) = std::env::var("RELAYMQ_JWT_SECRET") {
            return Ok(Some(Self::with_secret_str(&secret)));
        }

        if let Ok(rsa_key) = std::env::var("RELAYMQ_JWT_RSA_PUBLIC_KEY") {
            return Self::with_rsa_pem(rsa_key.as_bytes()).map(Some);
        }

        if let Ok(ec_key) = std::env::var("RELAYMQ_JWT_EC_PUBLIC_KEY") {
            return Self::with_ec_pem(ec_key.as_bytes()).map(Some);
        }

        Ok(None)
    }

    /// Set the required issuer for validation.
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.config.required_issuer = Some(issuer.into());
        self
    }

    /// Set the required audience for validation.
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.config.required_audience = Some(audience.into());
        self
    }

    /// Set the leeway for expiration check.
    pub fn with_leeway(mut self, secs: u64) -> Self {
        self.config.leeway_secs = secs;
        self
    }

    /// Verify a JWT and extract claims.
    pub fn verify_token(&self, token: &str) -> AuthResult<JwtClaims> {
        let mut validation = Validation::new(self.config.algorithm);
        validation.leeway = self.config.leeway_secs;
        validation.validate_exp = self.config.validate_exp;

        if let Some(ref iss) = self.config.required_issuer {
            validation.set_issuer(&[iss]);
        }

        if let Some(ref aud) = self.config.required_audience {
            validation.set_audience(&[aud]);
        }

        let token_data = decode::<JwtClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| AuthError::failed(format!("JWT verification failed: {}", e)))?;

        Ok(token_data.claims)
    }
}

impl AuthenticationProvider for JwtProvider {
    fn scheme(&self) -> &str {
        JWT_SCHEME
    }

    fn authenticate(&self, data: &dyn AuthenticationDataSource) -> AuthResult<Principal> {
        let token = bearer_credential(data).ok_or_else(|| AuthError::failed("no JWT presented"))?;
        let claims = self.verify_token(token)?;

        if claims.sub.is_empty() {
            return Err(AuthError::failed("JWT has an empty subject"));
        }

        let principal = Principal::new(claims.sub);
        Ok(
            match i64::try_from(claims.exp)
                .ok()
                .and_then(|exp| DateTime::<Utc>::from_timestamp(exp, 0))
            {
                Some(exp) => principal.with_expiry(exp),
                None => principal,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::{ConnectionCarrier, HttpData};
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn create_test_token(secret: &str, claims: &JwtClaims) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn test_claims() -> JwtClaims {
        JwtClaims {
            sub: "tenant-a".to_string(),
            exp: (Utc::now().timestamp() as u64) + 3600,
            iat: None,
            iss: None,
            aud: None,
        }
    }

    fn command(data: String) -> ConnectionCarrier {
        let mut carrier = ConnectionCarrier::new();
        carrier.set_command_data(data);
        carrier
    }

    #[test]
    fn test_authenticate_valid_token() {
        let secret = "test-secret-key-for-testing";
        let provider = JwtProvider::with_secret_str(secret);
        let claims = test_claims();

        let principal = provider
            .authenticate(&command(create_test_token(secret, &claims)))
            .unwrap();
        assert_eq!(principal.role(), "tenant-a");
        assert_eq!(
            principal.expires_at().map(|e| e.timestamp() as u64),
            Some(claims.exp)
        );
    }

    #[test]
    fn test_http_bearer_header() {
        let secret = "test-secret-key-for-testing";
        let provider = JwtProvider::with_secret_str(secret);
        let token = create_test_token(secret, &test_claims());

        let mut carrier = ConnectionCarrier::new();
        carrier.set_http(HttpData::new(JWT_SCHEME).with_header("Authorization", format!("Bearer {}", token)));

        assert!(provider.authenticate(&carrier).is_ok());
    }

    #[test]
    fn test_signature_mismatch() {
        let provider = JwtProvider::with_secret_str("correct-secret");
        let bad_token = create_test_token("wrong-secret", &test_claims());

        let err = provider.authenticate(&command(bad_token)).unwrap_err();
        assert!(matches!(err, AuthError::AuthenticationFailed { .. }));
    }

    #[test]
    fn test_expired_token() {
        let secret = "test-secret";
        let provider = JwtProvider::with_secret_str(secret);

        let mut claims = test_claims();
        claims.exp = 1;

        assert!(provider
            .authenticate(&command(create_test_token(secret, &claims)))
            .is_err());
    }

    #[test]
    fn test_malformed_token() {
        let provider = JwtProvider::with_secret_str("secret");
        assert!(provider.authenticate(&command("not-a-jwt".into())).is_err());
        assert!(provider.authenticate(&ConnectionCarrier::new()).is_err());
    }

    #[test]
    fn test_issuer_validation() {
        let secret = "test-secret";
        let provider = JwtProvider::with_secret_str(secret).with_issuer("trusted-issuer");

        let mut claims = test_claims();
        claims.iss = Some("trusted-issuer".to_string());
        assert!(provider
            .authenticate(&command(create_test_token(secret, &claims)))
            .is_ok());

        claims.iss = Some("untrusted-issuer".to_string());
        assert!(provider
            .authenticate(&command(create_test_token(secret, &claims)))
            .is_err());
    }
}
