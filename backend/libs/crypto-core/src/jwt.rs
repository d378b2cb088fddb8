/// Shared JWT module for campus services
///
/// Tokens carry the user's email as the identity claim. Two decode paths exist:
///
/// - [`JwtKeys::validate_token`] is the strict path used by HTTP access control:
///   signature, structure, and expiry are all enforced.
/// - [`JwtKeys::inspect_token`] is the identity path used by the messaging layer:
///   signature and structure are enforced, but an elapsed `exp` is reported as
///   [`TokenStatus::Expired`] instead of failing.
///
/// ## Key material
///
/// Keys are held in an immutable [`JwtKeys`] value built once at startup and
/// shared behind an `Arc`. HS256 (shared secret) and RS256 (PEM key pair) are
/// supported; RS256 services that only validate tokens may omit the private key.
use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 24 * 3600;

/// HMAC secrets shorter than this are rejected at startup
pub const MIN_SECRET_LEN: usize = 32;

pub const ACCESS_TOKEN_TYPE: &str = "access";

// ============================================================================
// Data Structures
// ============================================================================

/// JWT claims issued by the auth endpoints
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Claims {
    /// Subject (user email)
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    #[serde(default)]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Claims {
    /// The identity embedded in the token: the `email` claim when present and
    /// usable, otherwise the subject. Blank values and values carrying control
    /// characters are not identities.
    pub fn identity(&self) -> Option<&str> {
        self.email
            .as_deref()
            .and_then(usable_identity)
            .or_else(|| usable_identity(&self.sub))
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        self.exp <= now
    }
}

/// Trimmed identity, `None` when blank or when it contains a control
/// character such as `\n` or `\0`
pub fn usable_identity(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty() && !value.chars().any(char::is_control)).then_some(value)
}

/// Outcome of an expiry-tolerant decode
#[derive(Debug, Clone, PartialEq)]
pub enum TokenStatus {
    Valid(Claims),
    Expired(Claims),
}

impl TokenStatus {
    pub fn claims(&self) -> &Claims {
        match self {
            TokenStatus::Valid(c) | TokenStatus::Expired(c) => c,
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, TokenStatus::Expired(_))
    }
}

/// Token response returned by the login endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

// ============================================================================
// Key Storage
// ============================================================================

/// Signing and verification keys for one service instance
#[derive(Clone)]
pub struct JwtKeys {
    algorithm: Algorithm,
    encoding: Option<EncodingKey>,
    decoding: DecodingKey,
    access_ttl: Duration,
}

impl std::fmt::Debug for JwtKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtKeys")
            .field("algorithm", &self.algorithm)
            .field("can_sign", &self.encoding.is_some())
            .field("access_ttl_secs", &self.access_ttl.num_seconds())
            .finish()
    }
}

impl JwtKeys {
    /// HS256 keys from a shared secret (at least [`MIN_SECRET_LEN`] bytes)
    pub fn from_secret(secret: &[u8]) -> Result<Self> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(anyhow!(
                "JWT secret must be at least {MIN_SECRET_LEN} bytes, got {}",
                secret.len()
            ));
        }

        Ok(Self {
            algorithm: Algorithm::HS256,
            encoding: Some(EncodingKey::from_secret(secret)),
            decoding: DecodingKey::from_secret(secret),
            access_ttl: Duration::seconds(DEFAULT_ACCESS_TOKEN_TTL_SECS),
        })
    }

    /// RS256 keys from PEM strings. Without a private key the keys can only
    /// validate tokens.
    pub fn from_rsa_pem(private_key_pem: Option<&str>, public_key_pem: &str) -> Result<Self> {
        let encoding = private_key_pem
            .map(|pem| {
                EncodingKey::from_rsa_pem(pem.as_bytes())
                    .map_err(|e| anyhow!("Failed to parse RSA private key: {e}"))
            })
            .transpose()?;

        let decoding = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| anyhow!("Failed to parse RSA public key: {e}"))?;

        Ok(Self {
            algorithm: Algorithm::RS256,
            encoding,
            decoding,
            access_ttl: Duration::seconds(DEFAULT_ACCESS_TOKEN_TTL_SECS),
        })
    }

    pub fn with_access_ttl_secs(mut self, secs: i64) -> Self {
        self.access_ttl = Duration::seconds(secs);
        self
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn access_ttl_secs(&self) -> i64 {
        self.access_ttl.num_seconds()
    }

    // ========================================================================
    // Token Generation
    // ========================================================================

    /// Issue an access token for `email`
    pub fn generate_access_token(&self, email: &str, role: Option<&str>) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: email.to_string(),
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
            token_type: ACCESS_TOKEN_TYPE.to_string(),
            email: Some(email.to_string()),
            role: role.map(str::to_string),
        };
        self.encode_claims(&claims)
    }

    /// Sign arbitrary claims with this instance's key
    pub fn encode_claims(&self, claims: &Claims) -> Result<String> {
        let encoding_key = self
            .encoding
            .as_ref()
            .ok_or_else(|| anyhow!("JWT signing key not configured (validation-only keys)"))?;

        encode(&Header::new(self.algorithm), claims, encoding_key)
            .map_err(|e| anyhow!("Failed to generate token: {e}"))
    }

    pub fn token_response(&self, email: &str, role: Option<&str>) -> Result<TokenResponse> {
        Ok(TokenResponse {
            access_token: self.generate_access_token(email, role)?,
            token_type: "Bearer".to_string(),
            expires_in: self.access_ttl.num_seconds(),
        })
    }

    // ========================================================================
    // Token Validation
    // ========================================================================

    /// Validate signature, structure, and expiry
    pub fn validate_token(&self, token: &str) -> Result<TokenData<Claims>> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = true;

        decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| anyhow!("Token validation failed: {e}"))
    }

    /// Validate signature and structure; report expiry instead of rejecting it
    pub fn inspect_token(&self, token: &str) -> Result<TokenStatus> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = false;

        let data = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| anyhow!("Token decode failed: {e}"))?;

        if data.claims.is_expired_at(Utc::now().timestamp()) {
            Ok(TokenStatus::Expired(data.claims))
        } else {
            Ok(TokenStatus::Valid(data.claims))
        }
    }

    /// Identity claim from a token, tolerating expiry
    pub fn extract_identity(&self, token: &str) -> Result<String> {
        let status = self.inspect_token(token)?;
        status
            .claims()
            .identity()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Token carries no identity claim"))
    }
}

// ============================================================================
// Tests
// ============================================================================
