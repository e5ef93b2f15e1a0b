//! Signed access and refresh tokens.

use chrono::{Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::auth::{ClientContext, UserId};
use crate::security::random_token;

/// Default access token lifetime (1 hour)
pub const ACCESS_TOKEN_TTL: Duration = Duration::hours(1);

/// Default refresh token lifetime (7 days)
pub const REFRESH_TOKEN_TTL: Duration = Duration::days(7);

/// Which kind of token a set of claims belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

/// Claims carried by an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub user_id: UserId,
    pub username: String,
    pub session_id: String,
    pub fingerprint: String,
    pub ip_address: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(rename = "type")]
    pub token_type: TokenType,
}

/// Claims carried by a refresh token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub user_id: UserId,
    pub session_id: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(rename = "type")]
    pub token_type: TokenType,
}

/// Why a token was refused
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,

    #[error("token malformed or signature invalid")]
    Invalid,

    #[error("unexpected token type")]
    WrongType,

    #[error("token encoding failed: {0}")]
    Encoding(jsonwebtoken::errors::Error),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid,
        }
    }
}

/// HS256 token encoder/decoder.
///
/// Holds only the signing keys and lifetimes, so one instance is shared by
/// every request.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenCodec {
    /// Create a codec with the default 1h/7d lifetimes
    pub fn new(secret: &str) -> Self {
        Self::with_lifetimes(secret, ACCESS_TOKEN_TTL, REFRESH_TOKEN_TTL)
    }

    /// Create a codec with explicit token lifetimes
    pub fn with_lifetimes(secret: &str, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Mint an access token under a brand-new session id.
    ///
    /// # Returns
    ///
    /// * `(token, session_id)`
    pub fn encode_access(
        &self,
        user_id: UserId,
        username: &str,
        client: &ClientContext,
    ) -> Result<(String, String), TokenError> {
        let session_id = random_token(32);
        let token = self.encode_access_for_session(user_id, username, &session_id, client)?;
        Ok((token, session_id))
    }

    /// Mint an access token for an existing session id (used by refresh).
    pub fn encode_access_for_session(
        &self,
        user_id: UserId,
        username: &str,
        session_id: &str,
        client: &ClientContext,
    ) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = AccessClaims {
            user_id,
            username: username.to_string(),
            session_id: session_id.to_string(),
            fingerprint: client.fingerprint(),
            ip_address: client.ip_address.clone(),
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
            token_type: TokenType::Access,
        };

        self.sign(&claims)
    }

    /// Mint a refresh token bound to a session id
    pub fn encode_refresh(&self, user_id: UserId, session_id: &str) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = RefreshClaims {
            user_id,
            session_id: session_id.to_string(),
            iat: now.timestamp(),
            exp: (now + self.refresh_ttl).timestamp(),
            token_type: TokenType::Refresh,
        };

        self.sign(&claims)
    }

    pub fn decode_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        self.decode(token, TokenType::Access)
    }

    pub fn decode_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        self.decode(token, TokenType::Refresh)
    }

    /// Verify signature and expiry in one step, then check the `type` claim
    /// before shaping the payload into `C`.
    pub fn decode<C: DeserializeOwned>(
        &self,
        token: &str,
        expected: TokenType,
    ) -> Result<C, TokenError> {
        let data = decode::<serde_json::Value>(token, &self.decoding_key, &self.validation)?;

        let token_type = data.claims.get("type").and_then(serde_json::Value::as_str);
        if token_type != Some(expected.as_str()) {
            return Err(TokenError::WrongType);
        }

        serde_json::from_value(data.claims).map_err(|_| TokenError::Invalid)
    }

    fn sign<C: Serialize>(&self, claims: &C) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(TokenError::Encoding)
    }
}
