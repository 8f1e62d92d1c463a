//! JWT issuing and validation (HS256).
//!
//! Tokens carry the authenticated user in both `sub` and `name`. Issuer and
//! audience are only checked when configured.

use super::{Identity, UserAuthenticator, UserCredentials};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use validator::Validate;

pub const AUTHENTICATION_TYPE: &str = "Bearer";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JwtError {
    #[error("JWT has expired")]
    TokenExpired,
    #[error("invalid JWT signature")]
    InvalidSignature,
    #[error("JWT issuer or audience mismatch")]
    InvalidIssuerOrAudience,
    #[error("malformed JWT: {0}")]
    MalformedToken(String),
    #[error("JWT could not be issued: {0}")]
    Encoding(String),
}

fn default_expiration_secs() -> u64 {
    3600
}

fn default_token_path() -> String {
    "/token".to_string()
}

/// Options bound from the `jwt` configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct JwtOptions {
    #[validate(length(min = 16))]
    pub secret_key: String,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default = "default_expiration_secs")]
    #[validate(range(min = 1))]
    pub expiration_secs: u64,
    #[serde(default = "default_token_path")]
    pub token_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub name: String,
    pub jti: String,
    pub iat: u64,
    pub exp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
}

pub struct JwtAuthentication {
    options: JwtOptions,
    authenticator: Arc<dyn UserAuthenticator>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl JwtAuthentication {
    pub fn new(options: JwtOptions, authenticator: Arc<dyn UserAuthenticator>) -> Self {
        let secret = options.secret_key.as_bytes();
        let mut validation = Validation::new(Algorithm::HS256);
        match &options.issuer {
            Some(issuer) => validation.set_issuer(&[issuer]),
            None => validation.iss = None,
        }
        match &options.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            options,
            authenticator,
        }
    }

    pub fn options(&self) -> &JwtOptions {
        &self.options
    }

    /// Runs the configured user check and issues a token for the resulting
    /// identity. `Ok(None)` means the credentials were rejected.
    pub async fn authenticate(
        &self,
        credentials: &UserCredentials,
    ) -> Result<Option<TokenResponse>, JwtError> {
        match self.authenticator.authenticate(credentials).await {
            Some(identity) => self.issue_token(&identity).map(Some),
            None => Ok(None),
        }
    }

    pub fn issue_token(&self, identity: &Identity) -> Result<TokenResponse, JwtError> {
        let iat = now_secs();
        let claims = Claims {
            sub: identity.name.clone(),
            name: identity.name.clone(),
            jti: uuid::Uuid::new_v4().to_string(),
            iat,
            exp: iat + self.options.expiration_secs,
            iss: self.options.issuer.clone(),
            aud: self.options.audience.clone(),
        };

        let access_token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| JwtError::Encoding(e.to_string()))?;

        Ok(TokenResponse {
            access_token,
            token_type: AUTHENTICATION_TYPE.to_string(),
            expires_in: self.options.expiration_secs,
        })
    }

    pub fn validate_token(&self, token: &str) -> Result<Identity, JwtError> {
        let data =
            decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(map_jwt_error)?;
        Ok(Identity::new(data.claims.name, AUTHENTICATION_TYPE))
    }
}

fn map_jwt_error(error: jsonwebtoken::errors::Error) -> JwtError {
    use jsonwebtoken::errors::ErrorKind;

    match error.kind() {
        ErrorKind::ExpiredSignature => JwtError::TokenExpired,
        ErrorKind::InvalidSignature => JwtError::InvalidSignature,
        ErrorKind::InvalidIssuer | ErrorKind::InvalidAudience => JwtError::InvalidIssuerOrAudience,
        _ => JwtError::MalformedToken(error.to_string()),
    }
}

#[cfg(test)]
pub(crate) fn test_options() -> JwtOptions {
    JwtOptions {
        secret_key: "a-test-secret-of-sufficient-length".to_string(),
        issuer: Some("webapi-host".to_string()),
        audience: Some("webapi-clients".to_string()),
        expiration_secs: 600,
        token_path: default_token_path(),
    }
}
