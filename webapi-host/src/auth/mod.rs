pub mod jwt;
pub mod middleware;

use async_trait::async_trait;
use constant_time_eq::constant_time_eq;
use serde::{Deserialize, Serialize};

pub use jwt::{JwtAuthentication, JwtError, JwtOptions, TokenResponse};

/// The authenticated principal attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub authentication_type: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, authentication_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            authentication_type: authentication_type.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserCredentials {
    pub username: String,
    pub password: String,
}

#[async_trait]
pub trait UserAuthenticator: Send + Sync {
    async fn authenticate(&self, credentials: &UserCredentials) -> Option<Identity>;
}

/// Accepts exactly one client, taken from `jwt.client.user` and
/// `jwt.client.password`. Nothing authenticates when either is unset.
pub struct ConfiguredClientAuthenticator {
    user: Option<String>,
    password: Option<String>,
}

impl ConfiguredClientAuthenticator {
    pub fn new(user: Option<String>, password: Option<String>) -> Self {
        Self { user, password }
    }
}

#[async_trait]
impl UserAuthenticator for ConfiguredClientAuthenticator {
    async fn authenticate(&self, credentials: &UserCredentials) -> Option<Identity> {
        let (Some(user), Some(password)) = (&self.user, &self.password) else {
            return None;
        };

        let user_matches = constant_time_eq(credentials.username.as_bytes(), user.as_bytes());
        let password_matches =
            constant_time_eq(credentials.password.as_bytes(), password.as_bytes());
        if user_matches && password_matches {
            Some(Identity::new(credentials.username.clone(), jwt::AUTHENTICATION_TYPE))
        } else {
            None
        }
    }
}
