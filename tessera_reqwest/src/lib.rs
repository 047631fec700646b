//! Authenticators that attach cached bearer tokens to outgoing requests
//!
//! Each authenticator owns a [`TokenCache`](tessera_tokens::TokenCache) and
//! sets the `Authorization` header of a [`reqwest::Request`] to the current
//! access token. Callers only wait on the token authority when no valid token
//! is cached; stale tokens are replaced in the background.
//!
//! ```
//! use tessera_reqwest::{AuthType, Authenticator, TokenAuthenticator};
//! use tessera_tokens::sources::ConstTokenSource;
//! use reqwest::Client;
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! let authenticator = TokenAuthenticator::new(ConstTokenSource::new("token"), AuthType::Bearer);
//!
//! let mut req = Client::new()
//!     .get("https://example.com")
//!     .build()
//!     .unwrap();
//!
//! authenticator.authenticate(&mut req).await.unwrap();
//! assert_eq!(req.headers()["authorization"], "Bearer token");
//! # }
//! ```
//!
//! Authenticators for a service are usually configured from its environment:
//!
//! ```no_run
//! use tessera_reqwest::AuthenticatorConfig;
//!
//! # fn main() -> Result<(), tessera_reqwest::AuthenticationError> {
//! // Reads INGEST_AUTH_TYPE, INGEST_APIKEY, INGEST_AUTH_URL, ...
//! let authenticator = AuthenticatorConfig::from_env("ingest")?.build()?;
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::fmt;

use async_trait::async_trait;
use reqwest::Request;
use serde::{Deserialize, Serialize};

mod config;
mod error;
mod token;

pub use config::{AssumeConfig, AuthenticatorConfig, ClaimsConfig, IamConfig, DEFAULT_TIMEOUT};
pub use error::AuthenticationError;
pub use token::{AssumeAuthenticator, ClaimsAuthenticator, IamAuthenticator, TokenAuthenticator};

/// The kind of credentials an authenticator exchanges for tokens
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    /// An API key exchanged with IAM
    Iam,
    /// A trusted profile assumed with an IAM user token
    Assume,
    /// An API key exchanged for a claim-scoped token
    Claims,
    /// Any other source of bearer tokens
    Bearer,
}

impl AuthType {
    /// The name used for this kind in configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Iam => "iam",
            Self::Assume => "assume",
            Self::Claims => "claims",
            Self::Bearer => "bearer",
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticates outgoing requests
#[async_trait]
pub trait Authenticator: fmt::Debug + Send + Sync {
    /// The kind of credentials in use
    fn auth_type(&self) -> AuthType;

    /// Sets the `Authorization` header of `request`
    ///
    /// On error, `request` is left untouched.
    async fn authenticate(&self, request: &mut Request) -> Result<(), AuthenticationError>;
}

#[async_trait]
impl<A: Authenticator + ?Sized> Authenticator for Box<A> {
    fn auth_type(&self) -> AuthType {
        (**self).auth_type()
    }

    async fn authenticate(&self, request: &mut Request) -> Result<(), AuthenticationError> {
        (**self).authenticate(request).await
    }
}

#[async_trait]
impl<A: Authenticator + ?Sized> Authenticator for std::sync::Arc<A> {
    fn auth_type(&self) -> AuthType {
        (**self).auth_type()
    }

    async fn authenticate(&self, request: &mut Request) -> Result<(), AuthenticationError> {
        (**self).authenticate(request).await
    }
}
