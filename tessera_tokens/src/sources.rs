//! Token sources

use std::{convert::Infallible, error, sync::Arc};

use async_trait::async_trait;
use tessera_clock::{Clock, DurationSecs, System};

use crate::{AccessToken, RefreshToken, TokenData, TokenLifetimeConfig};

pub mod api_key;
pub mod assume;
pub mod claims;
pub mod dto;
mod http;

pub use api_key::ApiKeyTokenSource;
pub use assume::{AssumeTokenSource, TrustedProfile};
pub use claims::ClaimsTokenSource;

/// An asynchronous source for tokens
///
/// Each call performs one exchange with the authority. Sources do no
/// caching of their own; wrap them in a [`TokenCache`][crate::TokenCache].
#[async_trait]
pub trait AsyncTokenSource: Send + Sync {
    /// The error type returned in the event that retrieving a token fails
    type Error: error::Error + Send + Sync + 'static;

    /// Requests a token from an asynchronous source
    async fn request_token(&self) -> Result<TokenData, Self::Error>;
}

#[async_trait]
impl<S: AsyncTokenSource + ?Sized> AsyncTokenSource for Arc<S> {
    type Error = S::Error;

    async fn request_token(&self) -> Result<TokenData, Self::Error> {
        (**self).request_token().await
    }
}

/// A token source that always hands out the same access token
///
/// Each token is issued anew with the configured lifetime.
#[derive(Debug)]
pub struct ConstTokenSource<C = System> {
    token: AccessToken,
    lifetime: DurationSecs,
    lifetime_config: TokenLifetimeConfig<C>,
}

impl ConstTokenSource {
    /// Constructs a source handing out `token`, valid for an hour at a time
    pub fn new(token: impl Into<AccessToken>) -> Self {
        Self {
            token: token.into(),
            lifetime: DurationSecs(3600),
            lifetime_config: TokenLifetimeConfig::default(),
        }
    }
}

impl<C> ConstTokenSource<C> {
    /// Sets the lifetime of each issued token
    pub fn with_lifetime(mut self, lifetime: DurationSecs) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Sets the lifetime configuration used to issue tokens
    pub fn with_lifetime_config<D>(self, lifetime_config: TokenLifetimeConfig<D>) -> ConstTokenSource<D> {
        ConstTokenSource {
            token: self.token,
            lifetime: self.lifetime,
            lifetime_config,
        }
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> AsyncTokenSource for ConstTokenSource<C> {
    type Error = Infallible;

    async fn request_token(&self) -> Result<TokenData, Self::Error> {
        Ok(self
            .lifetime_config
            .issue_token(self.token.clone(), None::<RefreshToken>, self.lifetime))
    }
}
