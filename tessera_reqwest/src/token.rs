use std::{fmt, sync::Arc};

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use reqwest::{header, Request};
use tessera_clock::{Clock, System};
use tessera_tokens::{
    sources::{ApiKeyTokenSource, AssumeTokenSource, AsyncTokenSource, ClaimsTokenSource},
    AccessToken, AccessTokenRef, TokenCache, TokenData,
};

use crate::{AuthType, AuthenticationError, Authenticator};

/// Authenticates with an API key exchanged for IAM access tokens
pub type IamAuthenticator = TokenAuthenticator<ApiKeyTokenSource>;

/// Authenticates as a trusted profile assumed with an IAM user token
pub type AssumeAuthenticator = TokenAuthenticator<AssumeTokenSource>;

/// Authenticates with claim-scoped tokens
pub type ClaimsAuthenticator = TokenAuthenticator<ClaimsTokenSource>;

/// Attaches tokens from a [`TokenCache`] to outgoing requests
///
/// Clones share the same cache.
pub struct TokenAuthenticator<S: AsyncTokenSource, C = System> {
    cache: TokenCache<S, C>,
    auth_type: AuthType,
}

impl<S: AsyncTokenSource> TokenAuthenticator<S> {
    /// Constructs an authenticator with an empty cache in front of `source`
    pub fn new(source: S, auth_type: AuthType) -> Self {
        Self::from_cache(TokenCache::new(source), auth_type)
    }
}

impl<S: AsyncTokenSource, C> TokenAuthenticator<S, C> {
    /// Constructs an authenticator around an existing cache
    pub fn from_cache(cache: TokenCache<S, C>, auth_type: AuthType) -> Self {
        Self { cache, auth_type }
    }

    /// The cache tokens are taken from
    pub fn cache(&self) -> &TokenCache<S, C> {
        &self.cache
    }

    /// The currently cached token, without any validity check
    pub fn token_data(&self) -> Option<Arc<TokenData>> {
        self.cache.token_data()
    }

    /// The error of the last background refresh, if it failed
    pub fn last_refresh_error(&self) -> Option<Arc<S::Error>> {
        self.cache.last_refresh_error()
    }
}

impl<S, C> TokenAuthenticator<S, C>
where
    S: AsyncTokenSource + 'static,
    S::Error: Into<AuthenticationError>,
    C: Clock + Send + Sync + 'static,
{
    /// Gets a valid access token
    pub async fn token(&self) -> Result<AccessToken, AuthenticationError> {
        self.cache.token().await.map_err(Into::into)
    }
}

fn bearer_header(token: &AccessTokenRef) -> Result<header::HeaderValue, AuthenticationError> {
    let mut header_value = BytesMut::with_capacity(token.as_str().len() + 7);
    header_value.put_slice(b"Bearer ");
    header_value.put_slice(token.as_str().as_bytes());
    let mut value = header::HeaderValue::from_maybe_shared(header_value.freeze()).map_err(|_| {
        AuthenticationError::InvalidResponse(
            "access token contains bytes not allowed in a header".into(),
        )
    })?;
    value.set_sensitive(true);
    Ok(value)
}

#[async_trait]
impl<S, C> Authenticator for TokenAuthenticator<S, C>
where
    S: AsyncTokenSource + fmt::Debug + 'static,
    S::Error: Into<AuthenticationError>,
    C: Clock + fmt::Debug + Send + Sync + 'static,
{
    fn auth_type(&self) -> AuthType {
        self.auth_type
    }

    async fn authenticate(&self, request: &mut Request) -> Result<(), AuthenticationError> {
        let token = self.cache.valid_token_data().await.map_err(Into::into)?;

        if tracing::enabled!(tracing::Level::TRACE) {
            let now = self.cache.now();

            tracing::trace!(
                auth_type = %self.auth_type,
                token.status = ?token.token_status_at(now),
                token.until_stale = token.until_stale_at(now).0,
                token.until_expired = token.until_expired_at(now).0,
                "attaching access token"
            );
        }

        let value = bearer_header(token.access_token())?;
        request.headers_mut().insert(header::AUTHORIZATION, value);
        Ok(())
    }
}

impl<S: AsyncTokenSource, C> Clone for TokenAuthenticator<S, C> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            auth_type: self.auth_type,
        }
    }
}

impl<S, C> fmt::Debug for TokenAuthenticator<S, C>
where
    S: AsyncTokenSource + fmt::Debug,
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenAuthenticator")
            .field("auth_type", &self.auth_type)
            .field("cache", &self.cache)
            .finish()
    }
}
