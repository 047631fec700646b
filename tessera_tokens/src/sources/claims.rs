//! A token source that exchanges an API key for a claim-scoped token

use async_trait::async_trait;
use reqwest::Url;
use tessera_clock::{Clock, DurationSecs, System};

use super::{
    dto,
    http::{self, JsonBody},
    AsyncTokenSource,
};
use crate::{ApiKey, RefreshPolicy, TokenData, TokenLifetimeConfig, TokenRequestError};

/// Path of the token endpoint below the authority URL
pub const TOKEN_PATH: &str = "/siusermgr/api/1.0/apikeys/token";

/// How long before expiry claim-scoped tokens go stale by default
pub const DEFAULT_REFRESH_WINDOW: DurationSecs = DurationSecs(10);

/// Exchanges an API key for a token scoped to a set of claims
///
/// The request is sent as JSON; there is no default authority. Tokens go
/// stale [`DEFAULT_REFRESH_WINDOW`] before they expire unless configured
/// otherwise.
#[derive(Debug)]
pub struct ClaimsTokenSource<C = System> {
    client: reqwest::Client,
    token_url: Url,
    request: dto::ClaimsRequest,
    lifetime_config: TokenLifetimeConfig<C>,
}

impl ClaimsTokenSource {
    /// Constructs a new claims source against `authority_url`
    pub fn new(
        client: reqwest::Client,
        authority_url: &str,
        api_key: ApiKey,
    ) -> Result<Self, TokenRequestError> {
        if api_key.as_str().trim().is_empty() {
            return Err(TokenRequestError::config("API key is empty"));
        }

        Ok(Self {
            client,
            token_url: http::endpoint_url(authority_url, TOKEN_PATH)?,
            request: dto::ClaimsRequest {
                api_key,
                scope: None,
                audience: None,
            },
            lifetime_config: TokenLifetimeConfig::new(RefreshPolicy::BeforeExpiry(
                DEFAULT_REFRESH_WINDOW,
            )),
        })
    }
}

impl<C> ClaimsTokenSource<C> {
    /// Scopes the token to these claims, space separated
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.request.scope = Some(scope.into());
        self
    }

    /// Requests a token for a specific audience
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.request.audience = Some(audience.into());
        self
    }

    /// Replaces the lifetime configuration used for received tokens
    pub fn with_lifetime_config<D>(
        self,
        lifetime_config: TokenLifetimeConfig<D>,
    ) -> ClaimsTokenSource<D> {
        ClaimsTokenSource {
            client: self.client,
            token_url: self.token_url,
            request: self.request,
            lifetime_config,
        }
    }

    /// The token endpoint requests are sent to
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> AsyncTokenSource for ClaimsTokenSource<C> {
    type Error = TokenRequestError;

    async fn request_token(&self) -> Result<TokenData, Self::Error> {
        http::request_token::<JsonBody, _, _>(
            &self.client,
            &self.token_url,
            "claims",
            &self.request,
            None,
            &self.lifetime_config,
        )
        .await
    }
}
