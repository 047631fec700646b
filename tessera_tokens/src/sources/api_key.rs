//! A token source that exchanges an API key with an IAM authority

use async_trait::async_trait;
use reqwest::Url;
use tessera_clock::{Clock, System};

use super::{
    dto,
    http::{self, FormBody},
    AsyncTokenSource,
};
use crate::{ApiKey, ClientId, ClientSecret, TokenData, TokenLifetimeConfig, TokenRequestError};

/// The authority used when none is configured
pub const DEFAULT_AUTHORITY_URL: &str = "https://iam.cloud.ibm.com";

/// Path of the token endpoint below the authority URL
pub const TOKEN_PATH: &str = "/identity/token";

/// Exchanges an API key for an access token
///
/// Tokens go stale after 80% of their lifetime unless configured otherwise.
#[derive(Debug)]
pub struct ApiKeyTokenSource<C = System> {
    client: reqwest::Client,
    token_url: Url,
    grant: dto::ApiKeyGrant,
    client_credentials: Option<(ClientId, ClientSecret)>,
    lifetime_config: TokenLifetimeConfig<C>,
}

impl ApiKeyTokenSource {
    /// Constructs a new API key source against `authority_url`
    ///
    /// Fails without contacting the authority if the key is empty or the URL
    /// is invalid.
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
            grant: dto::ApiKeyGrant {
                api_key,
                scope: None,
            },
            client_credentials: None,
            lifetime_config: TokenLifetimeConfig::default(),
        })
    }
}

impl<C> ApiKeyTokenSource<C> {
    /// Authenticates the exchange itself with a client ID and secret
    pub fn with_client_credentials(
        mut self,
        client_id: ClientId,
        client_secret: ClientSecret,
    ) -> Result<Self, TokenRequestError> {
        if client_id.as_str().is_empty() || client_secret.as_str().is_empty() {
            return Err(TokenRequestError::config(
                "client ID and client secret must both be non-empty",
            ));
        }
        self.client_credentials = Some((client_id, client_secret));
        Ok(self)
    }

    /// Requests additional scopes, space separated
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.grant.scope = Some(scope.into());
        self
    }

    /// Replaces the lifetime configuration used for received tokens
    pub fn with_lifetime_config<D>(
        self,
        lifetime_config: TokenLifetimeConfig<D>,
    ) -> ApiKeyTokenSource<D> {
        ApiKeyTokenSource {
            client: self.client,
            token_url: self.token_url,
            grant: self.grant,
            client_credentials: self.client_credentials,
            lifetime_config,
        }
    }

    /// The token endpoint requests are sent to
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> AsyncTokenSource for ApiKeyTokenSource<C> {
    type Error = TokenRequestError;

    async fn request_token(&self) -> Result<TokenData, Self::Error> {
        let basic_auth = self
            .client_credentials
            .as_ref()
            .map(|(id, secret)| (&**id, &**secret));

        http::request_token::<FormBody, _, _>(
            &self.client,
            &self.token_url,
            "api_key",
            &self.grant,
            basic_auth,
            &self.lifetime_config,
        )
        .await
    }
}
