//! A token source that assumes a trusted profile on behalf of a user

use async_trait::async_trait;
use reqwest::Url;
use tessera_clock::{Clock, System};

use super::{
    dto,
    http::{self, FormBody},
    ApiKeyTokenSource, AsyncTokenSource,
};
use crate::{TokenCache, TokenData, TokenLifetimeConfig, TokenRequestError};

/// The trusted profile to assume
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrustedProfile {
    /// Selects the profile by its ID
    Id(String),
    /// Selects the profile by its CRN
    Crn(String),
    /// Selects the profile by name within an account
    Name {
        /// The profile name
        name: String,
        /// The account that owns the profile
        account_id: String,
    },
}

impl TrustedProfile {
    /// Builds a selector from optional settings
    ///
    /// Exactly one of `id`, `crn` or `name` must be given; `name` also
    /// requires `account_id`. Empty strings count as absent.
    pub fn from_parts(
        id: Option<String>,
        crn: Option<String>,
        name: Option<String>,
        account_id: Option<String>,
    ) -> Result<Self, TokenRequestError> {
        let given = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        match (given(id), given(crn), given(name), given(account_id)) {
            (Some(id), None, None, None) => Ok(Self::Id(id)),
            (None, Some(crn), None, None) => Ok(Self::Crn(crn)),
            (None, None, Some(name), Some(account_id)) => Ok(Self::Name { name, account_id }),
            (None, None, Some(_), None) => Err(TokenRequestError::config(
                "a profile name must be accompanied by an account ID",
            )),
            (None, None, None, _) => Err(TokenRequestError::config(
                "one of profile ID, profile CRN or profile name is required",
            )),
            _ => Err(TokenRequestError::config(
                "exactly one of profile ID, profile CRN or profile name may be given",
            )),
        }
    }
}

/// Exchanges a user's own token for a token of a trusted profile
///
/// The user's token is obtained with an [`ApiKeyTokenSource`] and cached
/// separately, so it is only fetched again once it goes stale itself.
/// Assumed tokens never carry a refresh token.
#[derive(Debug)]
pub struct AssumeTokenSource<C = System> {
    client: reqwest::Client,
    token_url: Url,
    user_tokens: TokenCache<ApiKeyTokenSource>,
    profile: TrustedProfile,
    lifetime_config: TokenLifetimeConfig<C>,
}

impl AssumeTokenSource {
    /// Constructs a new source assuming `profile` with tokens from `user_source`
    ///
    /// The assume exchange goes to the same authority as `user_source`.
    pub fn new(user_source: ApiKeyTokenSource, profile: TrustedProfile) -> Self {
        Self {
            client: user_source.client().clone(),
            token_url: user_source.token_url().clone(),
            user_tokens: TokenCache::new(user_source),
            profile,
            lifetime_config: TokenLifetimeConfig::default(),
        }
    }
}

impl<C> AssumeTokenSource<C> {
    /// Replaces the lifetime configuration used for assumed tokens
    pub fn with_lifetime_config<D>(
        self,
        lifetime_config: TokenLifetimeConfig<D>,
    ) -> AssumeTokenSource<D> {
        AssumeTokenSource {
            client: self.client,
            token_url: self.token_url,
            user_tokens: self.user_tokens,
            profile: self.profile,
            lifetime_config,
        }
    }

    /// The profile being assumed
    pub fn profile(&self) -> &TrustedProfile {
        &self.profile
    }

    /// The cache holding the user's own token
    pub fn user_tokens(&self) -> &TokenCache<ApiKeyTokenSource> {
        &self.user_tokens
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> AsyncTokenSource for AssumeTokenSource<C> {
    type Error = TokenRequestError;

    async fn request_token(&self) -> Result<TokenData, Self::Error> {
        let user_token = self.user_tokens.token().await?;

        let grant = dto::AssumeGrant {
            access_token: &user_token,
            profile: &self.profile,
        };

        let token = http::request_token::<FormBody, _, _>(
            &self.client,
            &self.token_url,
            "assume",
            &grant,
            None,
            &self.lifetime_config,
        )
        .await?;

        Ok(token.without_refresh_token())
    }
}
