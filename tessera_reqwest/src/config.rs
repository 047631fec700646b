use std::time::Duration;

use serde::Deserialize;
use tessera_tokens::{
    sources::{api_key, ApiKeyTokenSource, AssumeTokenSource, ClaimsTokenSource, TrustedProfile},
    ApiKey, ClientId, ClientSecret,
};

use crate::{
    AssumeAuthenticator, AuthType, AuthenticationError, Authenticator, ClaimsAuthenticator,
    IamAuthenticator, TokenAuthenticator,
};

/// Timeout applied to requests to the token authority unless configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Settings for one of the supported authenticators
///
/// Deserializes from a map tagged with `auth_type`:
///
/// ```
/// # use tessera_reqwest::{AuthenticatorConfig, AuthType};
/// let config: AuthenticatorConfig = serde_json::from_str(r#"{
///     "auth_type": "iam",
///     "apikey": "my-api-key"
/// }"#).unwrap();
///
/// assert_eq!(config.auth_type(), AuthType::Iam);
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "auth_type", rename_all = "lowercase")]
pub enum AuthenticatorConfig {
    /// Exchange an API key with IAM
    Iam(IamConfig),
    /// Assume a trusted profile
    Assume(AssumeConfig),
    /// Exchange an API key for a claim-scoped token
    Claims(ClaimsConfig),
}

/// Settings for exchanging an API key with IAM
#[derive(Clone, Debug, Deserialize)]
pub struct IamConfig {
    /// The API key
    pub apikey: ApiKey,
    /// The authority, IAM's public endpoint if not set
    #[serde(default)]
    pub url: Option<String>,
    /// Client ID sent as basic authentication, requires `client_secret`
    #[serde(default)]
    pub client_id: Option<ClientId>,
    /// Client secret sent as basic authentication, requires `client_id`
    #[serde(default)]
    pub client_secret: Option<ClientSecret>,
    /// Scope requested for the token
    #[serde(default)]
    pub scope: Option<String>,
    /// Timeout for requests to the authority, in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Settings for assuming a trusted profile
///
/// Exactly one of `profile_id`, `profile_crn`, or `profile_name` must be
/// set. A profile name also needs the `account_id` it belongs to.
#[derive(Clone, Debug, Deserialize)]
pub struct AssumeConfig {
    /// How the user token is obtained
    #[serde(flatten)]
    pub iam: IamConfig,
    /// ID of the profile to assume
    #[serde(default)]
    pub profile_id: Option<String>,
    /// CRN of the profile to assume
    #[serde(default)]
    pub profile_crn: Option<String>,
    /// Name of the profile to assume
    #[serde(default)]
    pub profile_name: Option<String>,
    /// Account of a profile given by name
    #[serde(default)]
    pub account_id: Option<String>,
}

/// Settings for exchanging an API key for a claim-scoped token
#[derive(Clone, Debug, Deserialize)]
pub struct ClaimsConfig {
    /// The API key
    pub apikey: ApiKey,
    /// The authority
    pub url: String,
    /// Claims requested, space separated
    #[serde(default)]
    pub scope: Option<String>,
    /// Audience requested for the token
    #[serde(default)]
    pub audience: Option<String>,
    /// Timeout for requests to the authority, in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl AuthenticatorConfig {
    /// Reads the settings of `service` from environment variables
    ///
    /// Variable names are the upper-cased service name, with `-` replaced by
    /// `_`, followed by `_AUTH_TYPE`, `_APIKEY`, `_AUTH_URL`, `_CLIENT_ID`,
    /// `_CLIENT_SECRET`, `_SCOPE`, `_AUDIENCE`, `_PROFILE_ID`, `_PROFILE_CRN`,
    /// `_PROFILE_NAME`, `_ACCOUNT_ID`, or `_TIMEOUT_SECS`. Without an
    /// `_AUTH_TYPE`, IAM is assumed.
    pub fn from_env(service: &str) -> Result<Self, AuthenticationError> {
        Self::from_lookup(service, |name| std::env::var(name).ok())
    }

    /// Reads the settings of `service` through `lookup`
    ///
    /// Names are the same as for [`from_env()`][Self::from_env()]. Blank
    /// values count as unset.
    pub fn from_lookup<F>(service: &str, lookup: F) -> Result<Self, AuthenticationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let prefix = service.trim().to_uppercase().replace('-', "_");
        let get = |name: &str| {
            lookup(&format!("{}_{}", prefix, name))
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };
        let require = |name: &str| {
            get(name).ok_or_else(|| {
                AuthenticationError::Configuration(format!("{}_{} is not set", prefix, name))
            })
        };
        let timeout_secs = get("TIMEOUT_SECS")
            .map(|value| {
                value.parse::<u64>().map_err(|_| {
                    AuthenticationError::Configuration(format!(
                        "{}_TIMEOUT_SECS is not a number of seconds: {}",
                        prefix, value
                    ))
                })
            })
            .transpose()?;

        let auth_type = get("AUTH_TYPE").unwrap_or_else(|| AuthType::Iam.as_str().to_owned());
        let iam = |apikey: String| IamConfig {
            apikey: ApiKey::new(apikey),
            url: get("AUTH_URL"),
            client_id: get("CLIENT_ID").map(ClientId::new),
            client_secret: get("CLIENT_SECRET").map(ClientSecret::new),
            scope: get("SCOPE"),
            timeout_secs,
        };

        match auth_type.to_lowercase().as_str() {
            "iam" => Ok(Self::Iam(iam(require("APIKEY")?))),
            "assume" => Ok(Self::Assume(AssumeConfig {
                iam: iam(require("APIKEY")?),
                profile_id: get("PROFILE_ID"),
                profile_crn: get("PROFILE_CRN"),
                profile_name: get("PROFILE_NAME"),
                account_id: get("ACCOUNT_ID"),
            })),
            "claims" => Ok(Self::Claims(ClaimsConfig {
                apikey: ApiKey::new(require("APIKEY")?),
                url: require("AUTH_URL")?,
                scope: get("SCOPE"),
                audience: get("AUDIENCE"),
                timeout_secs,
            })),
            other => Err(AuthenticationError::Configuration(format!(
                "{}_AUTH_TYPE has an unsupported value: {}",
                prefix, other
            ))),
        }
    }

    /// The kind of authenticator these settings describe
    pub fn auth_type(&self) -> AuthType {
        match self {
            Self::Iam(_) => AuthType::Iam,
            Self::Assume(_) => AuthType::Assume,
            Self::Claims(_) => AuthType::Claims,
        }
    }

    /// Validates the settings and constructs the authenticator
    ///
    /// No request is made to the authority until the first token is needed.
    pub fn build(self) -> Result<Box<dyn Authenticator>, AuthenticationError> {
        let authenticator: Box<dyn Authenticator> = match self {
            Self::Iam(config) => Box::new(config.build()?),
            Self::Assume(config) => Box::new(config.build()?),
            Self::Claims(config) => Box::new(config.build()?),
        };
        tracing::debug!(auth_type = %authenticator.auth_type(), "built authenticator");
        Ok(authenticator)
    }
}

impl IamConfig {
    /// Constructs an IAM authenticator from these settings
    pub fn build(self) -> Result<IamAuthenticator, AuthenticationError> {
        Ok(TokenAuthenticator::new(self.source()?, AuthType::Iam))
    }

    fn source(self) -> Result<ApiKeyTokenSource, AuthenticationError> {
        let client = http_client(self.timeout_secs)?;
        let url = self.url.as_deref().unwrap_or(api_key::DEFAULT_AUTHORITY_URL);
        let mut source = ApiKeyTokenSource::new(client, url, self.apikey)?;

        source = match (self.client_id, self.client_secret) {
            (Some(id), Some(secret)) => source.with_client_credentials(id, secret)?,
            (None, None) => source,
            _ => {
                return Err(AuthenticationError::Configuration(
                    "client ID and client secret must be set together".into(),
                ))
            }
        };

        if let Some(scope) = self.scope {
            source = source.with_scope(scope);
        }

        Ok(source)
    }
}

impl AssumeConfig {
    /// Constructs an authenticator for the trusted profile
    pub fn build(self) -> Result<AssumeAuthenticator, AuthenticationError> {
        let profile = TrustedProfile::from_parts(
            self.profile_id,
            self.profile_crn,
            self.profile_name,
            self.account_id,
        )?;
        let user_source = self.iam.source()?;

        Ok(TokenAuthenticator::new(
            AssumeTokenSource::new(user_source, profile),
            AuthType::Assume,
        ))
    }
}

impl ClaimsConfig {
    /// Constructs a claims authenticator from these settings
    pub fn build(self) -> Result<ClaimsAuthenticator, AuthenticationError> {
        let client = http_client(self.timeout_secs)?;
        let mut source = ClaimsTokenSource::new(client, &self.url, self.apikey)?;

        if let Some(scope) = self.scope {
            source = source.with_scope(scope);
        }
        if let Some(audience) = self.audience {
            source = source.with_audience(audience);
        }

        Ok(TokenAuthenticator::new(source, AuthType::Claims))
    }
}

fn http_client(timeout_secs: Option<u64>) -> Result<reqwest::Client, AuthenticationError> {
    reqwest::Client::builder()
        .timeout(timeout_secs.map_or(DEFAULT_TIMEOUT, Duration::from_secs))
        .user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ))
        .build()
        .map_err(|err| {
            AuthenticationError::Configuration(format!("unable to build HTTP client: {}", err))
        })
}
