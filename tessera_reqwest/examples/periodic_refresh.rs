use std::time::Duration;

use clap::Parser;
use reqwest::{header, Method, Url};
use tessera_reqwest::{Authenticator, IamConfig};
use tessera_tokens::{sources::api_key, ApiKey, TokenStatus};
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// The API key exchanged for access tokens
    #[arg(short = 'k', long, env = "IAM_APIKEY", hide_env_values = true)]
    api_key: String,

    /// The issuing authority
    #[arg(short, long, env = "IAM_AUTH_URL", default_value = api_key::DEFAULT_AUTHORITY_URL)]
    auth_url: String,

    /// Scope requested for the token
    #[arg(short, long, env = "IAM_SCOPE")]
    scope: Option<String>,

    /// Seconds between two authenticated requests
    #[arg(short, long, default_value_t = 5)]
    interval: u64,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let authenticator = IamConfig {
        apikey: ApiKey::new(opts.api_key),
        url: Some(opts.auth_url),
        client_id: None,
        client_secret: None,
        scope: opts.scope,
        timeout_secs: None,
    }
    .build()?;

    tracing::info!(
        token = format_args!("{:#?}", authenticator.token().await?),
        "first access token"
    );

    let target = Url::parse("https://example.com/")?;
    let mut interval = time::interval(Duration::from_secs(opts.interval));
    loop {
        interval.tick().await;

        let mut req = reqwest::Request::new(Method::GET, target.clone());
        if let Err(error) = authenticator.authenticate(&mut req).await {
            tracing::error!(%error, "unable to authenticate request");
            continue;
        }
        debug_assert!(req.headers().contains_key(header::AUTHORIZATION));

        if let Some(error) = authenticator.last_refresh_error() {
            tracing::warn!(%error, "background refresh failed");
        }

        let Some(token) = authenticator.token_data() else {
            continue;
        };
        let status = token.token_status();
        match status {
            TokenStatus::Fresh => {
                tracing::debug!(
                    ?status,
                    stale = token.stale().0,
                    expiry = token.expiry().0,
                    "authenticated request"
                )
            }
            TokenStatus::Stale => {
                tracing::warn!(
                    ?status,
                    stale = token.stale().0,
                    expiry = token.expiry().0,
                    "authenticated request"
                )
            }
            TokenStatus::Expired => {
                tracing::error!(
                    ?status,
                    stale = token.stale().0,
                    expiry = token.expiry().0,
                    "authenticated request"
                )
            }
        }
    }
}
