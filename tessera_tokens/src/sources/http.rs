use reqwest::{header, Url};
use serde::Serialize;
use tessera_clock::Clock;

use super::dto;
use crate::{ClientIdRef, ClientSecretRef, TokenData, TokenLifetimeConfig, TokenRequestError};

/// A manner of attaching a serializable payload to a request
pub(crate) trait RequestType {
    /// Attaches the serializable payload to the request body
    fn attach_payload<S: Serialize>(
        request: reqwest::RequestBuilder,
        payload: &S,
    ) -> reqwest::RequestBuilder;
}

/// Attaches the payload to the request body as JSON
#[derive(Debug)]
pub(crate) struct JsonBody;

/// Attaches the payload to the request body as URL-encoded form data
#[derive(Debug)]
pub(crate) struct FormBody;

impl RequestType for JsonBody {
    fn attach_payload<S: Serialize>(
        request: reqwest::RequestBuilder,
        payload: &S,
    ) -> reqwest::RequestBuilder {
        request.json(payload)
    }
}

impl RequestType for FormBody {
    fn attach_payload<S: Serialize>(
        request: reqwest::RequestBuilder,
        payload: &S,
    ) -> reqwest::RequestBuilder {
        request.form(payload)
    }
}

/// Joins an authority's base URL with the path of its token endpoint
///
/// A base URL that already names the endpoint is used as is.
pub(crate) fn endpoint_url(base: &str, path: &str) -> Result<Url, TokenRequestError> {
    let base = base.trim().trim_end_matches('/');
    if base.is_empty() {
        return Err(TokenRequestError::config("authority URL is empty"));
    }

    let full = if base.ends_with(path) {
        base.to_owned()
    } else {
        format!("{}{}", base, path)
    };

    Url::parse(&full).map_err(|e| {
        TokenRequestError::config(format!("invalid authority URL '{}': {}", full, e))
    })
}

/// Credentials sent as HTTP basic authentication alongside the payload
pub(crate) type BasicAuth<'a> = (&'a ClientIdRef, &'a ClientSecretRef);

#[tracing::instrument(
    err,
    skip_all,
    fields(token_url = %token_url, flavor = flavor),
)]
pub(crate) async fn request_token<T: RequestType, P: Serialize, C: Clock>(
    client: &reqwest::Client,
    token_url: &Url,
    flavor: &'static str,
    payload: &P,
    basic_auth: Option<BasicAuth<'_>>,
    lifetime_config: &TokenLifetimeConfig<C>,
) -> Result<TokenData, TokenRequestError> {
    tracing::trace!("requesting token from authority");

    let mut req = T::attach_payload(client.post(token_url.clone()), payload)
        .header(header::ACCEPT, "application/json");
    if let Some((client_id, client_secret)) = basic_auth {
        req = req.basic_auth(client_id.as_str(), Some(client_secret.as_str()));
    }

    let resp = req.send().await.map_err(TokenRequestError::RequestSend)?;
    let status = resp.status();

    tracing::debug!(
        response.status = status.as_u16(),
        "received token response from issuing authority"
    );

    if !status.is_success() {
        let body = resp.text().await.map_err(TokenRequestError::BodyRead)?;
        return Err(TokenRequestError::Authentication { status, body });
    }

    let body = resp.bytes().await.map_err(TokenRequestError::BodyRead)?;
    let resp: dto::TokenResponse = serde_json::from_slice(&body)?;
    let has_refresh_token = resp.refresh_token.is_some();

    let token = lifetime_config
        .create_token(
            resp.access_token,
            resp.refresh_token,
            resp.expires_in,
            resp.expiration,
        )
        .ok_or(TokenRequestError::MissingLifetime)?;

    tracing::info!(
        has_refresh_token,
        lifetime = token.lifetime().0,
        stale = token.stale().0,
        expiry = token.expiry().0,
        "received new token"
    );

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_the_endpoint_path() {
        let url = endpoint_url("https://iam.example.com/", "/identity/token").unwrap();
        assert_eq!(url.as_str(), "https://iam.example.com/identity/token");
    }

    #[test]
    fn keeps_a_url_that_already_names_the_endpoint() {
        let url = endpoint_url("https://iam.example.com/identity/token", "/identity/token").unwrap();
        assert_eq!(url.as_str(), "https://iam.example.com/identity/token");
    }

    #[test]
    fn rejects_empty_and_malformed_urls() {
        assert!(endpoint_url("  ", "/identity/token").unwrap_err().is_configuration());
        assert!(endpoint_url("not a url", "/identity/token").unwrap_err().is_configuration());
    }
}
