use reqwest::StatusCode;
use thiserror::Error;

/// An error while attempting to request a new token from the authority
#[derive(Debug, Error)]
pub enum TokenRequestError {
    /// A required parameter was missing or invalid; no request was sent
    #[error("invalid token source configuration: {0}")]
    Configuration(String),
    /// The authority answered with a non-success status
    #[error("authority rejected token request with status {status}: {body}")]
    Authentication {
        /// The status code returned by the authority
        status: StatusCode,
        /// The raw body of the error response
        body: String,
    },
    /// Unable to send a token request to the authority
    #[error("error sending request to authority")]
    RequestSend(#[source] reqwest::Error),
    /// Unable to read the response
    #[error("error reading response body")]
    BodyRead(#[source] reqwest::Error),
    /// Unable to deserialize the token body
    #[error("error deserializing token body from authority")]
    TokenBody(#[from] serde_json::Error),
    /// The authority did not say when the token expires
    #[error("token response carried neither `expires_in` nor `expiration`")]
    MissingLifetime,
}

impl TokenRequestError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether the failure was detected before any request was made
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Whether the authority answered with a non-success status
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Whether the failure happened on the wire (connect, DNS, timeout, …)
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::RequestSend(_) | Self::BodyRead(_))
    }

    /// The status code returned by the authority, if it answered with an error
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Authentication { status, .. } => Some(*status),
            _ => None,
        }
    }
}
