use std::convert::Infallible;

use reqwest::StatusCode;
use tessera_tokens::TokenRequestError;
use thiserror::Error;

/// Why an authenticator could not provide a token
#[derive(Debug, Error)]
pub enum AuthenticationError {
    /// A required setting was missing or invalid
    ///
    /// Reported before any request to the authority is made.
    #[error("invalid authenticator configuration: {0}")]
    Configuration(String),
    /// The authority refused to issue a token
    #[error("authority returned status {status}: {body}")]
    Authentication {
        /// The status code returned by the authority
        status: StatusCode,
        /// The raw body of the error response
        body: String,
    },
    /// The authority could not be reached
    #[error(transparent)]
    Transport(reqwest::Error),
    /// The authority answered with something that is not a usable token
    #[error("unusable token response: {0}")]
    InvalidResponse(String),
}

impl AuthenticationError {
    /// The status code returned by the authority, if it answered with an error
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Authentication { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<TokenRequestError> for AuthenticationError {
    fn from(err: TokenRequestError) -> Self {
        match err {
            TokenRequestError::Configuration(message) => Self::Configuration(message),
            TokenRequestError::Authentication { status, body } => {
                Self::Authentication { status, body }
            }
            TokenRequestError::RequestSend(source) | TokenRequestError::BodyRead(source) => {
                Self::Transport(source)
            }
            err @ TokenRequestError::TokenBody(_) | err @ TokenRequestError::MissingLifetime => {
                Self::InvalidResponse(err.to_string())
            }
        }
    }
}

impl From<Infallible> for AuthenticationError {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_requests_keep_status_and_body() {
        let err = AuthenticationError::from(TokenRequestError::Authentication {
            status: StatusCode::UNAUTHORIZED,
            body: "bad key".into(),
        });

        assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
        assert_eq!(err.to_string(), "authority returned status 401 Unauthorized: bad key");
    }

    #[test]
    fn configuration_problems_stay_configuration_problems() {
        let err = AuthenticationError::from(TokenRequestError::Configuration("API key is empty".into()));
        assert!(matches!(err, AuthenticationError::Configuration(m) if m == "API key is empty"));
    }

    #[test]
    fn undecodable_bodies_are_invalid_responses() {
        let err = AuthenticationError::from(TokenRequestError::MissingLifetime);
        assert!(matches!(err, AuthenticationError::InvalidResponse(_)));
        assert!(err.status().is_none());
    }
}
