//! DTOs for interacting with token authorities

use serde::{Deserialize, Serialize, Serializer};
use tessera_clock::{DurationSecs, UnixTime};

use super::TrustedProfile;
use crate::{AccessToken, AccessTokenRef, ApiKey, RefreshToken};

/// Grant type for exchanging an API key
pub const API_KEY_GRANT_TYPE: &str = "urn:ibm:params:oauth:grant-type:apikey";

/// Grant type for assuming a trusted profile
pub const ASSUME_GRANT_TYPE: &str = "urn:ibm:params:oauth:grant-type:assume";

/// API key exchange parameters
#[derive(Debug)]
pub struct ApiKeyGrant {
    /// The API key
    pub api_key: ApiKey,

    /// Additional scopes requested for the token, space separated
    pub scope: Option<String>,
}

impl Serialize for ApiKeyGrant {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut ser = serializer.serialize_struct("ApiKeyGrant", 4)?;
        ser.serialize_field("grant_type", API_KEY_GRANT_TYPE)?;
        ser.serialize_field("apikey", &self.api_key)?;
        ser.serialize_field("response_type", "cloud_iam")?;
        if let Some(scope) = &self.scope {
            ser.serialize_field("scope", scope)?;
        } else {
            ser.skip_field("scope")?;
        }
        ser.end()
    }
}

/// Trusted profile assumption parameters
#[derive(Debug)]
pub(crate) struct AssumeGrant<'a> {
    pub access_token: &'a AccessTokenRef,
    pub profile: &'a TrustedProfile,
}

impl Serialize for AssumeGrant<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut ser = serializer.serialize_struct("AssumeGrant", 4)?;
        ser.serialize_field("grant_type", ASSUME_GRANT_TYPE)?;
        ser.serialize_field("access_token", self.access_token)?;
        match self.profile {
            TrustedProfile::Id(id) => ser.serialize_field("profile_id", id)?,
            TrustedProfile::Crn(crn) => ser.serialize_field("profile_crn", crn)?,
            TrustedProfile::Name { name, account_id } => {
                ser.serialize_field("profile_name", name)?;
                ser.serialize_field("account", account_id)?;
            }
        }
        ser.end()
    }
}

/// Scoped-claims exchange parameters
#[derive(Debug, Serialize)]
pub struct ClaimsRequest {
    /// The API key
    #[serde(rename = "apikey")]
    pub api_key: ApiKey,

    /// Claims to scope the token to, space separated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// The intended audience of the token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(alias = "token")]
    pub access_token: AccessToken,
    #[serde(default)]
    pub refresh_token: Option<RefreshToken>,
    #[serde(default)]
    pub expires_in: Option<DurationSecs>,
    #[serde(default)]
    pub expiration: Option<UnixTime>,
}
