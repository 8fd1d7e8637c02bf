//! Credential material handed to a run.
//!
//! Credentials arrive in the run options keyed by name and reach executors
//! through the execution context. They are never serialized back out with
//! the context and never logged.

use crate::error::CredentialError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rootcause::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// The type of credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CredentialType {
    Oauth2,
    ApiKey,
    BasicAuth,
    BearerToken,
}

impl CredentialType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Oauth2 => "oauth2",
            Self::ApiKey => "apiKey",
            Self::BasicAuth => "basicAuth",
            Self::BearerToken => "bearerToken",
        }
    }
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credential data, tagged by `type`.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum CredentialData {
    Oauth2 {
        access_token: String,
        #[serde(default)]
        refresh_token: Option<String>,
        #[serde(default = "default_token_type")]
        token_type: String,
        #[serde(default)]
        expires_at: Option<DateTime<Utc>>,
        #[serde(default)]
        scope: Option<String>,
    },
    ApiKey {
        key: String,
        /// Sent as `X-API-Key` when absent.
        #[serde(default)]
        header_name: Option<String>,
    },
    BasicAuth { username: String, password: String },
    BearerToken { token: String },
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl CredentialData {
    #[must_use]
    pub fn oauth2(access_token: impl Into<String>) -> Self {
        Self::Oauth2 {
            access_token: access_token.into(),
            refresh_token: None,
            token_type: default_token_type(),
            expires_at: None,
            scope: None,
        }
    }

    #[must_use]
    pub fn api_key(key: impl Into<String>) -> Self {
        Self::ApiKey {
            key: key.into(),
            header_name: None,
        }
    }

    #[must_use]
    pub fn basic_auth(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::BasicAuth {
            username: username.into(),
            password: password.into(),
        }
    }

    #[must_use]
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::BearerToken {
            token: token.into(),
        }
    }

    /// Parses a credential taken from the run context.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Malformed`] if `value` is not a credential.
    pub fn from_value(name: &str, value: &JsonValue) -> Result<Self, CredentialError> {
        serde_json::from_value(value.clone()).map_err(|e| CredentialError::Malformed {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    #[must_use]
    pub fn credential_type(&self) -> CredentialType {
        match self {
            Self::Oauth2 { .. } => CredentialType::Oauth2,
            Self::ApiKey { .. } => CredentialType::ApiKey,
            Self::BasicAuth { .. } => CredentialType::BasicAuth,
            Self::BearerToken { .. } => CredentialType::BearerToken,
        }
    }

    /// True for OAuth2 tokens expiring within five minutes.
    #[must_use]
    pub fn needs_refresh(&self) -> bool {
        if let Self::Oauth2 {
            expires_at: Some(expires),
            ..
        } = self
        {
            return *expires < Utc::now() + chrono::Duration::minutes(5);
        }
        false
    }
}

impl fmt::Debug for CredentialData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialData")
            .field("type", &self.credential_type())
            .finish_non_exhaustive()
    }
}

/// Supplies a usable access token for a named credential.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// Returns a bearer token that is valid now.
    async fn valid_access_token(
        &self,
        name: &str,
        credential: &CredentialData,
    ) -> Result<String, Report<CredentialError>>;
}

/// Returns the stored token as-is.
///
/// Fails for tokens that need a refresh; refreshing is left to providers
/// that know the token endpoint.
#[derive(Debug, Default, Clone, Copy)]
pub struct StoredTokenProvider;

#[async_trait]
impl AccessTokenProvider for StoredTokenProvider {
    async fn valid_access_token(
        &self,
        name: &str,
        credential: &CredentialData,
    ) -> Result<String, Report<CredentialError>> {
        if credential.needs_refresh() {
            return Err(CredentialError::RefreshRequired {
                name: name.to_string(),
            }
            .into());
        }
        match credential {
            CredentialData::Oauth2 { access_token, .. } => Ok(access_token.clone()),
            CredentialData::BearerToken { token } => Ok(token.clone()),
            other => Err(CredentialError::NoAccessToken {
                name: name.to_string(),
                kind: other.credential_type().to_string(),
            }
            .into()),
        }
    }
}
