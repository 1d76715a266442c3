//! Credential values and the on-disk application-default credentials format.

use chrono::{DateTime, Utc};
use coop_core::{CoopError, CoopResult};
use serde::Deserialize;
use std::fmt;

/// Header carrying the bearer token.
pub const AUTHORIZATION_HEADER: &str = "Authorization";
/// Header attributing usage and quota to a project.
pub const USER_PROJECT_HEADER: &str = "x-goog-user-project";
/// Header carrying a static API key.
pub const API_KEY_HEADER: &str = "X-Goog-Api-Key";

/// A short-lived access token plus the project it is billed to.
#[derive(Clone)]
pub struct BearerCredential {
    /// The access token.
    pub token: String,
    /// Project used for quota attribution.
    pub project_id: Option<String>,
    /// When the token stops being valid.
    pub expires_at: Option<DateTime<Utc>>,
}

impl BearerCredential {
    /// A credential without expiry information.
    pub fn new(token: impl Into<String>, project_id: Option<String>) -> Self {
        Self {
            token: token.into(),
            project_id,
            expires_at: None,
        }
    }

    /// Set the expiry from a lifetime in seconds, counted from now.
    pub fn expiring_in(mut self, seconds: i64) -> Self {
        self.expires_at = Some(Utc::now() + chrono::Duration::seconds(seconds));
        self
    }

    /// True if the token expires within the next minute.
    pub fn is_expired(&self) -> bool {
        self.lifetime().is_some_and(|left| left.is_zero())
    }

    /// How long the token may still be used, keeping a one-minute margin.
    /// `None` when the expiry is unknown.
    pub fn lifetime(&self) -> Option<std::time::Duration> {
        let expires = self.expires_at?;
        let left = expires - (Utc::now() + chrono::Duration::minutes(1));
        Some(left.to_std().unwrap_or_default())
    }

    /// Outbound headers for one connection attempt.
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![(
            AUTHORIZATION_HEADER.to_string(),
            format!("Bearer {}", self.token),
        )];
        if let Some(project) = &self.project_id {
            headers.push((USER_PROJECT_HEADER.to_string(), project.clone()));
        }
        headers
    }
}

impl fmt::Debug for BearerCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerCredential")
            .field("token", &"<redacted>")
            .field("project_id", &self.project_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A static API key sent as `X-Goog-Api-Key`.
#[derive(Clone)]
pub struct ApiKeyAuth {
    key: String,
}

impl ApiKeyAuth {
    /// Wrap a key. An empty key is rejected.
    pub fn new(key: impl Into<String>) -> CoopResult<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(CoopError::Credential("API key is empty".into()));
        }
        Ok(Self { key })
    }

    /// Read the key from environment variable `var`.
    pub fn from_env(var: &str) -> CoopResult<Self> {
        let key = std::env::var(var)
            .map_err(|_| CoopError::Credential(format!("{var} is not set")))?;
        Self::new(key)
    }

    /// Outbound headers.
    pub fn headers(&self) -> Vec<(String, String)> {
        vec![(API_KEY_HEADER.to_string(), self.key.clone())]
    }
}

impl fmt::Debug for ApiKeyAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeyAuth").field("key", &"<redacted>").finish()
    }
}

/// An application-default credentials file, as written by
/// `gcloud auth application-default login` or downloaded as a key.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdcFile {
    /// End-user credentials refreshed with a refresh token.
    AuthorizedUser {
        /// OAuth client id.
        client_id: String,
        /// OAuth client secret.
        client_secret: String,
        /// Long-lived refresh token.
        refresh_token: String,
        /// Project for quota attribution.
        #[serde(default)]
        quota_project_id: Option<String>,
    },
    /// Service-account key file, exchanged with a signed JWT assertion.
    ServiceAccount {
        /// Project owning the account.
        #[serde(default)]
        project_id: Option<String>,
        /// Account e-mail, the assertion issuer.
        client_email: String,
        /// PEM-encoded RSA private key.
        private_key: String,
        /// Id of the key, sent as the JWT `kid`.
        #[serde(default)]
        private_key_id: Option<String>,
    },
}

impl AdcFile {
    /// Parse the JSON contents of a credentials file.
    pub fn parse(contents: &str) -> CoopResult<Self> {
        serde_json::from_str(contents)
            .map_err(|e| CoopError::Credential(format!("Unsupported or invalid credentials file: {e}")))
    }

    /// Project recorded in the file, if any.
    pub fn project_id(&self) -> Option<&str> {
        match self {
            AdcFile::AuthorizedUser {
                quota_project_id, ..
            } => quota_project_id.as_deref(),
            AdcFile::ServiceAccount { project_id, .. } => project_id.as_deref(),
        }
    }
}
