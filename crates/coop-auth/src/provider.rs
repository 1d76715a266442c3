//! Credential providers.
//!
//! [`GoogleAdcProvider`] follows the application-default credentials chain:
//!
//! 1. the file named by `GOOGLE_APPLICATION_CREDENTIALS`,
//! 2. the gcloud well-known file,
//! 3. the compute metadata server.
//!
//! End-user (`authorized_user`) files are exchanged for an access token with
//! the OAuth refresh-token grant. Service-account key files sign an RS256
//! assertion for the JWT-bearer grant.

use crate::credentials::{AdcFile, BearerCredential};
use async_trait::async_trait;
use chrono::Utc;
use coop_core::{CoopError, CoopResult};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// OAuth2 token endpoint.
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
/// Compute metadata server.
pub const METADATA_URL: &str = "http://metadata.google.internal";

const METADATA_TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";
const METADATA_PROJECT_PATH: &str = "/computeMetadata/v1/project/project-id";
const METADATA_TIMEOUT: Duration = Duration::from_secs(3);
const TOKEN_TIMEOUT: Duration = Duration::from_secs(15);
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Resolves ambient identity into a bearer credential.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Produce a currently valid credential.
    async fn resolve(&self) -> CoopResult<BearerCredential>;

    /// Outbound headers for one connection attempt.
    async fn headers(&self) -> CoopResult<Vec<(String, String)>> {
        Ok(self.resolve().await?.headers())
    }
}

/// A fixed token. Useful in CI and tests.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    credential: BearerCredential,
}

impl StaticTokenProvider {
    /// Serve `token`, attributed to `project_id`.
    pub fn new(token: impl Into<String>, project_id: Option<String>) -> Self {
        Self {
            credential: BearerCredential::new(token, project_id),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticTokenProvider {
    async fn resolve(&self) -> CoopResult<BearerCredential> {
        Ok(self.credential.clone())
    }
}

/// Token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Refresh-token grant form.
#[derive(Serialize)]
struct RefreshRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    refresh_token: &'a str,
    grant_type: &'a str,
}

/// JWT-bearer grant form.
#[derive(Serialize)]
struct AssertionRequest<'a> {
    grant_type: &'a str,
    assertion: &'a str,
}

/// Claims of a service-account assertion.
#[derive(Serialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

/// Application-default credentials for one scope list.
#[derive(Debug, Clone)]
pub struct GoogleAdcProvider {
    scopes: Vec<String>,
    project_id: Option<String>,
    credentials_file: Option<PathBuf>,
    well_known_file: Option<PathBuf>,
    token_url: String,
    metadata_url: String,
    http: reqwest::Client,
}

impl GoogleAdcProvider {
    /// A provider with no file configured: it goes straight to the
    /// metadata server unless a file is added.
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scopes: scopes.into_iter().map(Into::into).collect(),
            project_id: None,
            credentials_file: None,
            well_known_file: None,
            token_url: GOOGLE_TOKEN_URL.to_string(),
            metadata_url: METADATA_URL.to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// The standard chain, configured from the process environment.
    pub fn from_env<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut provider = Self::new(scopes);
        provider.credentials_file = std::env::var_os("GOOGLE_APPLICATION_CREDENTIALS")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        provider.well_known_file = well_known_path();
        provider.project_id = std::env::var("GOOGLE_CLOUD_PROJECT")
            .ok()
            .filter(|p| !p.is_empty());
        provider
    }

    /// Attribute usage to `project_id`, overriding every other source.
    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Use this credentials file. It must exist.
    pub fn with_credentials_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_file = Some(path.into());
        self
    }

    /// Override the OAuth token endpoint.
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    /// Override the metadata server base URL.
    pub fn with_metadata_url(mut self, url: impl Into<String>) -> Self {
        self.metadata_url = url.into();
        self
    }

    /// Requested scopes.
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    async fn read_file(path: &Path) -> CoopResult<AdcFile> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            CoopError::Credential(format!(
                "Cannot read credentials file {}: {e}",
                path.display()
            ))
        })?;
        AdcFile::parse(&contents)
    }

    async fn locate_file(&self) -> CoopResult<Option<(PathBuf, AdcFile)>> {
        if let Some(path) = &self.credentials_file {
            return Ok(Some((path.clone(), Self::read_file(path).await?)));
        }
        match &self.well_known_file {
            Some(path) if tokio::fs::try_exists(path).await.unwrap_or(false) => {
                Ok(Some((path.clone(), Self::read_file(path).await?)))
            }
            _ => Ok(None),
        }
    }

    async fn request_token<F: Serialize + ?Sized>(&self, form: &F, grant: &str) -> CoopResult<TokenResponse> {
        let response = self
            .http
            .post(&self.token_url)
            .form(form)
            .timeout(TOKEN_TIMEOUT)
            .send()
            .await
            .map_err(|e| CoopError::Credential(format!("Token {grant} request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoopError::Credential(format!(
                "Token {grant} rejected ({status}): {body}"
            )));
        }
        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| CoopError::Credential(format!("Invalid token response: {e}")))
    }

    async fn refresh(&self, client_id: &str, client_secret: &str, refresh_token: &str) -> CoopResult<TokenResponse> {
        let form = RefreshRequest {
            client_id,
            client_secret,
            refresh_token,
            grant_type: "refresh_token",
        };
        self.request_token(&form, "refresh").await
    }

    fn sign_assertion(&self, client_email: &str, private_key: &str, key_id: Option<&str>) -> CoopResult<String> {
        let key = EncodingKey::from_rsa_pem(private_key.as_bytes()).map_err(|e| {
            CoopError::Credential(format!("Invalid private key for {client_email}: {e}"))
        })?;
        let mut header = Header::new(Algorithm::RS256);
        header.kid = key_id.map(str::to_string);
        let scope = if self.scopes.is_empty() {
            crate::scopes::CLOUD_PLATFORM.to_string()
        } else {
            self.scopes.join(" ")
        };
        let iat = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: client_email.to_string(),
            scope,
            aud: self.token_url.clone(),
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };
        jsonwebtoken::encode(&header, &claims, &key)
            .map_err(|e| CoopError::Credential(format!("Failed to sign assertion for {client_email}: {e}")))
    }

    async fn exchange_assertion(&self, client_email: &str, private_key: &str, key_id: Option<&str>) -> CoopResult<TokenResponse> {
        let assertion = self.sign_assertion(client_email, private_key, key_id)?;
        let form = AssertionRequest {
            grant_type: JWT_BEARER_GRANT,
            assertion: &assertion,
        };
        debug!(account = %client_email, "Exchanging service-account assertion");
        self.request_token(&form, "assertion").await
    }

    async fn metadata_get(&self, path: &str, query: &[(&str, String)]) -> CoopResult<reqwest::Response> {
        let url = format!("{}{path}", self.metadata_url.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .query(query)
            .timeout(METADATA_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                CoopError::Credential(format!(
                    "No ambient credentials: no credentials file and metadata server unreachable ({e})"
                ))
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(CoopError::Credential(format!(
                "Metadata server returned {status} for {path}"
            )));
        }
        Ok(response)
    }

    async fn metadata_token(&self) -> CoopResult<TokenResponse> {
        let query = if self.scopes.is_empty() {
            Vec::new()
        } else {
            vec![("scopes", self.scopes.join(","))]
        };
        self.metadata_get(METADATA_TOKEN_PATH, &query)
            .await?
            .json::<TokenResponse>()
            .await
            .map_err(|e| CoopError::Credential(format!("Invalid metadata token response: {e}")))
    }

    async fn metadata_project(&self) -> Option<String> {
        let response = self.metadata_get(METADATA_PROJECT_PATH, &[]).await.ok()?;
        let project = response.text().await.ok()?;
        let project = project.trim();
        (!project.is_empty()).then(|| project.to_string())
    }
}

#[async_trait]
impl CredentialProvider for GoogleAdcProvider {
    async fn resolve(&self) -> CoopResult<BearerCredential> {
        let (token, file_project) = match self.locate_file().await? {
            Some((path, file)) => {
                debug!(path = %path.display(), "Using credentials file");
                let file_project = file.project_id().map(str::to_string);
                match file {
                    AdcFile::AuthorizedUser {
                        client_id,
                        client_secret,
                        refresh_token,
                        ..
                    } => (
                        self.refresh(&client_id, &client_secret, &refresh_token)
                            .await?,
                        file_project,
                    ),
                    AdcFile::ServiceAccount {
                        client_email,
                        private_key,
                        private_key_id,
                        ..
                    } => (
                        self.exchange_assertion(&client_email, &private_key, private_key_id.as_deref())
                            .await?,
                        file_project,
                    ),
                }
            }
            None => {
                debug!("No credentials file, asking the metadata server");
                (self.metadata_token().await?, None)
            }
        };

        let project_id = match self.project_id.clone().or(file_project) {
            Some(project) => Some(project),
            None => self.metadata_project().await,
        };

        let mut credential = BearerCredential::new(token.access_token, project_id);
        if let Some(secs) = token.expires_in {
            credential = credential.expiring_in(secs);
        }
        info!(
            project = ?credential.project_id,
            expires_at = ?credential.expires_at,
            "Credential resolved"
        );
        Ok(credential)
    }
}

/// Location of the gcloud application-default credentials file.
fn well_known_path() -> Option<PathBuf> {
    let base = if cfg!(windows) {
        std::env::var_os("APPDATA").map(PathBuf::from)
    } else {
        std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config"))
    }?;
    Some(
        base.join("gcloud")
            .join("application_default_credentials.json"),
    )
}
