//! Session factories built from [`SourceConfig`]s.

use crate::config::{AuthConfig, EndpointConfig, SourceConfig};
use async_trait::async_trait;
use coop_auth::{ApiKeyAuth, CredentialProvider, GoogleAdcProvider};
use coop_core::CoopResult;
use coop_mcp::{
    DiscoveryPolicy, HttpConfig, SessionFactory, StdioConfig, ToolSession, TransportConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Where the headers of an HTTP source come from.
#[derive(Clone, Default)]
pub enum Credentials {
    /// No headers.
    #[default]
    None,
    /// `X-Goog-Api-Key` from an environment variable.
    ApiKey {
        /// Variable holding the key.
        env: String,
    },
    /// Bearer token and project attribution from a provider.
    Provider(Arc<dyn CredentialProvider>),
}

impl Credentials {
    /// Credentials for `auth`, reading ambient configuration from the environment.
    pub fn from_config(auth: &AuthConfig) -> Self {
        match auth {
            AuthConfig::None => Credentials::None,
            AuthConfig::ApiKey { env } => Credentials::ApiKey { env: env.clone() },
            AuthConfig::Adc { scopes, project_id } => {
                let mut provider = GoogleAdcProvider::from_env(scopes.iter().cloned());
                if let Some(project) = project_id {
                    provider = provider.with_project_id(project.clone());
                }
                Credentials::Provider(Arc::new(provider))
            }
        }
    }

    /// Resolve the headers for one connection attempt, with how long they
    /// stay valid when that is known.
    pub async fn resolve(&self) -> CoopResult<(Vec<(String, String)>, Option<Duration>)> {
        match self {
            Credentials::None => Ok((Vec::new(), None)),
            Credentials::ApiKey { env } => Ok((ApiKeyAuth::from_env(env)?.headers(), None)),
            Credentials::Provider(provider) => {
                let credential = provider.resolve().await?;
                Ok((credential.headers(), credential.lifetime()))
            }
        }
    }
}

/// Opens sessions for one configured source, resolving credentials on every
/// open. Sessions opened with an expiring token are marked to expire with it.
pub struct SourceFactory {
    source: String,
    endpoint: EndpointConfig,
    credentials: Credentials,
    discovery: DiscoveryPolicy,
    timeout: Option<Duration>,
}

impl SourceFactory {
    /// Factory for source `name`, with credentials taken from its config.
    pub fn from_config(name: impl Into<String>, config: &SourceConfig) -> Self {
        let credentials = match &config.endpoint {
            EndpointConfig::StreamableHttp { auth, .. } | EndpointConfig::OneShot { auth, .. } => {
                Credentials::from_config(auth)
            }
            EndpointConfig::Stdio { .. } => Credentials::None,
        };
        Self {
            source: name.into(),
            endpoint: config.endpoint.clone(),
            credentials,
            discovery: config.discovery,
            timeout: config.timeout(),
        }
    }

    /// Replace the credential source.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    async fn transport_config(&self) -> CoopResult<(TransportConfig, Option<Duration>)> {
        let mut lifetime = None;
        let config = match &self.endpoint {
            EndpointConfig::Stdio {
                command,
                args,
                env,
                inherit_env,
                cwd,
            } => {
                let mut stdio = StdioConfig::new(command.clone()).with_args(args.iter().cloned());
                for (key, value) in env {
                    stdio = stdio.with_env(key.clone(), value.clone());
                }
                stdio.inherit_env = *inherit_env;
                stdio.cwd = cwd.clone();
                if let Some(timeout) = self.timeout {
                    stdio = stdio.with_timeout(timeout);
                }
                TransportConfig::Stdio(stdio)
            }
            EndpointConfig::StreamableHttp { url, .. } => {
                let (http, valid_for) = self.http_config(url).await?;
                lifetime = valid_for;
                TransportConfig::StreamableHttp(http)
            }
            EndpointConfig::OneShot { url, .. } => {
                let (http, valid_for) = self.http_config(url).await?;
                lifetime = valid_for;
                TransportConfig::OneShotHttp(http)
            }
        };
        Ok((config, lifetime))
    }

    async fn http_config(&self, url: &str) -> CoopResult<(HttpConfig, Option<Duration>)> {
        let (headers, lifetime) = self.credentials.resolve().await?;
        debug!(source = %self.source, headers = headers.len(), lifetime = ?lifetime, "Credentials resolved");
        let mut http = HttpConfig::new(url).with_headers(headers);
        if let Some(timeout) = self.timeout {
            http = http.with_timeout(timeout);
        }
        Ok((http, lifetime))
    }
}

#[async_trait]
impl SessionFactory for SourceFactory {
    fn source(&self) -> &str {
        &self.source
    }

    async fn open(&self) -> CoopResult<ToolSession> {
        let (config, lifetime) = self.transport_config().await?;
        let session = ToolSession::connect(self.source.clone(), &config, self.discovery).await?;
        Ok(match lifetime {
            Some(lifetime) => session.expiring_after(lifetime),
            None => session,
        })
    }

    fn reauthenticates(&self) -> bool {
        matches!(self.credentials, Credentials::Provider(_))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use coop_auth::StaticTokenProvider;
    use coop_core::CoopError;

    fn http_source(auth: AuthConfig) -> SourceConfig {
        SourceConfig::new(EndpointConfig::StreamableHttp {
            url: "http://127.0.0.1:9/mcp".into(),
            auth,
        })
        .with_timeout(Duration::from_secs(12))
    }

    #[tokio::test]
    async fn test_provider_headers_attached() {
        let factory = SourceFactory::from_config("analytics", &http_source(AuthConfig::None))
            .with_credentials(Credentials::Provider(Arc::new(StaticTokenProvider::new(
                "tok",
                Some("proj".into()),
            ))));
        let (config, lifetime) = factory.transport_config().await.unwrap();
        assert_eq!(lifetime, None);
        assert!(factory.reauthenticates());
        match config {
            TransportConfig::StreamableHttp(http) => {
                assert_eq!(http.timeout, Duration::from_secs(12));
                assert!(http.headers.contains(&("Authorization".into(), "Bearer tok".into())));
                assert!(http.headers.contains(&("x-goog-user-project".into(), "proj".into())));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_api_key_is_credential_error() {
        let auth = AuthConfig::ApiKey {
            env: "COOP_TEST_KEY_THAT_IS_NEVER_SET".into(),
        };
        let err = SourceFactory::from_config("maps", &http_source(auth))
            .open()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CoopError::Credential(_)));
    }

    #[tokio::test]
    async fn test_stdio_config_carries_settings() {
        let config = SourceConfig::new(EndpointConfig::Stdio {
            command: "coop".into(),
            args: vec!["serve-tools".into()],
            env: [("RUST_LOG".to_string(), "warn".to_string())].into(),
            inherit_env: false,
            cwd: None,
        })
        .with_timeout(Duration::from_secs(300));
        let factory = SourceFactory::from_config("local", &config);
        assert!(!factory.reauthenticates());
        match factory.transport_config().await.unwrap().0 {
            TransportConfig::Stdio(stdio) => {
                assert_eq!(stdio.args, ["serve-tools"]);
                assert_eq!(stdio.env.get("RUST_LOG").map(String::as_str), Some("warn"));
                assert!(!stdio.inherit_env);
                assert_eq!(stdio.timeout, Duration::from_secs(300));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
