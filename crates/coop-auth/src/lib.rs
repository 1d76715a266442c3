//! Credential resolution for outbound tool and delegation traffic.
//!
//! A [`CredentialProvider`] turns ambient identity into a short-lived
//! [`BearerCredential`]; remote sessions only ever see the headers derived
//! from it. Static API keys are carried by [`ApiKeyAuth`].

pub mod credentials;
pub mod provider;

pub use credentials::{AdcFile, ApiKeyAuth, BearerCredential};
pub use provider::{CredentialProvider, GoogleAdcProvider, StaticTokenProvider};

/// OAuth scopes used by the default sources.
pub mod scopes {
    /// Read/write access to the analytical data store.
    pub const BIGQUERY: &str = "https://www.googleapis.com/auth/bigquery";
    /// Broad access to cloud APIs.
    pub const CLOUD_PLATFORM: &str = "https://www.googleapis.com/auth/cloud-platform";
}
