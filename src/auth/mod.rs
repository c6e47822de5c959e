pub mod azure_cli;
pub mod chain;
pub mod client_secret;
pub mod managed_identity;

use async_trait::async_trait;
use chrono::{ DateTime, TimeZone, Utc };
use log::{ debug, error };
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::config::FoundrySettings;
use crate::error::RelayError;

pub use azure_cli::AzureCliCredential;
pub use chain::DefaultCredentialChain;
pub use client_secret::ClientSecretCredential;
pub use managed_identity::ManagedIdentityCredential;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("token request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("token endpoint returned {status}: {body}")]
    TokenEndpoint {
        status: u16,
        body: String,
    },

    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    #[error("{0} unavailable: {1}")]
    Unavailable(&'static str, String),

    #[error("no credential produced a token: {}", .0.join("; "))]
    ChainExhausted(Vec<String>),
}

#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: Option<DateTime<Utc>>,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &redact(&self.token))
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn get_token(&self, scopes: &[&str]) -> Result<AccessToken, CredentialError>;

    fn name(&self) -> &'static str;
}

/// Where bearer tokens for the agent come from.
#[derive(Clone)]
pub enum CredentialSource {
    StaticToken(String),
    Identity(Arc<dyn TokenCredential>),
    Unconfigured,
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::StaticToken(t) => write!(f, "StaticToken({})", redact(t)),
            CredentialSource::Identity(c) => write!(f, "Identity({})", c.name()),
            CredentialSource::Unconfigured => write!(f, "Unconfigured"),
        }
    }
}

impl CredentialSource {
    /// A non-blank static token wins over identity mode.
    pub fn from_settings(settings: &FoundrySettings, http: &reqwest::Client) -> Self {
        match settings.bearer_token.as_deref() {
            Some(token) if !token.trim().is_empty() => {
                CredentialSource::StaticToken(token.to_string())
            }
            _ if settings.use_azure_identity => {
                let chain = DefaultCredentialChain::from_settings(http.clone(), &settings.identity);
                CredentialSource::Identity(Arc::new(chain))
            }
            _ => CredentialSource::Unconfigured,
        }
    }

    /// Single attempt, no caching.
    pub async fn resolve_token(&self, scope: &str) -> Result<String, RelayError> {
        match self {
            CredentialSource::StaticToken(token) => {
                debug!("Using provided bearer token");
                Ok(token.clone())
            }
            CredentialSource::Identity(credential) => {
                debug!("Requesting token from {} for scope {}", credential.name(), scope);
                match credential.get_token(&[scope]).await {
                    Ok(access) => {
                        debug!("Token acquired: {}", redact(&access.token));
                        Ok(access.token)
                    }
                    Err(e) => {
                        error!("Failed to get token from {}: {}", credential.name(), e);
                        Err(RelayError::Auth(e))
                    }
                }
            }
            CredentialSource::Unconfigured =>
                Err(
                    RelayError::Configuration(
                        "Either a bearer token or Azure identity must be configured".to_string()
                    )
                ),
        }
    }
}

/// First few characters of a secret, for log lines.
pub fn redact(secret: &str) -> String {
    let prefix: String = secret.chars().take(6).collect();
    format!("{}...", prefix)
}

/// `https://ai.azure.com/.default` -> `https://ai.azure.com`
pub(crate) fn scope_to_resource(scope: &str) -> &str {
    scope.strip_suffix("/.default").unwrap_or(scope)
}

/// Expiry fields arrive as unix seconds, either numeric or as a string.
pub(crate) fn parse_unix_expiry(value: Option<&JsonValue>) -> Option<DateTime<Utc>> {
    let secs = match value? {
        JsonValue::Number(n) => n.as_i64()?,
        JsonValue::String(s) => s.trim().parse::<i64>().ok()?,
        _ => {
            return None;
        }
    };
    Utc.timestamp_opt(secs, 0).single()
}
