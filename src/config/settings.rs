use crate::cli::Args;
use log::{ info, warn };
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_API_VERSION: &str = "2025-11-15-preview";
pub const DEFAULT_RESPONSE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_TOKEN_SCOPE: &str = "https://ai.azure.com/.default";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("{0} is required when Foundry is enabled")]
    Missing(&'static str),
    #[error("invalid Foundry endpoint '{endpoint}': {reason}")]
    InvalidEndpoint {
        endpoint: String,
        reason: String,
    },
}

/// Identity backend parameters, passed through to the credential chain.
#[derive(Debug, Clone, Default)]
pub struct IdentitySettings {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub authority_host: String,
    pub identity_endpoint: Option<String>,
    pub identity_header: Option<String>,
}

/// Process-wide Foundry settings. Built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct FoundrySettings {
    pub enabled: bool,
    pub project: String,
    pub application: String,
    pub endpoint: String,
    pub bearer_token: Option<String>,
    pub use_azure_identity: bool,
    pub api_version: String,
    pub response_timeout_secs: u64,
    pub token_scope: String,
    pub identity: IdentitySettings,
}

impl Default for FoundrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            project: String::new(),
            application: String::new(),
            endpoint: String::new(),
            bearer_token: None,
            use_azure_identity: false,
            api_version: DEFAULT_API_VERSION.to_string(),
            response_timeout_secs: DEFAULT_RESPONSE_TIMEOUT_SECS,
            token_scope: DEFAULT_TOKEN_SCOPE.to_string(),
            identity: IdentitySettings {
                authority_host: "https://login.microsoftonline.com".to_string(),
                ..Default::default()
            },
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

impl From<&Args> for FoundrySettings {
    fn from(args: &Args) -> Self {
        Self {
            enabled: args.foundry_enabled,
            project: args.foundry_project.clone(),
            application: args.foundry_application.clone(),
            endpoint: args.foundry_endpoint.clone(),
            bearer_token: non_blank(&args.foundry_bearer_token),
            use_azure_identity: args.foundry_use_azure_identity,
            api_version: args.foundry_api_version.clone(),
            response_timeout_secs: args.foundry_response_timeout,
            token_scope: args.foundry_token_scope.clone(),
            identity: IdentitySettings {
                tenant_id: non_blank(&args.azure_tenant_id),
                client_id: non_blank(&args.azure_client_id),
                client_secret: non_blank(&args.azure_client_secret),
                authority_host: args.azure_authority_host.clone(),
                identity_endpoint: non_blank(&args.identity_endpoint),
                identity_header: non_blank(&args.identity_header),
            },
        }
    }
}

impl FoundrySettings {
    fn base(&self) -> &str {
        self.endpoint.trim_end_matches('/')
    }

    /// OpenAI-compatible responses endpoint of the published agent.
    pub fn responses_endpoint(&self) -> String {
        format!(
            "{}/api/projects/{}/applications/{}/protocols/openai/responses?api-version={}",
            self.base(),
            self.project,
            self.application,
            self.api_version
        )
    }

    /// Activity protocol endpoint of the published agent.
    pub fn activity_endpoint(&self) -> String {
        format!(
            "{}/api/projects/{}/applications/{}/protocols/activityprotocol?api-version={}",
            self.base(),
            self.project,
            self.application,
            self.api_version
        )
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    pub fn has_static_token(&self) -> bool {
        self.bearer_token.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    /// Checks the settings needed to reach the agent. A disabled relay is always valid.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !self.enabled {
            return Ok(());
        }
        if self.endpoint.trim().is_empty() {
            return Err(SettingsError::Missing("FOUNDRY_ENDPOINT"));
        }
        if self.project.trim().is_empty() {
            return Err(SettingsError::Missing("FOUNDRY_PROJECT"));
        }
        if self.application.trim().is_empty() {
            return Err(SettingsError::Missing("FOUNDRY_APPLICATION"));
        }

        let parsed = Url::parse(&self.endpoint).map_err(|e| SettingsError::InvalidEndpoint {
            endpoint: self.endpoint.clone(),
            reason: e.to_string(),
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(SettingsError::InvalidEndpoint {
                endpoint: self.endpoint.clone(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }

        if !self.has_static_token() && !self.use_azure_identity {
            warn!("Foundry is enabled but neither a bearer token nor Azure identity is configured");
        }
        Ok(())
    }

    pub fn credential_mode(&self) -> &'static str {
        if self.has_static_token() {
            "static bearer token"
        } else if self.use_azure_identity {
            "azure identity"
        } else {
            "none"
        }
    }

    pub fn log_summary(&self) {
        info!("--- Foundry Configuration ---");
        info!("Foundry Enabled: {}", self.enabled);
        if self.enabled {
            info!("Foundry Endpoint: {}", self.endpoint);
            info!("Foundry Project: {}", self.project);
            info!("Foundry Application: {}", self.application);
            info!("Foundry API Version: {}", self.api_version);
            info!("Responses Endpoint: {}", self.responses_endpoint());
            info!("Activity Endpoint: {}", self.activity_endpoint());
            info!("Credential Mode: {}", self.credential_mode());
            info!("Response Timeout: {}s", self.response_timeout_secs);
        }
        info!("-----------------------------");
    }
}
