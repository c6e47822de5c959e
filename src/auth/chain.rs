use async_trait::async_trait;
use log::{ debug, info, warn };
use std::sync::Arc;

use super::{
    AccessToken,
    AzureCliCredential,
    ClientSecretCredential,
    CredentialError,
    ManagedIdentityCredential,
    TokenCredential,
};
use crate::config::IdentitySettings;

/// Tries each credential in order and returns the first token obtained.
pub struct DefaultCredentialChain {
    sources: Vec<Arc<dyn TokenCredential>>,
}

impl DefaultCredentialChain {
    pub fn new(sources: Vec<Arc<dyn TokenCredential>>) -> Self {
        Self { sources }
    }

    /// Environment client secret (when fully configured), then managed identity, then Azure CLI.
    pub fn from_settings(http: reqwest::Client, identity: &IdentitySettings) -> Self {
        let mut sources: Vec<Arc<dyn TokenCredential>> = Vec::new();

        if
            let (Some(tenant), Some(client_id), Some(secret)) = (
                &identity.tenant_id,
                &identity.client_id,
                &identity.client_secret,
            )
        {
            sources.push(
                Arc::new(
                    ClientSecretCredential::new(
                        http.clone(),
                        identity.authority_host.clone(),
                        tenant.clone(),
                        client_id.clone(),
                        secret.clone()
                    )
                )
            );
        }
        sources.push(Arc::new(ManagedIdentityCredential::from_settings(http, identity)));
        sources.push(Arc::new(AzureCliCredential::default()));

        info!(
            "Azure identity chain: {}",
            sources
                .iter()
                .map(|s| s.name())
                .collect::<Vec<_>>()
                .join(" -> ")
        );
        Self::new(sources)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[async_trait]
impl TokenCredential for DefaultCredentialChain {
    async fn get_token(&self, scopes: &[&str]) -> Result<AccessToken, CredentialError> {
        let mut failures = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            match source.get_token(scopes).await {
                Ok(token) => {
                    debug!("{} produced a token", source.name());
                    return Ok(token);
                }
                Err(e) => {
                    warn!("{} failed: {}", source.name(), e);
                    failures.push(format!("{}: {}", source.name(), e));
                }
            }
        }
        Err(CredentialError::ChainExhausted(failures))
    }

    fn name(&self) -> &'static str {
        "DefaultCredentialChain"
    }
}
