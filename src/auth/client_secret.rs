use async_trait::async_trait;
use chrono::{ Duration as ChronoDuration, Utc };
use log::debug;
use serde::Deserialize;

use super::{ AccessToken, CredentialError, TokenCredential };

/// OAuth2 client-credentials grant against Entra ID.
pub struct ClientSecretCredential {
    http: reqwest::Client,
    authority_host: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
}

impl ClientSecretCredential {
    pub fn new(
        http: reqwest::Client,
        authority_host: impl Into<String>,
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>
    ) -> Self {
        Self {
            http,
            authority_host: authority_host.into(),
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_host.trim_end_matches('/'),
            self.tenant_id
        )
    }
}

#[async_trait]
impl TokenCredential for ClientSecretCredential {
    async fn get_token(&self, scopes: &[&str]) -> Result<AccessToken, CredentialError> {
        let url = self.token_url();
        let scope = scopes.join(" ");
        debug!("Requesting client credentials token from {}", url);

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", scope.as_str()),
        ];
        let resp = self.http.post(&url).form(&form).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CredentialError::TokenEndpoint { status: status.as_u16(), body });
        }

        let parsed: TokenResponse = resp
            .json().await
            .map_err(|e| CredentialError::InvalidResponse(e.to_string()))?;
        let token = parsed.access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CredentialError::InvalidResponse("missing access_token".to_string()))?;

        Ok(AccessToken {
            token,
            expires_on: parsed.expires_in.map(|secs| Utc::now() + ChronoDuration::seconds(secs)),
        })
    }

    fn name(&self) -> &'static str {
        "ClientSecretCredential"
    }
}
