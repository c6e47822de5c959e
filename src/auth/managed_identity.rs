use async_trait::async_trait;
use log::debug;
use serde_json::Value as JsonValue;
use std::time::Duration;

use super::{ parse_unix_expiry, scope_to_resource, AccessToken, CredentialError, TokenCredential };
use crate::config::IdentitySettings;

const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IMDS_API_VERSION: &str = "2018-02-01";
const APP_SERVICE_API_VERSION: &str = "2019-08-01";
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
enum Source {
    AppService {
        endpoint: String,
        header: String,
    },
    Imds {
        endpoint: String,
    },
}

pub struct ManagedIdentityCredential {
    http: reqwest::Client,
    source: Source,
    client_id: Option<String>,
}

impl ManagedIdentityCredential {
    /// App Service style when IDENTITY_ENDPOINT and IDENTITY_HEADER are both set, IMDS otherwise.
    pub fn from_settings(http: reqwest::Client, identity: &IdentitySettings) -> Self {
        let source = match (&identity.identity_endpoint, &identity.identity_header) {
            (Some(endpoint), Some(header)) =>
                Source::AppService {
                    endpoint: endpoint.clone(),
                    header: header.clone(),
                },
            _ => Source::Imds { endpoint: IMDS_ENDPOINT.to_string() },
        };
        Self { http, source, client_id: identity.client_id.clone() }
    }

    pub fn imds(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self { http, source: Source::Imds { endpoint: endpoint.into() }, client_id: None }
    }

    pub fn app_service(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        header: impl Into<String>
    ) -> Self {
        Self {
            http,
            source: Source::AppService { endpoint: endpoint.into(), header: header.into() },
            client_id: None,
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    fn request(&self, resource: &str) -> reqwest::RequestBuilder {
        let mut query: Vec<(&str, &str)> = Vec::with_capacity(3);
        let req = match &self.source {
            Source::AppService { endpoint, header } => {
                query.push(("api-version", APP_SERVICE_API_VERSION));
                self.http.get(endpoint).header("X-IDENTITY-HEADER", header.as_str())
            }
            Source::Imds { endpoint } => {
                query.push(("api-version", IMDS_API_VERSION));
                self.http.get(endpoint).header("Metadata", "true").timeout(PROBE_TIMEOUT)
            }
        };
        query.push(("resource", resource));
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.as_str()));
        }
        req.query(&query)
    }
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    async fn get_token(&self, scopes: &[&str]) -> Result<AccessToken, CredentialError> {
        let scope = match scopes {
            [single] => *single,
            _ => {
                return Err(
                    CredentialError::Unavailable(
                        self.name(),
                        "managed identity accepts exactly one scope".to_string()
                    )
                );
            }
        };
        let resource = scope_to_resource(scope);
        debug!("Requesting managed identity token ({:?}) for {}", self.source, resource);

        let resp = self
            .request(resource)
            .send().await
            .map_err(|e| CredentialError::Unavailable(self.name(), e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CredentialError::TokenEndpoint { status: status.as_u16(), body });
        }

        let body: JsonValue = resp
            .json().await
            .map_err(|e| CredentialError::InvalidResponse(e.to_string()))?;
        let token = body
            .get("access_token")
            .and_then(|v| v.as_str())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CredentialError::InvalidResponse("missing access_token".to_string()))?;

        Ok(AccessToken {
            token: token.to_string(),
            expires_on: parse_unix_expiry(body.get("expires_on")),
        })
    }

    fn name(&self) -> &'static str {
        "ManagedIdentityCredential"
    }
}
