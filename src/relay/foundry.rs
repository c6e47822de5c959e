use async_trait::async_trait;
use log::{ debug, error, info, warn };
use reqwest::Client as HttpClient;
use std::sync::Arc;
use tokio::time::{ timeout_at, Instant };
use tokio_util::sync::CancellationToken;

use super::{ AgentClient, ChunkStream, RelayOutput };
use crate::auth::CredentialSource;
use crate::config::FoundrySettings;
use crate::error::RelayError;
use crate::models::chat::{ last_user_message, ChatMessage, ResponsesRequest };

/// Client for a Foundry agent's OpenAI-compatible responses endpoint.
pub struct FoundryClient {
    http: HttpClient,
    settings: Arc<FoundrySettings>,
    credentials: CredentialSource,
}

impl FoundryClient {
    pub fn new(
        http: HttpClient,
        settings: Arc<FoundrySettings>,
        credentials: CredentialSource
    ) -> Self {
        Self { http, settings, credentials }
    }

    pub fn from_settings(settings: Arc<FoundrySettings>) -> Result<Self, RelayError> {
        let http = HttpClient::builder().pool_max_idle_per_host(10).build()?;
        let credentials = CredentialSource::from_settings(&settings, &http);
        match &credentials {
            CredentialSource::StaticToken(_) => info!("Using static bearer token for Foundry authentication"),
            CredentialSource::Identity(c) => info!("Using Azure identity ({}) for Foundry authentication", c.name()),
            CredentialSource::Unconfigured if settings.enabled => {
                warn!("Foundry is enabled but neither a bearer token nor Azure identity is configured");
            }
            CredentialSource::Unconfigured => {}
        }
        Ok(Self::new(http, settings, credentials))
    }

    async fn dispatch(
        &self,
        input: &str,
        token: &str,
        stream: bool,
        deadline: Instant
    ) -> Result<reqwest::Response, RelayError> {
        let endpoint = self.settings.responses_endpoint();
        let payload = ResponsesRequest { input, stream };
        debug!("Sending request to Foundry: {} (stream={})", endpoint, stream);

        let request = self.http.post(&endpoint).bearer_auth(token).json(&payload);
        let response = match timeout_at(deadline, request.send()).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                error!("Request error occurred: {}", e);
                return Err(RelayError::Transport(e));
            }
            Err(_) => {
                error!("Request to Foundry timed out after {}s", self.settings.response_timeout_secs);
                return Err(RelayError::Timeout(self.settings.response_timeout_secs));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = match timeout_at(deadline, response.text()).await {
                Ok(Ok(body)) => body,
                Ok(Err(e)) => {
                    warn!("Failed to read Foundry error body: {}", e);
                    String::new()
                }
                Err(_) => {
                    error!(
                        "Foundry returned {} but its body did not arrive within {}s",
                        status,
                        self.settings.response_timeout_secs
                    );
                    return Err(RelayError::Timeout(self.settings.response_timeout_secs));
                }
            };
            error!("HTTP error occurred: {} - {}", status, body);
            return Err(RelayError::Upstream { status: status.as_u16(), body });
        }
        Ok(response)
    }
}

/// Content of the last user message, which must be non-blank.
fn validate_input(messages: &[ChatMessage]) -> Result<&str, RelayError> {
    last_user_message(messages)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| RelayError::Validation("no user message found".to_string()))
}

#[async_trait]
impl AgentClient for FoundryClient {
    async fn forward(
        &self,
        messages: &[ChatMessage],
        stream: bool,
        cancel: CancellationToken
    ) -> Result<RelayOutput, RelayError> {
        let input = validate_input(messages)?;

        let token = self.credentials.resolve_token(&self.settings.token_scope).await?;
        if token.trim().is_empty() {
            return Err(RelayError::Validation("Bearer token is empty or invalid".to_string()));
        }

        let deadline = Instant::now() + self.settings.response_timeout();
        let response = self.dispatch(input, &token, stream, deadline).await?;

        if stream {
            return Ok(RelayOutput::Stream(ChunkStream::from_response(response, cancel)));
        }

        match timeout_at(deadline, response.text()).await {
            Ok(body) => Ok(RelayOutput::Complete(body?)),
            Err(_) => Err(RelayError::Timeout(self.settings.response_timeout_secs)),
        }
    }
}
