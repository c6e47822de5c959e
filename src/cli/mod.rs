use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Foundry Agent Args ---
    /// Enable forwarding conversations to the Foundry agent
    #[arg(long, env = "FOUNDRY_ENABLED", default_value = "false")]
    pub foundry_enabled: bool,

    /// Foundry project name
    #[arg(long, env = "FOUNDRY_PROJECT", default_value = "")]
    pub foundry_project: String,

    /// Foundry application (published agent) name
    #[arg(long, env = "FOUNDRY_APPLICATION", default_value = "")]
    pub foundry_application: String,

    /// Base URL of the Foundry resource (e.g., https://my-resource.services.ai.azure.com)
    #[arg(long, env = "FOUNDRY_ENDPOINT", default_value = "")]
    pub foundry_endpoint: String,

    /// Static bearer token. Takes precedence over Azure identity when set.
    #[arg(long, env = "FOUNDRY_BEARER_TOKEN")]
    pub foundry_bearer_token: Option<String>,

    /// Acquire tokens through the Azure identity credential chain
    #[arg(long, env = "FOUNDRY_USE_AZURE_IDENTITY", default_value = "false")]
    pub foundry_use_azure_identity: bool,

    /// api-version query parameter sent to the agent endpoints
    #[arg(long, env = "FOUNDRY_API_VERSION", default_value = "2025-11-15-preview")]
    pub foundry_api_version: String,

    /// Timeout in seconds for the outbound agent call
    #[arg(long, env = "FOUNDRY_RESPONSE_TIMEOUT", default_value = "30")]
    pub foundry_response_timeout: u64,

    /// Audience scope requested from the identity backend
    #[arg(long, env = "FOUNDRY_TOKEN_SCOPE", default_value = "https://ai.azure.com/.default")]
    pub foundry_token_scope: String,

    // --- Azure Identity Args ---
    /// Entra tenant used by the client secret credential
    #[arg(long, env = "AZURE_TENANT_ID")]
    pub azure_tenant_id: Option<String>,

    /// Application (client) id. Also selects a user-assigned managed identity.
    #[arg(long, env = "AZURE_CLIENT_ID")]
    pub azure_client_id: Option<String>,

    /// Client secret for the client secret credential
    #[arg(long, env = "AZURE_CLIENT_SECRET")]
    pub azure_client_secret: Option<String>,

    /// Entra authority host
    #[arg(long, env = "AZURE_AUTHORITY_HOST", default_value = "https://login.microsoftonline.com")]
    pub azure_authority_host: String,

    /// Managed identity endpoint injected by App Service / Container Apps
    #[arg(long, env = "IDENTITY_ENDPOINT")]
    pub identity_endpoint: Option<String>,

    /// Secret header value paired with IDENTITY_ENDPOINT
    #[arg(long, env = "IDENTITY_HEADER")]
    pub identity_header: Option<String>,

    // --- Server Args ---
    /// Host address and port for the HTTP server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:5000")]
    pub server_addr: String,

    /// Directory with the chat UI assets. Served with index.html fallback when it exists.
    #[arg(long, env = "STATIC_DIR", default_value = "wwwroot")]
    pub static_dir: String,

    /// Optional path to the TLS certificate file (PEM format) for enabling HTTPS. Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format) for enabling HTTPS. Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let args = Args::try_parse_from(["foundry-relay"]).unwrap();
        assert!(!args.foundry_enabled);
        assert_eq!(args.foundry_api_version, "2025-11-15-preview");
        assert_eq!(args.foundry_response_timeout, 30);
        assert_eq!(args.foundry_token_scope, "https://ai.azure.com/.default");
        assert!(args.foundry_bearer_token.is_none());
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::try_parse_from([
            "foundry-relay",
            "--foundry-enabled",
            "--foundry-project",
            "proj",
            "--foundry-response-timeout",
            "90",
        ]).unwrap();
        assert!(args.foundry_enabled);
        assert_eq!(args.foundry_project, "proj");
        assert_eq!(args.foundry_response_timeout, 90);
    }
}
