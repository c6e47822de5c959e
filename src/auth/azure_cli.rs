use async_trait::async_trait;
use chrono::{ DateTime, Local, NaiveDateTime, TimeZone, Utc };
use log::debug;
use serde_json::Value as JsonValue;
use tokio::process::Command;

use super::{ parse_unix_expiry, AccessToken, CredentialError, TokenCredential };

/// Borrows the signed-in `az login` session.
pub struct AzureCliCredential {
    program: String,
}

impl Default for AzureCliCredential {
    fn default() -> Self {
        let program = if cfg!(windows) { "az.cmd" } else { "az" };
        Self { program: program.to_string() }
    }
}

impl AzureCliCredential {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }
}

/// Parses `az account get-access-token --output json`.
pub(crate) fn parse_cli_output(stdout: &[u8]) -> Result<AccessToken, CredentialError> {
    let body: JsonValue = serde_json
        ::from_slice(stdout)
        .map_err(|e| CredentialError::InvalidResponse(format!("az output is not JSON: {}", e)))?;

    let token = body
        .get("accessToken")
        .and_then(|v| v.as_str())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| CredentialError::InvalidResponse("missing accessToken".to_string()))?;

    // Newer CLI versions add `expires_on` (unix seconds); older ones only the local-time `expiresOn`.
    let expires_on = parse_unix_expiry(body.get("expires_on")).or_else(||
        body.get("expiresOn").and_then(|v| v.as_str()).and_then(parse_local_expiry)
    );

    Ok(AccessToken { token: token.to_string(), expires_on })
}

fn parse_local_expiry(value: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f").ok()?;
    Local.from_local_datetime(&naive).single().map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl TokenCredential for AzureCliCredential {
    async fn get_token(&self, scopes: &[&str]) -> Result<AccessToken, CredentialError> {
        let scope = scopes.join(" ");
        debug!("Requesting token from Azure CLI for {}", scope);

        let output = Command::new(&self.program)
            .args(["account", "get-access-token", "--output", "json", "--scope", scope.as_str()])
            .kill_on_drop(true)
            .output().await
            .map_err(|e| CredentialError::Unavailable(self.name(), e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(CredentialError::Unavailable(self.name(), stderr));
        }

        parse_cli_output(&output.stdout)
    }

    fn name(&self) -> &'static str {
        "AzureCliCredential"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_unix_expiry() {
        let out = br#"{"accessToken":"cli-token","expiresOn":"2030-01-01 00:00:00.000000","expires_on":1700000000,"tokenType":"Bearer"}"#;
        let token = parse_cli_output(out).unwrap();
        assert_eq!(token.token, "cli-token");
        assert_eq!(token.expires_on.map(|t| t.timestamp()), Some(1_700_000_000));
    }

    #[test]
    fn falls_back_to_local_expiry() {
        let out = br#"{"accessToken":"cli-token","expiresOn":"2030-01-01 10:30:00.123456"}"#;
        let token = parse_cli_output(out).unwrap();
        assert!(token.expires_on.is_some());
    }

    #[test]
    fn rejects_output_without_token() {
        let err = parse_cli_output(br#"{"tokenType":"Bearer"}"#).unwrap_err();
        assert!(matches!(err, CredentialError::InvalidResponse(_)));
        let err = parse_cli_output(b"ERROR: Please run 'az login'").unwrap_err();
        assert!(matches!(err, CredentialError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let credential = AzureCliCredential::with_program("definitely-not-an-az-binary");
        let err = credential.get_token(&["https://ai.azure.com/.default"]).await.unwrap_err();
        assert!(matches!(err, CredentialError::Unavailable("AzureCliCredential", _)));
    }
}
