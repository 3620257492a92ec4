use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::info;

/// Engine credential as served by the session server. A short-lived token
/// is preferred; a raw API key is the fallback.
#[derive(Debug, Deserialize)]
struct EngineCredentialResponse {
    token: Option<String>,
    #[serde(rename = "apiKey")]
    api_key: Option<String>,
}

/// Fetch the transcription credential once, before capture starts. Both
/// engine sockets authenticate with the same credential.
pub async fn fetch_transcription_credential(server_base_url: &str) -> Result<String> {
    let url = format!(
        "{}/api/config/assemblyai",
        server_base_url.trim_end_matches('/')
    );
    info!(%url, "fetching transcription credential");

    let response = reqwest::get(&url)
        .await
        .context("credential request failed")?
        .error_for_status()
        .context("credential endpoint returned an error status")?;

    let credential: EngineCredentialResponse = response
        .json()
        .await
        .context("credential response was not valid JSON")?;

    if let Some(token) = credential.token.filter(|t| !t.is_empty()) {
        return Ok(token);
    }
    if let Some(api_key) = credential.api_key.filter(|k| !k.is_empty()) {
        return Ok(api_key);
    }
    bail!("session server returned neither token nor apiKey")
}
