//! Guest credential client.
//!
//! The credential service issues short-lived guest tokens over plain
//! HTTP. A token is single-claim: the server revokes it when its lobby
//! connection ends, so every reconnect needs a fresh one.

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("credential request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("credential request rejected: HTTP {0}")]
    Rejected(reqwest::StatusCode),
}

/// An issued guest credential. `expires_at` is advisory, display-only;
/// the client does not enforce it.
#[derive(Debug, Clone, Deserialize)]
pub struct Credential {
    pub token: String,
    #[serde(default)]
    pub expires_at: String,
    #[serde(default)]
    pub name: String,
}

/// Request a guest credential, optionally suggesting a display name.
/// The server may sanitize or replace the name; the returned copy is
/// authoritative.
pub async fn request_guest_credential(
    http: &reqwest::Client,
    base_url: &str,
    name: Option<&str>,
) -> Result<Credential, AuthError> {
    let url = format!("{}/api/v1/auth/guest", base_url.trim_end_matches('/'));
    tracing::debug!(%url, "requesting guest credential");
    let response = http
        .post(&url)
        .json(&serde_json::json!({ "name": name }))
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(AuthError::Rejected(response.status()));
    }
    Ok(response.json().await?)
}
