use crate::auth::{AuthEndpointConfig, Credential, CredentialProvider};
use crate::error::AuthRequestError;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Requests bearer tokens with `POST <auth_url>`.
pub struct HttpCredentialProvider {
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    app_name: &'a str,
    expiration: u32,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    /// Seconds from now.
    expires_in: Option<i64>,
    /// Unix timestamp in seconds.
    expires_at: Option<i64>,
}

impl HttpCredentialProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    async fn fetch(&self, auth: &AuthEndpointConfig) -> Result<Credential, AuthRequestError> {
        let body = TokenRequest {
            app_name: &auth.app_name,
            expiration: auth.requested_lifetime_minutes,
        };

        let response = self
            .client
            .post(&auth.auth_url)
            .timeout(auth.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthRequestError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthRequestError::Status {
                status: status.as_u16(),
            });
        }

        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| AuthRequestError::InvalidBody(e.to_string()))?;

        let issued_at = Utc::now();
        let credential = credential_from_response(token, issued_at, auth.requested_lifetime_minutes)?;

        debug!(
            auth_url = %auth.auth_url,
            expires_at = %credential.expires_at(),
            "Fetched bearer token"
        );

        Ok(credential)
    }
}

fn credential_from_response(
    token: TokenResponse,
    issued_at: DateTime<Utc>,
    requested_lifetime_minutes: u32,
) -> Result<Credential, AuthRequestError> {
    let value = token
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or(AuthRequestError::MissingToken)?;

    let expires_at = match (token.expires_at, token.expires_in) {
        (Some(at), _) => {
            DateTime::from_timestamp(at, 0).ok_or(AuthRequestError::InvalidExpiry)?
        }
        (None, Some(seconds)) => TimeDelta::try_seconds(seconds)
            .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
            .ok_or(AuthRequestError::InvalidExpiry)?,
        (None, None) => {
            issued_at + TimeDelta::minutes(i64::from(requested_lifetime_minutes))
        }
    };

    Credential::new(value, issued_at, expires_at).map_err(|_| AuthRequestError::InvalidExpiry)
}
