use crate::auth::Credential;
use crate::error::AuthRequestError;
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AuthEndpointConfig {
    pub auth_url: String,
    pub requested_lifetime_minutes: u32,
    /// Sent as `appName` in the token request.
    pub app_name: String,
    pub request_timeout: Duration,
}

/// Fetches a new credential. One call is one request, retries belong to the
/// caller.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn fetch(&self, auth: &AuthEndpointConfig) -> Result<Credential, AuthRequestError>;
}
