//! HTTP client builder for API and authorization server traffic.

use std::time::Duration;

use reqwest_middleware::ClientBuilder;
use reqwest_retry::RetryTransientMiddleware;

use super::RetryAfterPolicy;
use crate::error::Error;

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    /// Retries of transient failures. Only applied to API calls.
    pub max_retries: u32,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 2,
            user_agent: format!("token-auth/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// API client with retry middleware.
pub type AuthenticatedClient = reqwest_middleware::ClientWithMiddleware;

/// Builds the two clients the crate uses: a retrying client for API calls and a
/// plain client for discovery and token grants.
#[derive(Debug, Clone, Default)]
pub struct AuthenticatedClientBuilder {
    config: HttpClientConfig,
}

impl AuthenticatedClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.config.user_agent = user_agent;
        self
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// Client for discovery and token endpoint requests. No retries: a replayed
    /// grant can consume a rotated refresh token.
    pub fn build_plain(&self) -> Result<reqwest::Client, Error> {
        let client = reqwest::Client::builder()
            .timeout(self.config.timeout)
            .user_agent(self.config.user_agent.clone())
            .build()?;
        Ok(client)
    }

    /// Client for API requests, retrying transient failures.
    pub fn build(&self) -> Result<AuthenticatedClient, Error> {
        let retry_policy = RetryAfterPolicy::new(self.config.max_retries);
        let client = ClientBuilder::new(self.build_plain()?)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        Ok(client)
    }
}
