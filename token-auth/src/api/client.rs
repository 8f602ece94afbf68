//! API fetch client with silent token renewal.

use std::sync::Arc;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ResponseCache;
use crate::http::AuthenticatedClient;
use crate::oauth::Authenticator;
use crate::ui_error::{ErrorFactory, UIError};

/// Value of the `x-mycompany-api-client` header.
pub const API_CLIENT_NAME: &str = "MobileRustClient";

const HEADER_API_CLIENT: &str = "x-mycompany-api-client";
const HEADER_SESSION_ID: &str = "x-mycompany-session-id";
const HEADER_CORRELATION_ID: &str = "x-mycompany-correlation-id";

const SOURCE_API: &str = "Web API";
const SOURCE_USER_INFO: &str = "User Info";

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Cache successful GET responses under this key.
    pub cache_key: Option<String>,
    /// Ignore any cached response and refresh it from the server.
    pub force_reload: bool,
}

impl CallOptions {
    pub fn cached(key: impl Into<String>, force_reload: bool) -> Self {
        Self {
            cache_key: Some(key.into()),
            force_reload,
        }
    }
}

/// A successful response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, UIError> {
        serde_json::from_str(&self.body).map_err(ErrorFactory::from_exception)
    }
}

enum Attempt {
    Unauthorized,
    Done(ApiResponse),
}

/// Calls the API with the current access token.
///
/// A 401 triggers one coordinated refresh and one retry. A second 401, or a
/// refresh that fails, ends the session and reports `login_required`. Cached
/// responses are only served while a token is held.
pub struct ApiClient {
    base_url: String,
    client: AuthenticatedClient,
    authenticator: Arc<Authenticator>,
    session_id: String,
    cache: ResponseCache,
}

impl ApiClient {
    pub fn new(base_url: &str, client: AuthenticatedClient, authenticator: Arc<Authenticator>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            authenticator,
            session_id: Uuid::new_v4().to_string(),
            cache: ResponseCache::new(),
        }
    }

    /// Stable for the lifetime of this client.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Call `endpoint`, either a path under the base URL or an absolute URL.
    pub async fn call(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<serde_json::Value>,
        options: &CallOptions,
    ) -> Result<ApiResponse, UIError> {
        let url = self.resolve(endpoint);
        self.call_url(&url, method, body, options, SOURCE_API).await
    }

    pub async fn get_companies(&self, force_reload: bool) -> Result<serde_json::Value, UIError> {
        self.call("/companies", Method::GET, None, &CallOptions::cached("companies", force_reload))
            .await?
            .json()
    }

    /// Transactions for one company. The id is validated before any request is sent.
    pub async fn get_company_transactions(
        &self,
        company_id: &str,
        force_reload: bool,
    ) -> Result<serde_json::Value, UIError> {
        let id = company_id
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| ErrorFactory::from_invalid_company_id(company_id))?;

        let path = format!("/companies/{}/transactions", id);
        let options = CallOptions::cached(format!("transactions-{}", id), force_reload);
        self.call(&path, Method::GET, None, &options).await?.json()
    }

    /// Claims from the user info endpoint.
    pub async fn get_user_info(&self) -> Result<serde_json::Value, UIError> {
        let url = self.authenticator.user_info_endpoint().await?;
        self.call_url(&url, Method::GET, None, &CallOptions::default(), SOURCE_USER_INFO)
            .await?
            .json()
    }

    async fn call_url(
        &self,
        url: &str,
        method: Method,
        body: Option<serde_json::Value>,
        options: &CallOptions,
        source: &str,
    ) -> Result<ApiResponse, UIError> {
        let Some(token) = self.authenticator.get_access_token().await? else {
            self.cache.clear();
            return Err(ErrorFactory::from_login_required());
        };

        let cache_key = options.cache_key.as_deref().filter(|_| method == Method::GET);
        if let Some(key) = cache_key {
            if options.force_reload {
                self.cache.remove(key);
            } else if let Some(cached) = self.cache.get(key) {
                debug!("Serving {} from cache", key);
                return Ok(cached);
            }
        }

        let response = match self.attempt(url, &method, body.as_ref(), &token, source).await? {
            Attempt::Done(response) => response,
            Attempt::Unauthorized => {
                debug!("Access token rejected, refreshing and retrying once");
                if let Err(e) = self.authenticator.synchronized_refresh_access_token().await {
                    warn!("Token refresh after a 401 failed: {}", e);
                    return Err(self.end_session().await);
                }
                let Some(token) = self.authenticator.get_access_token().await? else {
                    return Err(self.end_session().await);
                };
                match self.attempt(url, &method, body.as_ref(), &token, source).await? {
                    Attempt::Done(response) => response,
                    Attempt::Unauthorized => return Err(self.end_session().await),
                }
            }
        };

        if let Some(key) = cache_key {
            self.cache.put(key, response.clone());
        }
        Ok(response)
    }

    async fn attempt(
        &self,
        url: &str,
        method: &Method,
        body: Option<&serde_json::Value>,
        token: &str,
        source: &str,
    ) -> Result<Attempt, UIError> {
        let correlation_id = Uuid::new_v4().to_string();
        debug!("{} {} (correlation id {})", method, url, correlation_id);

        let mut request = self
            .client
            .request(method.clone(), url)
            .bearer_auth(token)
            .header(HEADER_API_CLIENT, API_CLIENT_NAME)
            .header(HEADER_SESSION_ID, &self.session_id)
            .header(HEADER_CORRELATION_ID, &correlation_id);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ErrorFactory::from_http_request_error(&e, url, source))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Ok(Attempt::Unauthorized);
        }

        let text = response
            .text()
            .await
            .map_err(|e| ErrorFactory::from_http_request_error(&e, url, source))?;
        if !status.is_success() {
            return Err(ErrorFactory::from_http_response_error(
                status.as_u16(),
                &text,
                url,
                source,
            ));
        }

        Ok(Attempt::Done(ApiResponse {
            status: status.as_u16(),
            body: text,
        }))
    }

    async fn end_session(&self) -> UIError {
        info!("The session could not be renewed, a new login is required");
        self.authenticator.clear_login_state().await;
        self.cache.clear();
        ErrorFactory::from_login_required()
    }

    fn resolve(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{EncryptionManager, InMemoryKeyStore};
    use crate::http::AuthenticatedClientBuilder;
    use crate::oauth::config::test_config;
    use crate::token::{MemoryStorage, TokenData, TokenStore};
    use crate::ui_error::error_codes;
    use mockito::{Matcher, Server};

    async fn api_client(server: &Server, tokens: Option<TokenData>) -> ApiClient {
        let store = TokenStore::new(
            Arc::new(MemoryStorage::new()),
            EncryptionManager::new(Arc::new(InMemoryKeyStore::new()), "tokens"),
        );
        if let Some(tokens) = tokens {
            store.save_tokens(tokens).await.unwrap();
        }
        let authenticator = Arc::new(Authenticator::new(
            test_config(&server.url()),
            store,
            reqwest::Client::new(),
        ));
        let client = AuthenticatedClientBuilder::new()
            .with_max_retries(0)
            .build()
            .unwrap();
        ApiClient::new(&server.url(), client, authenticator)
    }

    fn access_only(token: &str) -> Option<TokenData> {
        Some(TokenData {
            access_token: Some(token.to_string()),
            refresh_token: None,
            id_token: None,
        })
    }

    #[tokio::test]
    async fn test_sends_bearer_and_diagnostic_headers() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/companies")
            .match_header("authorization", "Bearer at")
            .match_header(HEADER_API_CLIENT, API_CLIENT_NAME)
            .match_header(HEADER_SESSION_ID, Matcher::Regex("^[0-9a-f-]{36}$".into()))
            .match_header(HEADER_CORRELATION_ID, Matcher::Regex("^[0-9a-f-]{36}$".into()))
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let client = api_client(&server, access_only("at")).await;
        let response = client
            .call("companies", Method::GET, None, &CallOptions::default())
            .await
            .unwrap();

        assert_eq!(response.body, "[]");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_cached_response_is_reused_until_force_reload() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/companies")
            .with_status(200)
            .with_body(r#"[{"id":1}]"#)
            .expect(2)
            .create_async()
            .await;

        let client = api_client(&server, access_only("at")).await;
        client.get_companies(false).await.unwrap();
        client.get_companies(false).await.unwrap();
        let companies = client.get_companies(true).await.unwrap();

        assert_eq!(companies[0]["id"], 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_invalid_company_id_sends_nothing() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let client = api_client(&server, access_only("at")).await;
        let err = client.get_company_transactions("abc", false).await.unwrap_err();

        assert_eq!(err.error_code(), error_codes::INVALID_COMPANY_ID);
        assert!(err.is_expected_api_error());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_company_not_found_passes_through() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/companies/3/transactions")
            .with_status(404)
            .with_body(r#"{"code":"company_not_found","message":"Company 3 was not found"}"#)
            .create_async()
            .await;

        let client = api_client(&server, access_only("at")).await;
        let err = client.get_company_transactions("3", false).await.unwrap_err();

        assert_eq!(err.error_code(), error_codes::COMPANY_NOT_FOUND);
        assert_eq!(err.status_code(), 404);
        assert!(err.url().ends_with("/companies/3/transactions"));
    }

    #[tokio::test]
    async fn test_network_failure_is_api_network_error() {
        let server = Server::new_async().await;
        let client = api_client(&server, access_only("at")).await;

        let err = client
            .call("http://127.0.0.1:1/companies", Method::GET, None, &CallOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), error_codes::API_NETWORK_ERROR);
    }

    #[tokio::test]
    async fn test_post_sends_json_body_and_skips_cache() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/companies")
            .match_body(Matcher::Json(serde_json::json!({"name": "Acme"})))
            .with_status(201)
            .with_body(r#"{"id":9}"#)
            .create_async()
            .await;

        let client = api_client(&server, access_only("at")).await;
        let response = client
            .call(
                "/companies",
                Method::POST,
                Some(serde_json::json!({"name": "Acme"})),
                &CallOptions::cached("companies", false),
            )
            .await
            .unwrap();

        assert_eq!(response.status, 201);
        assert!(client.cache().is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_resolve_joins_paths() {
        let server = Server::new_async().await;
        let client = api_client(&server, None).await;
        assert_eq!(client.resolve("/companies"), format!("{}/companies", server.url()));
        assert_eq!(client.resolve("companies"), format!("{}/companies", server.url()));
        assert_eq!(client.resolve("https://other/x"), "https://other/x");
    }
}
