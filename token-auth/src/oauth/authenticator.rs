//! The session lifecycle: login, silent refresh and logout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use secrecy::SecretString;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use url::Url;

use super::logout::{end_session_builder, EndSessionUrlBuilder, LOGOUT_NOT_SUPPORTED};
use super::metadata::{fetch_metadata, Metadata};
use super::pkce::CHALLENGE_METHOD;
use super::redirect::{CallbackParams, RedirectKind, RedirectLauncher, RedirectRequest, RedirectResponse};
use super::state::StateManager;
use super::token_client::TokenClient;
use super::OAuthConfig;
use crate::error::{protocol_error, Error, ProtocolCategory};
use crate::token::{RefreshCoordinator, TokenData, TokenStore};
use crate::ui_error::{error_codes, ErrorFactory, UIError};

/// Where the authenticator is in the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoSession,
    LoginInFlight,
    Authenticated,
    RefreshInFlight,
    LogoutInFlight,
}

/// Owns the OAuth session for one user of the app.
///
/// Shared as `Arc<Authenticator>`. Every public operation returns a [`UIError`] on
/// failure; `login_required` and `redirect_cancelled` are control signals rather
/// than faults.
pub struct Authenticator {
    config: OAuthConfig,
    http: reqwest::Client,
    token_client: TokenClient,
    store: TokenStore,
    coordinator: RefreshCoordinator,
    metadata: OnceCell<Metadata>,
    login_state: StateManager,
    end_session: Box<dyn EndSessionUrlBuilder>,
    session: Mutex<SessionState>,
}

impl Authenticator {
    /// `http` is used for discovery and token grants and should not retry.
    pub fn new(config: OAuthConfig, store: TokenStore, http: reqwest::Client) -> Self {
        let token_client = TokenClient::new(http.clone(), &config.client_id, &config.redirect_uri);
        let end_session = end_session_builder(&config.authority, &config.client_id);
        Self {
            config,
            http,
            token_client,
            store,
            coordinator: RefreshCoordinator::new(),
            metadata: OnceCell::new(),
            login_state: StateManager::new(),
            end_session,
            session: Mutex::new(SessionState::NoSession),
        }
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Load metadata and any persisted session. Safe to call more than once.
    pub async fn initialize(&self) -> Result<(), UIError> {
        self.metadata().await?;
        if self.store.load_tokens().await.is_some() {
            self.set_state(SessionState::Authenticated);
        }
        Ok(())
    }

    /// The discovery document, downloaded on first use and cached for the lifetime
    /// of the authenticator.
    pub async fn metadata(&self) -> Result<&Metadata, UIError> {
        let url = self.config.discovery_url();
        self.metadata
            .get_or_try_init(|| fetch_metadata(&self.http, &url))
            .await
            .map_err(|e| {
                warn!("Metadata lookup failed: {}", e);
                ErrorFactory::from_metadata_lookup_error(&e, &url)
            })
    }

    /// The stored access token, refreshing first when only a refresh token is held.
    ///
    /// Returns `None` when a new login is needed. Never starts a login redirect.
    pub async fn get_access_token(&self) -> Result<Option<String>, UIError> {
        let Some(tokens) = self.store.load_tokens().await else {
            return Ok(None);
        };
        if let Some(access_token) = tokens.access_token() {
            return Ok(Some(access_token.to_string()));
        }
        if tokens.refresh_token().is_none() {
            return Ok(None);
        }

        self.coordinator
            .execute(|| async {
                let fresh = self
                    .store
                    .load_tokens()
                    .await
                    .is_some_and(|t| t.access_token().is_some());
                if fresh {
                    debug!("Access token was renewed by a concurrent caller");
                    return Ok(());
                }
                self.refresh().await
            })
            .await?;

        Ok(self.current_access_token().await)
    }

    /// Run a refresh token grant, sharing one grant between concurrent callers.
    ///
    /// An `invalid_grant` response means the session has ended: tokens are removed
    /// and the call succeeds, so the next token lookup reports that a login is needed.
    pub async fn synchronized_refresh_access_token(&self) -> Result<(), UIError> {
        self.coordinator.execute(|| self.refresh()).await
    }

    /// Open the authorization request in the browser.
    ///
    /// Returns `false` without doing anything when `redirect_active` is already set.
    pub async fn start_login(
        &self,
        launcher: &dyn RedirectLauncher,
        redirect_active: &AtomicBool,
    ) -> Result<bool, UIError> {
        if !claim(redirect_active) {
            debug!("Ignoring login request while another redirect is active");
            return Ok(false);
        }

        match self.authorization_request().await {
            Ok(request) => {
                self.set_state(SessionState::LoginInFlight);
                info!("Starting login redirect");
                launcher.launch(request);
                Ok(true)
            }
            Err(e) => {
                redirect_active.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Complete a login with what the browser returned.
    pub async fn finish_login(
        &self,
        response: RedirectResponse,
        redirect_active: &AtomicBool,
    ) -> Result<(), UIError> {
        let result = self.complete_login(response).await;
        redirect_active.store(false, Ordering::SeqCst);

        match &result {
            Ok(()) => {
                info!("Login completed");
                self.set_state(SessionState::Authenticated);
            }
            Err(e) => {
                if !e.is_control_signal() {
                    warn!("Login failed: {}", e);
                }
                self.restore_state().await;
            }
        }
        result
    }

    /// Remove local tokens, then open the end-session URL in the browser.
    ///
    /// Tokens are removed even when the provider cannot end its own session.
    pub async fn start_logout(
        &self,
        launcher: &dyn RedirectLauncher,
        redirect_active: &AtomicBool,
    ) -> Result<bool, UIError> {
        if !claim(redirect_active) {
            debug!("Ignoring logout request while another redirect is active");
            return Ok(false);
        }

        self.set_state(SessionState::LogoutInFlight);
        let id_token = self
            .store
            .load_tokens()
            .await
            .and_then(|t| t.id_token().map(String::from));
        self.remove_tokens().await;

        match self.end_session_url(id_token.as_deref()).await {
            Ok(url) => {
                info!("Starting logout redirect");
                launcher.launch(RedirectRequest {
                    kind: RedirectKind::Logout,
                    url,
                    return_uri: self.config.post_logout_redirect_uri.clone(),
                });
                Ok(true)
            }
            Err(e) => {
                redirect_active.store(false, Ordering::SeqCst);
                self.set_state(SessionState::NoSession);
                Err(e)
            }
        }
    }

    /// Release the logout redirect. Calling it again is harmless.
    pub fn finish_logout(&self, redirect_active: &AtomicBool) {
        redirect_active.store(false, Ordering::SeqCst);
        self.login_state.clear();
        self.set_state(SessionState::NoSession);
    }

    /// Forget the session locally without contacting the provider.
    pub async fn clear_login_state(&self) {
        self.remove_tokens().await;
        self.login_state.clear();
        self.set_state(SessionState::NoSession);
    }

    /// Test hook: make the next API call fail with 401.
    pub async fn expire_access_token(&self) -> Result<(), UIError> {
        self.store
            .expire_access_token()
            .await
            .map_err(|e| ErrorFactory::from_internal_error(&e))
    }

    /// Test hook: make the next refresh fail with `invalid_grant`.
    pub async fn expire_refresh_token(&self) -> Result<(), UIError> {
        self.store
            .expire_refresh_token()
            .await
            .map_err(|e| ErrorFactory::from_internal_error(&e))
    }

    pub fn session_state(&self) -> SessionState {
        *self.lock_session()
    }

    pub async fn is_logged_in(&self) -> bool {
        self.store.load_tokens().await.is_some()
    }

    /// The user info endpoint: the configured override, else the one from metadata.
    pub async fn user_info_endpoint(&self) -> Result<String, UIError> {
        if let Some(endpoint) = &self.config.user_info_endpoint {
            return Ok(endpoint.clone());
        }
        let metadata = self.metadata().await?;
        metadata.userinfo_endpoint.clone().ok_or_else(|| {
            let err = protocol_error(
                ProtocolCategory::General,
                "userinfo_not_supported",
                Some("The metadata has no userinfo_endpoint".to_string()),
                0,
            );
            ErrorFactory::from_metadata_lookup_error(&err, &self.config.discovery_url())
        })
    }

    async fn current_access_token(&self) -> Option<String> {
        self.store
            .load_tokens()
            .await
            .and_then(|t| t.access_token().map(String::from))
    }

    async fn refresh(&self) -> Result<(), UIError> {
        let current = self.store.load_tokens().await;
        let Some(refresh_token) = current.as_ref().and_then(|t| t.refresh_token()) else {
            debug!("No refresh token held, session has ended");
            self.clear_login_state().await;
            return Ok(());
        };
        let refresh_token = SecretString::new(refresh_token.to_string());
        let metadata = self.metadata().await?;

        self.set_state(SessionState::RefreshInFlight);
        match self.token_client.refresh(&metadata.token_endpoint, &refresh_token).await {
            Ok(response) => {
                self.save_tokens(TokenData::merge(current.as_ref(), response.into()))
                    .await;
                self.set_state(SessionState::Authenticated);
                Ok(())
            }
            Err(e) if is_invalid_grant(&e) => {
                info!("Refresh token was rejected, clearing the session");
                self.clear_login_state().await;
                Ok(())
            }
            Err(e) => {
                warn!("Token refresh failed: {}", e);
                self.set_state(SessionState::Authenticated);
                Err(ErrorFactory::from_token_error(&e, error_codes::TOKEN_RENEWAL_ERROR))
            }
        }
    }

    async fn authorization_request(&self) -> Result<RedirectRequest, UIError> {
        let metadata = self.metadata().await?;
        let mut url = Url::parse(&metadata.authorization_endpoint).map_err(|e| {
            let err = protocol_error(
                ProtocolCategory::Authorization,
                "invalid_authorization_endpoint",
                Some(e.to_string()),
                0,
            );
            ErrorFactory::from_login_operation_error(&err, error_codes::LOGIN_REQUEST_FAILED)
        })?;

        let pending = self.login_state.begin();
        let challenge = pending.verifier.challenge();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("scope", &self.config.scope)
            .append_pair("state", &pending.state)
            .append_pair("nonce", &pending.nonce)
            .append_pair("code_challenge", challenge.as_str())
            .append_pair("code_challenge_method", CHALLENGE_METHOD);

        Ok(RedirectRequest {
            kind: RedirectKind::Login,
            url: url.into(),
            return_uri: self.config.redirect_uri.clone(),
        })
    }

    async fn complete_login(&self, response: RedirectResponse) -> Result<(), UIError> {
        let callback = match response {
            RedirectResponse::Cancelled => {
                debug!("Login redirect was cancelled");
                self.login_state.clear();
                return Err(ErrorFactory::from_redirect_cancelled());
            }
            RedirectResponse::Callback(callback) => callback,
        };

        let params = CallbackParams::parse(&callback).ok_or_else(|| {
            self.login_state.clear();
            login_response_error(protocol_error(
                ProtocolCategory::Authorization,
                "invalid_callback",
                Some("The login response is not a valid URL".to_string()),
                0,
            ))
        })?;

        if let Some(error) = params.error {
            self.login_state.clear();
            return Err(login_response_error(protocol_error(
                ProtocolCategory::Authorization,
                &error,
                params.error_description,
                0,
            )));
        }

        let pending = self
            .login_state
            .take(params.state.as_deref())
            .map_err(login_response_error)?;
        let code = params.code.filter(|c| !c.is_empty()).ok_or_else(|| {
            login_response_error(protocol_error(
                ProtocolCategory::Authorization,
                "missing_code",
                Some("The login response has no authorization code".to_string()),
                0,
            ))
        })?;

        let metadata = self.metadata().await?;
        let response = self
            .token_client
            .exchange_code(&metadata.token_endpoint, &code, &pending.verifier)
            .await
            .map_err(|e| {
                ErrorFactory::from_token_error(&e, error_codes::AUTHORIZATION_CODE_GRANT_FAILED)
            })?;

        let previous = self.store.load_tokens().await;
        self.save_tokens(TokenData::merge(previous.as_ref(), response.into()))
            .await;
        Ok(())
    }

    async fn end_session_url(&self, id_token: Option<&str>) -> Result<String, UIError> {
        let metadata = self.metadata().await?;
        self.end_session
            .build_end_session_url(metadata, &self.config.post_logout_redirect_uri, id_token)
            .map_err(|e| match e.protocol() {
                Some(p) if p.code == LOGOUT_NOT_SUPPORTED => ErrorFactory::from_logout_not_supported(),
                _ => ErrorFactory::from_logout_request_error(&e),
            })
    }

    // A failed write leaves the tokens cached for this process only.
    async fn save_tokens(&self, data: TokenData) {
        if let Err(e) = self.store.save_tokens(data).await {
            warn!("Tokens could not be persisted and are held in memory only: {}", e);
        }
    }

    async fn remove_tokens(&self) {
        if let Err(e) = self.store.remove_tokens().await {
            warn!("Stored tokens could not be removed: {}", e);
        }
    }

    async fn restore_state(&self) {
        let state = if self.store.load_tokens().await.is_some() {
            SessionState::Authenticated
        } else {
            SessionState::NoSession
        };
        self.set_state(state);
    }

    fn set_state(&self, state: SessionState) {
        let mut session = self.lock_session();
        if *session != state {
            debug!("Session state {:?} -> {:?}", *session, state);
            *session = state;
        }
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn claim(redirect_active: &AtomicBool) -> bool {
    redirect_active
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
}

fn is_invalid_grant(err: &Error) -> bool {
    err.protocol().is_some_and(|p| p.code == "invalid_grant")
}

fn login_response_error(err: Error) -> UIError {
    ErrorFactory::from_login_operation_error(&err, error_codes::LOGIN_RESPONSE_FAILED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{EncryptionManager, InMemoryKeyStore};
    use crate::oauth::config::test_config;
    use crate::oauth::metadata::discovery_body;
    use crate::token::MemoryStorage;
    use mockito::{Matcher, Mock, Server, ServerGuard};
    use std::sync::Arc;

    fn authenticator(authority: &str) -> Authenticator {
        let store = TokenStore::new(
            Arc::new(MemoryStorage::new()),
            EncryptionManager::new(Arc::new(InMemoryKeyStore::new()), "tokens"),
        );
        Authenticator::new(test_config(authority), store, reqwest::Client::new())
    }

    async fn server_with_discovery() -> (ServerGuard, Mock) {
        let mut server = Server::new_async().await;
        let body = discovery_body(&server.url());
        let discovery = server
            .mock("GET", "/.well-known/openid-configuration")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;
        (server, discovery)
    }

    fn query_value(url: &str, key: &str) -> Option<String> {
        Url::parse(url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[tokio::test]
    async fn test_initialize_fetches_metadata_once() {
        let mut server = Server::new_async().await;
        let body = discovery_body(&server.url());
        let mock = server
            .mock("GET", "/.well-known/openid-configuration")
            .with_status(200)
            .with_body(body)
            .expect(1)
            .create_async()
            .await;

        let auth = authenticator(&server.url());
        auth.initialize().await.unwrap();
        auth.initialize().await.unwrap();

        assert_eq!(auth.session_state(), SessionState::NoSession);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_initialize_reports_metadata_lookup() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/.well-known/openid-configuration")
            .with_status(404)
            .create_async()
            .await;

        let err = authenticator(&server.url()).initialize().await.unwrap_err();
        assert_eq!(err.error_code(), error_codes::METADATA_LOOKUP);
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_start_login_builds_pkce_request() {
        let (server, _discovery) = server_with_discovery().await;
        let auth = authenticator(&server.url());
        let redirect_active = AtomicBool::new(false);
        let launched = Mutex::new(None);
        let launcher = |request: RedirectRequest| *launched.lock().unwrap() = Some(request);

        assert!(auth.start_login(&launcher, &redirect_active).await.unwrap());

        let request = launched.lock().unwrap().take().unwrap();
        assert_eq!(request.kind, RedirectKind::Login);
        assert!(request.url.starts_with(&format!("{}/authorize?", server.url())));
        assert_eq!(query_value(&request.url, "response_type").as_deref(), Some("code"));
        assert_eq!(query_value(&request.url, "code_challenge_method").as_deref(), Some("S256"));
        assert_eq!(
            query_value(&request.url, "scope").as_deref(),
            Some("openid profile email")
        );
        assert!(query_value(&request.url, "state").is_some());
        assert!(query_value(&request.url, "nonce").is_some());
        assert!(redirect_active.load(Ordering::SeqCst));
        assert_eq!(auth.session_state(), SessionState::LoginInFlight);
    }

    #[tokio::test]
    async fn test_start_login_is_suppressed_while_redirect_active() {
        let (server, _discovery) = server_with_discovery().await;
        let auth = authenticator(&server.url());
        let redirect_active = AtomicBool::new(true);
        let launched = AtomicBool::new(false);
        let launcher = |_: RedirectRequest| launched.store(true, Ordering::SeqCst);

        assert!(!auth.start_login(&launcher, &redirect_active).await.unwrap());
        assert!(!launched.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancelled_login_clears_redirect_flag() {
        let (server, _discovery) = server_with_discovery().await;
        let auth = authenticator(&server.url());
        let redirect_active = AtomicBool::new(false);
        let launcher = |_: RedirectRequest| {};
        auth.start_login(&launcher, &redirect_active).await.unwrap();

        let err = auth
            .finish_login(RedirectResponse::Cancelled, &redirect_active)
            .await
            .unwrap_err();

        assert!(err.is_redirect_cancelled());
        assert!(!redirect_active.load(Ordering::SeqCst));
        assert_eq!(auth.session_state(), SessionState::NoSession);
    }

    #[tokio::test]
    async fn test_state_mismatch_is_login_response_failed() {
        let (server, _discovery) = server_with_discovery().await;
        let auth = authenticator(&server.url());
        let redirect_active = AtomicBool::new(false);
        let launcher = |_: RedirectRequest| {};
        auth.start_login(&launcher, &redirect_active).await.unwrap();

        let err = auth
            .finish_login(
                RedirectResponse::Callback("com.mycompany.app:/callback?code=c&state=forged".into()),
                &redirect_active,
            )
            .await
            .unwrap_err();

        assert_eq!(err.error_code(), error_codes::LOGIN_RESPONSE_FAILED);
        assert_eq!(err.app_auth_code(), "authorization/state_mismatch");
        assert!(!redirect_active.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_error_callback_is_login_response_failed() {
        let (server, _discovery) = server_with_discovery().await;
        let auth = authenticator(&server.url());
        let redirect_active = AtomicBool::new(false);
        let launcher = |_: RedirectRequest| {};
        auth.start_login(&launcher, &redirect_active).await.unwrap();

        let err = auth
            .finish_login(
                RedirectResponse::Callback(
                    "com.mycompany.app:/callback?error=access_denied".into(),
                ),
                &redirect_active,
            )
            .await
            .unwrap_err();

        assert_eq!(err.error_code(), error_codes::LOGIN_RESPONSE_FAILED);
        assert_eq!(err.app_auth_code(), "authorization/access_denied");
    }

    #[tokio::test]
    async fn test_failed_code_exchange() {
        let (mut server, _discovery) = server_with_discovery().await;
        let _token = server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;
        let auth = authenticator(&server.url());
        let redirect_active = AtomicBool::new(false);
        let launched = Mutex::new(String::new());
        let launcher = |request: RedirectRequest| *launched.lock().unwrap() = request.url;
        auth.start_login(&launcher, &redirect_active).await.unwrap();
        let state = query_value(&launched.lock().unwrap(), "state").unwrap();

        let err = auth
            .finish_login(
                RedirectResponse::Callback(format!(
                    "com.mycompany.app:/callback?code=c&state={}",
                    state
                )),
                &redirect_active,
            )
            .await
            .unwrap_err();

        assert_eq!(err.error_code(), error_codes::AUTHORIZATION_CODE_GRANT_FAILED);
        assert_eq!(err.app_auth_code(), "token/invalid_grant");
        assert!(!auth.is_logged_in().await);
    }

    #[tokio::test]
    async fn test_refresh_failure_other_than_invalid_grant_keeps_tokens() {
        let (mut server, _discovery) = server_with_discovery().await;
        let _token = server
            .mock("POST", "/token")
            .match_body(Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()))
            .with_status(401)
            .with_body(r#"{"error":"invalid_client"}"#)
            .create_async()
            .await;
        let auth = authenticator(&server.url());
        auth.store
            .save_tokens(TokenData {
                access_token: None,
                refresh_token: Some("rt".to_string()),
                id_token: None,
            })
            .await
            .unwrap();

        let err = auth.get_access_token().await.unwrap_err();

        assert_eq!(err.error_code(), error_codes::TOKEN_RENEWAL_ERROR);
        assert_eq!(err.app_auth_code(), "token/invalid_client");
        assert!(auth.is_logged_in().await);
    }

    #[tokio::test]
    async fn test_logout_not_supported_still_removes_tokens() {
        let mut server = Server::new_async().await;
        let _discovery = server
            .mock("GET", "/.well-known/openid-configuration")
            .with_status(200)
            .with_body(r#"{"issuer":"i","authorization_endpoint":"https://i/authorize","token_endpoint":"https://i/token"}"#)
            .create_async()
            .await;
        let auth = authenticator(&server.url());
        auth.store
            .save_tokens(TokenData {
                access_token: Some("at".to_string()),
                refresh_token: Some("rt".to_string()),
                id_token: Some("it".to_string()),
            })
            .await
            .unwrap();
        let redirect_active = AtomicBool::new(false);
        let launcher = |_: RedirectRequest| {};

        let err = auth.start_logout(&launcher, &redirect_active).await.unwrap_err();

        assert_eq!(err.error_code(), error_codes::LOGOUT_NOT_SUPPORTED);
        assert!(!auth.is_logged_in().await);
        assert!(!redirect_active.load(Ordering::SeqCst));
        assert_eq!(auth.session_state(), SessionState::NoSession);
    }

    #[tokio::test]
    async fn test_user_info_endpoint_prefers_configuration() {
        let (server, _discovery) = server_with_discovery().await;
        let auth = authenticator(&server.url());
        assert_eq!(
            auth.user_info_endpoint().await.unwrap(),
            format!("{}/userinfo", server.url())
        );

        let mut config = test_config(&server.url());
        config.user_info_endpoint = Some("https://api.example.com/me".to_string());
        let store = TokenStore::new(
            Arc::new(MemoryStorage::new()),
            EncryptionManager::new(Arc::new(InMemoryKeyStore::new()), "tokens"),
        );
        let auth = Authenticator::new(config, store, reqwest::Client::new());
        assert_eq!(auth.user_info_endpoint().await.unwrap(), "https://api.example.com/me");
    }
}
