use config::Config;
use log::info;
use std::fmt;
use std::sync::Arc;
use token_auth::api::ApiClient;
use token_auth::crypto::{EncryptionManager, InMemoryKeyStore, KeyStore, KeyringKeyStore};
use token_auth::http::AuthenticatedClientBuilder;
use token_auth::oauth::{Authenticator, ConfigError};
use token_auth::token::{FileStorage, TokenStore};

pub mod config;
pub mod logging;

/// Failures assembling the session components from configuration.
#[derive(Debug)]
pub enum InitError {
    Config(ConfigError),
    HttpClient(token_auth::Error),
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InitError::Config(err) => write!(f, "Invalid configuration: {}", err),
            InitError::HttpClient(err) => write!(f, "Unable to build HTTP client: {}", err),
        }
    }
}

impl std::error::Error for InitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InitError::Config(err) => Some(err),
            InitError::HttpClient(err) => Some(err),
        }
    }
}

impl From<ConfigError> for InitError {
    fn from(err: ConfigError) -> Self {
        InitError::Config(err)
    }
}

impl From<token_auth::Error> for InitError {
    fn from(err: token_auth::Error) -> Self {
        InitError::HttpClient(err)
    }
}

fn http_builder(config: &Config) -> AuthenticatedClientBuilder {
    AuthenticatedClientBuilder::new()
        .with_timeout(config.http_timeout())
        .with_max_retries(config.api_max_retries)
        .with_user_agent(format!("oauth-session-rs/{}", env!("CARGO_PKG_VERSION")))
}

/// Build the authenticator over the encrypted token file.
pub fn init_authenticator(config: &Config) -> Result<Authenticator, InitError> {
    let oauth_config = config.oauth_config()?;

    let key_store: Arc<dyn KeyStore> = if config.use_memory_key_store {
        info!("Using an in-memory key store, tokens will not survive a restart");
        Arc::new(InMemoryKeyStore::new())
    } else {
        Arc::new(KeyringKeyStore::new(config.keyring_service.clone()))
    };
    let encryption = EncryptionManager::new(key_store, config.key_alias.clone());
    let store = TokenStore::new(Arc::new(FileStorage::new(&config.token_file)), encryption);

    info!(
        "Session config: authority={}, client_id={}, token_file={}, http_timeout={}s",
        oauth_config.authority,
        oauth_config.client_id,
        config.token_file.display(),
        config.http_timeout_secs,
    );

    let http = http_builder(config).build_plain()?;
    Ok(Authenticator::new(oauth_config, store, http))
}

// Service-level state shared by every command handler
#[derive(Clone)]
pub struct AppState {
    pub authenticator: Arc<Authenticator>,
    pub api_client: Arc<ApiClient>,
    pub config: Config,
}

impl AppState {
    pub fn new(app_config: Config) -> Result<Self, InitError> {
        let authenticator = Arc::new(init_authenticator(&app_config)?);
        let api_client = ApiClient::new(
            &app_config.api_base_url,
            http_builder(&app_config).build()?,
            Arc::clone(&authenticator),
        );
        Ok(Self {
            authenticator,
            api_client: Arc::new(api_client),
            config: app_config,
        })
    }

    pub fn authenticator_ref(&self) -> &Authenticator {
        self.authenticator.as_ref()
    }

    pub fn api_client_ref(&self) -> &ApiClient {
        self.api_client.as_ref()
    }
}
