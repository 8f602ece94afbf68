use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use token_auth::oauth::{ConfigError, OAuthConfig, DEFAULT_SCOPE};

/// Default file holding the encrypted token blob.
pub const DEFAULT_TOKEN_FILE: &str = "tokens.enc";

/// Default keyring service name the encryption key is stored under.
pub const DEFAULT_KEYRING_SERVICE: &str = "oauth-session-rs";

#[derive(Clone, Debug, PartialEq)]
pub enum RustEnv {
    Development,
    Production,
    Staging,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RustEnvParseError;

impl FromStr for RustEnv {
    type Err = RustEnvParseError;
    fn from_str(level: &str) -> Result<RustEnv, Self::Err> {
        match level.to_lowercase().as_str() {
            "development" => Ok(RustEnv::Development),
            "production" => Ok(RustEnv::Production),
            "staging" => Ok(RustEnv::Staging),
            _ => Err(RustEnvParseError),
        }
    }
}

impl fmt::Display for RustEnv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RustEnv::Development => write!(f, "development"),
            RustEnv::Production => write!(f, "production"),
            RustEnv::Staging => write!(f, "staging"),
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Base URL of the OpenID Connect provider. Metadata is read from
    /// `<authority>/.well-known/openid-configuration`.
    #[arg(long, env)]
    authority: Option<String>,

    /// The public client id registered with the provider
    #[arg(long, env)]
    client_id: Option<String>,

    /// Space separated scopes to request at login
    #[arg(long, env, default_value = DEFAULT_SCOPE)]
    pub scope: String,

    /// Where the provider returns after login
    #[arg(long, env, default_value = "com.mycompany.basicmobileapp:/callback")]
    pub redirect_uri: String,

    /// Where the provider returns after logout
    #[arg(
        long,
        env,
        default_value = "com.mycompany.basicmobileapp:/logoutcallback"
    )]
    pub post_logout_redirect_uri: String,

    /// Override for the metadata's userinfo endpoint
    #[arg(long, env)]
    pub user_info_endpoint: Option<String>,

    /// Base URL of the backend API
    #[arg(long, env, default_value = "https://api.authsamples.com/investments")]
    pub api_base_url: String,

    /// File the encrypted tokens are written to
    #[arg(long, env, default_value = DEFAULT_TOKEN_FILE)]
    pub token_file: PathBuf,

    /// Alias of the token encryption key in the key store
    #[arg(long, env, default_value = "token-encryption-key")]
    pub key_alias: String,

    /// Keyring service name the encryption key is stored under
    #[arg(long, env, default_value = DEFAULT_KEYRING_SERVICE)]
    pub keyring_service: String,

    /// Keep the encryption key in process memory instead of the OS keyring.
    /// Stored tokens cannot be read after a restart.
    #[arg(long, env, default_value_t = false)]
    pub use_memory_key_store: bool,

    /// Timeout in seconds for every HTTP request
    #[arg(long, env, default_value_t = 10)]
    pub http_timeout_secs: u64,

    /// Retries of transient API failures
    #[arg(long, env, default_value_t = 2)]
    pub api_max_retries: u32,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap_or(LevelFilter::Info)),
        )]
    pub log_level_filter: LevelFilter,

    /// Set the Rust runtime environment to use.
    #[arg(
    short,
    long,
    env,
    default_value_t = RustEnv::Development,
    value_parser = clap::builder::PossibleValuesParser::new([
        "DEVELOPMENT", "PRODUCTION", "STAGING",
        "development", "production", "staging"
    ])
        .map(|s| s.parse::<RustEnv>().unwrap_or(RustEnv::Development)),
    )]
    pub runtime_env: RustEnv,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    pub fn set_authority(mut self, authority: String) -> Self {
        self.authority = Some(authority);
        self
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn set_client_id(mut self, client_id: String) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// The OAuth settings, validated.
    pub fn oauth_config(&self) -> Result<OAuthConfig, ConfigError> {
        let oauth = OAuthConfig {
            authority: self
                .authority
                .clone()
                .ok_or(ConfigError::Missing("authority"))?,
            client_id: self
                .client_id
                .clone()
                .ok_or(ConfigError::Missing("client_id"))?,
            scope: self.scope.clone(),
            redirect_uri: self.redirect_uri.clone(),
            post_logout_redirect_uri: self.post_logout_redirect_uri.clone(),
            user_info_endpoint: self
                .user_info_endpoint
                .clone()
                .filter(|e| !e.trim().is_empty()),
        };
        oauth.validate()?;
        Ok(oauth)
    }

    pub fn runtime_env(&self) -> RustEnv {
        self.runtime_env.clone()
    }

    pub fn is_production(&self) -> bool {
        self.runtime_env() == RustEnv::Production
    }
}
