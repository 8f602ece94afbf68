//! Immutable OAuth client settings.

use std::fmt;

use url::Url;

pub const DEFAULT_SCOPE: &str = "openid profile email";

/// Settings for the public OAuth client. Built once and validated before the
/// [`Authenticator`](super::Authenticator) is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthConfig {
    /// Issuer base URL. Discovery is read from `<authority>/.well-known/openid-configuration`.
    pub authority: String,
    pub client_id: String,
    pub scope: String,
    pub redirect_uri: String,
    pub post_logout_redirect_uri: String,
    /// Overrides the discovery document's `userinfo_endpoint` when set.
    pub user_info_endpoint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Missing(&'static str),
    InvalidUrl { field: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::Missing(field) => write!(f, "Missing OAuth setting: {}", field),
            ConfigError::InvalidUrl { field, value } => {
                write!(f, "OAuth setting {} is not a valid URL: {}", field, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl OAuthConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require("authority", &self.authority)?;
        require("client_id", &self.client_id)?;
        require("scope", &self.scope)?;
        require("redirect_uri", &self.redirect_uri)?;
        require("post_logout_redirect_uri", &self.post_logout_redirect_uri)?;

        parse_url("authority", &self.authority)?;
        parse_url("redirect_uri", &self.redirect_uri)?;
        parse_url("post_logout_redirect_uri", &self.post_logout_redirect_uri)?;
        if let Some(endpoint) = &self.user_info_endpoint {
            parse_url("user_info_endpoint", endpoint)?;
        }
        Ok(())
    }

    pub fn discovery_url(&self) -> String {
        format!(
            "{}/.well-known/openid-configuration",
            self.authority.trim_end_matches('/')
        )
    }
}

fn require(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Missing(field));
    }
    Ok(())
}

// Custom schemes such as `com.mycompany.app:/callback` are valid redirect URIs.
fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|_| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
pub(crate) fn test_config(authority: &str) -> OAuthConfig {
    OAuthConfig {
        authority: authority.to_string(),
        client_id: "mobile-client".to_string(),
        scope: DEFAULT_SCOPE.to_string(),
        redirect_uri: "com.mycompany.app:/callback".to_string(),
        post_logout_redirect_uri: "com.mycompany.app:/logoutcallback".to_string(),
        user_info_endpoint: None,
    }
}
