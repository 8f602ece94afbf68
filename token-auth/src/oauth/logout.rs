//! End-session URL construction per provider family.

use url::Url;

use super::Metadata;
use crate::error::{protocol_error, Error, ProtocolCategory};

/// Builds the URL that ends the provider's browser session.
pub trait EndSessionUrlBuilder: Send + Sync {
    fn build_end_session_url(
        &self,
        metadata: &Metadata,
        post_logout_redirect_uri: &str,
        id_token_hint: Option<&str>,
    ) -> Result<String, Error>;
}

/// OpenID Connect RP-initiated logout against `end_session_endpoint`.
pub struct StandardEndSession {
    client_id: String,
}

/// AWS Cognito, which publishes no end-session endpoint and expects
/// `/logout?client_id=…&logout_uri=…` on the hosted UI domain instead.
pub struct CognitoEndSession {
    client_id: String,
}

impl StandardEndSession {
    pub fn new(client_id: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
        }
    }
}

impl CognitoEndSession {
    pub fn new(client_id: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
        }
    }
}

impl EndSessionUrlBuilder for StandardEndSession {
    fn build_end_session_url(
        &self,
        metadata: &Metadata,
        post_logout_redirect_uri: &str,
        id_token_hint: Option<&str>,
    ) -> Result<String, Error> {
        let endpoint = metadata
            .end_session_endpoint
            .as_deref()
            .filter(|e| !e.is_empty())
            .ok_or_else(logout_not_supported)?;

        let mut url = parse(endpoint)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.client_id);
            query.append_pair("post_logout_redirect_uri", post_logout_redirect_uri);
            if let Some(hint) = id_token_hint {
                query.append_pair("id_token_hint", hint);
            }
        }
        Ok(url.into())
    }
}

impl EndSessionUrlBuilder for CognitoEndSession {
    fn build_end_session_url(
        &self,
        metadata: &Metadata,
        post_logout_redirect_uri: &str,
        _id_token_hint: Option<&str>,
    ) -> Result<String, Error> {
        let authorize = parse(&metadata.authorization_endpoint)?;
        let mut url = parse(&format!("{}/logout", authorize.origin().ascii_serialization()))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("logout_uri", post_logout_redirect_uri);
        Ok(url.into())
    }
}

/// Pick the builder for `authority`.
pub fn end_session_builder(authority: &str, client_id: &str) -> Box<dyn EndSessionUrlBuilder> {
    let authority = authority.to_ascii_lowercase();
    if authority.contains("amazoncognito.com") || authority.contains("cognito-idp") {
        Box::new(CognitoEndSession::new(client_id))
    } else {
        Box::new(StandardEndSession::new(client_id))
    }
}

/// Error code a builder returns when the provider cannot end browser sessions.
pub const LOGOUT_NOT_SUPPORTED: &str = "logout_not_supported";

fn logout_not_supported() -> Error {
    protocol_error(
        ProtocolCategory::General,
        LOGOUT_NOT_SUPPORTED,
        Some("The metadata has no end_session_endpoint".to_string()),
        0,
    )
}

fn parse(value: &str) -> Result<Url, Error> {
    Url::parse(value).map_err(|e| {
        protocol_error(
            ProtocolCategory::General,
            "invalid_endpoint",
            Some(format!("{}: {}", value, e)),
            0,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(end_session: Option<&str>) -> Metadata {
        Metadata {
            issuer: "https://cognito-idp.eu-west-2.amazonaws.com/pool".to_string(),
            authorization_endpoint: "https://login.auth.eu-west-2.amazoncognito.com/oauth2/authorize"
                .to_string(),
            token_endpoint: "https://login.auth.eu-west-2.amazoncognito.com/oauth2/token".to_string(),
            end_session_endpoint: end_session.map(String::from),
            userinfo_endpoint: None,
        }
    }

    #[test]
    fn test_standard_url_includes_hint_and_redirect() {
        let builder = StandardEndSession::new("client");
        let url = builder
            .build_end_session_url(
                &metadata(Some("https://login.example.com/logout")),
                "app:/logoutcallback",
                Some("id-token"),
            )
            .unwrap();
        assert_eq!(
            url,
            "https://login.example.com/logout?client_id=client&post_logout_redirect_uri=app%3A%2Flogoutcallback&id_token_hint=id-token"
        );
    }

    #[test]
    fn test_standard_without_endpoint_is_not_supported() {
        let builder = StandardEndSession::new("client");
        let err = builder
            .build_end_session_url(&metadata(None), "app:/logoutcallback", None)
            .unwrap_err();
        assert_eq!(err.protocol().unwrap().code, LOGOUT_NOT_SUPPORTED);
    }

    #[test]
    fn test_cognito_url_uses_hosted_ui_origin() {
        let builder = CognitoEndSession::new("client");
        let url = builder
            .build_end_session_url(&metadata(None), "app:/logoutcallback", Some("ignored"))
            .unwrap();
        assert_eq!(
            url,
            "https://login.auth.eu-west-2.amazoncognito.com/logout?client_id=client&logout_uri=app%3A%2Flogoutcallback"
        );
    }

    #[test]
    fn test_builder_selection() {
        let cognito = end_session_builder("https://cognito-idp.eu-west-2.amazonaws.com/pool", "c");
        let url = cognito
            .build_end_session_url(&metadata(None), "app:/x", None)
            .unwrap();
        assert!(url.contains("logout_uri="));

        let standard = end_session_builder("https://login.example.com", "c");
        assert!(standard
            .build_end_session_url(&metadata(None), "app:/x", None)
            .is_err());
    }
}
