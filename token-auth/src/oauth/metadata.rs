//! OpenID Connect discovery.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{protocol_error, Error, ProtocolCategory};

/// The subset of the discovery document this client uses.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Metadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
}

/// Download and parse the discovery document at `url`.
pub async fn fetch_metadata(client: &reqwest::Client, url: &str) -> Result<Metadata, Error> {
    debug!("Downloading OpenID Connect metadata from {}", url);

    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!("Metadata request returned {}", status);
        return Err(protocol_error(
            ProtocolCategory::General,
            "metadata_unavailable",
            Some(body).filter(|b| !b.is_empty()),
            status.as_u16(),
        ));
    }

    let metadata: Metadata = response.json().await?;
    Ok(metadata)
}

#[cfg(test)]
pub(crate) fn discovery_body(base: &str) -> String {
    serde_json::json!({
        "issuer": base,
        "authorization_endpoint": format!("{}/authorize", base),
        "token_endpoint": format!("{}/token", base),
        "end_session_endpoint": format!("{}/logout", base),
        "userinfo_endpoint": format!("{}/userinfo", base),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, HttpErrorKind};

    #[tokio::test]
    async fn test_fetch_metadata() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/.well-known/openid-configuration")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(discovery_body(&server.url()))
            .create_async()
            .await;

        let url = format!("{}/.well-known/openid-configuration", server.url());
        let metadata = fetch_metadata(&reqwest::Client::new(), &url).await.unwrap();

        assert_eq!(metadata.token_endpoint, format!("{}/token", server.url()));
        assert!(metadata.end_session_endpoint.is_some());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_optional_endpoints_may_be_absent() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/.well-known/openid-configuration")
            .with_status(200)
            .with_body(r#"{"issuer":"i","authorization_endpoint":"a","token_endpoint":"t"}"#)
            .create_async()
            .await;

        let url = format!("{}/.well-known/openid-configuration", server.url());
        let metadata = fetch_metadata(&reqwest::Client::new(), &url).await.unwrap();
        assert_eq!(metadata.end_session_endpoint, None);
        assert_eq!(metadata.userinfo_endpoint, None);
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/.well-known/openid-configuration")
            .with_status(503)
            .create_async()
            .await;

        let url = format!("{}/.well-known/openid-configuration", server.url());
        let err = fetch_metadata(&reqwest::Client::new(), &url).await.unwrap_err();
        assert_eq!(err.protocol().unwrap().status, 503);
    }

    #[tokio::test]
    async fn test_invalid_document_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/.well-known/openid-configuration")
            .with_status(200)
            .with_body("<html>")
            .create_async()
            .await;

        let url = format!("{}/.well-known/openid-configuration", server.url());
        let err = fetch_metadata(&reqwest::Client::new(), &url).await.unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::Http(HttpErrorKind::InvalidResponse));
    }
}
