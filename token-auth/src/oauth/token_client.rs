//! Form posts to the token endpoint.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::pkce::PkceVerifier;
use crate::error::{protocol_error, Error, ProtocolCategory};
use crate::token::TokenData;

/// A successful token endpoint response.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl From<TokenResponse> for TokenData {
    fn from(response: TokenResponse) -> Self {
        TokenData {
            access_token: Some(response.access_token),
            refresh_token: response.refresh_token,
            id_token: response.id_token,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TokenErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Serialize)]
struct AuthorizationCodeGrant<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    code: &'a str,
    redirect_uri: &'a str,
    code_verifier: &'a str,
}

#[derive(Serialize)]
struct RefreshTokenGrant<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    refresh_token: &'a str,
}

/// Token endpoint client for a public client (no client secret).
///
/// Uses a plain client without retry middleware: grants are not idempotent, and a
/// replayed refresh could consume a rotated refresh token.
pub struct TokenClient {
    client: reqwest::Client,
    client_id: String,
    redirect_uri: String,
}

impl TokenClient {
    pub fn new(client: reqwest::Client, client_id: &str, redirect_uri: &str) -> Self {
        Self {
            client,
            client_id: client_id.to_string(),
            redirect_uri: redirect_uri.to_string(),
        }
    }

    /// Redeem an authorization code with the PKCE verifier that produced its challenge.
    pub async fn exchange_code(
        &self,
        token_endpoint: &str,
        code: &str,
        verifier: &PkceVerifier,
    ) -> Result<TokenResponse, Error> {
        let grant = AuthorizationCodeGrant {
            grant_type: "authorization_code",
            client_id: &self.client_id,
            code,
            redirect_uri: &self.redirect_uri,
            code_verifier: verifier.secret(),
        };

        debug!("Exchanging authorization code for tokens");
        let tokens = self.post(token_endpoint, &grant).await?;
        info!("Authorization code grant succeeded");
        Ok(tokens)
    }

    /// Redeem a refresh token.
    pub async fn refresh(
        &self,
        token_endpoint: &str,
        refresh_token: &SecretString,
    ) -> Result<TokenResponse, Error> {
        let grant = RefreshTokenGrant {
            grant_type: "refresh_token",
            client_id: &self.client_id,
            refresh_token: refresh_token.expose_secret(),
        };

        debug!("Refreshing access token");
        let tokens = self.post(token_endpoint, &grant).await?;
        info!("Refresh token grant succeeded");
        Ok(tokens)
    }

    async fn post<T: Serialize>(&self, endpoint: &str, form: &T) -> Result<TokenResponse, Error> {
        let response = self
            .client
            .post(endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<TokenResponse>().await?);
        }

        let body = response.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<TokenErrorResponse>(&body).unwrap_or_default();
        let code = parsed.error.unwrap_or_else(|| "server_error".to_string());
        warn!("Token endpoint returned {} ({})", status, code);

        let description = parsed
            .error_description
            .or_else(|| Some(body.trim().to_string()).filter(|b| !b.is_empty()));
        Err(protocol_error(
            ProtocolCategory::Token,
            &code,
            description,
            status.as_u16(),
        ))
    }
}
