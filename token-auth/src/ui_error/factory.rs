//! Constructors that translate every failure class into a [`UIError`].

use std::error::Error as StdError;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{error_codes, UIError};
use crate::error::{Error, ErrorKind};

const MAX_BODY_DETAILS: usize = 512;

/// Error body shapes returned by the API (`code`, `message`, and for 5xx errors
/// `area`, `id`, `utcTime`) and by OAuth endpoints (`error`, `error_description`).
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
    area: Option<String>,
    id: Option<serde_json::Value>,
    #[serde(rename = "utcTime")]
    utc_time: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Builds [`UIError`]s. None of these constructors fail.
pub struct ErrorFactory;

impl ErrorFactory {
    /// Catch-all translation. A [`UIError`] is returned unchanged, so re-entering
    /// this function never wraps an error twice.
    pub fn from_exception<E>(err: E) -> UIError
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        let boxed: Box<dyn StdError + Send + Sync> = err.into();
        let boxed = match boxed.downcast::<UIError>() {
            Ok(ui_error) => return *ui_error,
            Err(other) => other,
        };
        match boxed.downcast::<Error>() {
            Ok(internal) => Self::from_internal_error(&internal),
            Err(other) => UIError::new(
                "Mobile UI",
                error_codes::GENERAL_UI_ERROR,
                "A technical problem was encountered in the app",
            )
            .with_details(other.to_string()),
        }
    }

    /// Translate an internal error by its kind.
    pub fn from_internal_error(err: &Error) -> UIError {
        match &err.error_kind {
            ErrorKind::Storage(_) => UIError::new(
                "Token Storage",
                error_codes::GENERAL_UI_ERROR,
                "A problem was encountered accessing stored credentials",
            )
            .with_details(err.to_string()),
            ErrorKind::Protocol(_) => Self::from_token_error(err, error_codes::GENERAL_UI_ERROR),
            ErrorKind::Http(_) => {
                Self::from_http_request_error(err, "", "Mobile UI")
            }
        }
    }

    /// Sentinel raised when no usable token exists. Callers treat it as a signal to
    /// start a fresh interactive login, never as a fault.
    pub fn from_login_required() -> UIError {
        UIError::new(
            "Login",
            error_codes::LOGIN_REQUIRED,
            "A login is required so the API call was aborted",
        )
    }

    /// The user closed the browser window without completing the redirect.
    pub fn from_redirect_cancelled() -> UIError {
        UIError::new(
            "Login",
            error_codes::REDIRECT_CANCELLED,
            "The redirect request was cancelled",
        )
    }

    /// The discovery document could not be downloaded or parsed.
    pub fn from_metadata_lookup_error(err: &Error, url: &str) -> UIError {
        let status = err.protocol().map(|p| p.status).unwrap_or_default();
        UIError::new(
            "Metadata",
            error_codes::METADATA_LOOKUP,
            "Problem encountered downloading OpenID Connect metadata",
        )
        .with_status(status)
        .with_details(err.to_string())
        .with_url(url)
    }

    /// A failure while building or processing a login redirect.
    pub fn from_login_operation_error(err: &Error, error_code: &str) -> UIError {
        Self::from_protocol("Login", error_code, "A technical problem occurred during login processing", err)
    }

    /// A failure while building the end-session redirect.
    pub fn from_logout_request_error(err: &Error) -> UIError {
        Self::from_protocol(
            "Logout",
            error_codes::LOGOUT_REQUEST_FAILED,
            "A technical problem occurred during logout processing",
            err,
        )
    }

    /// A failure from a token endpoint grant.
    pub fn from_token_error(err: &Error, error_code: &str) -> UIError {
        Self::from_protocol("Token", error_code, "A technical problem occurred during token processing", err)
    }

    /// A network failure before any HTTP response was received.
    pub fn from_http_request_error(err: &dyn StdError, url: &str, source: &str) -> UIError {
        UIError::new(
            source,
            error_codes::API_NETWORK_ERROR,
            "A network problem occurred when the app called the server",
        )
        .with_details(describe_chain(err))
        .with_url(url)
    }

    /// An HTTP response with a non-success status.
    pub fn from_http_response_error(status: u16, body: &str, url: &str, source: &str) -> UIError {
        let mut error = UIError::new(
            source,
            error_codes::API_RESPONSE_ERROR,
            "A technical problem occurred when the app called the server",
        )
        .with_status(status)
        .with_url(url);

        let parsed = serde_json::from_str::<ErrorBody>(body).ok();
        let Some(parsed) = parsed else {
            let trimmed = body.trim();
            if !trimmed.is_empty() {
                error = error.with_details(trimmed.chars().take(MAX_BODY_DETAILS).collect::<String>());
            }
            return error;
        };

        if let Some(code) = parsed.code.filter(|c| !c.is_empty()) {
            if error_codes::CLIENT_SIGNALS.contains(&code.as_str()) {
                let details = match parsed.message {
                    Some(message) => format!("{}: {}", code, message),
                    None => code,
                };
                error = error.with_details(details);
            } else {
                error = error.with_error_code(code);
                if let Some(message) = parsed.message {
                    error = error.with_details(message);
                }
            }
        } else if let Some(oauth_error) = parsed.error.filter(|e| !e.is_empty()) {
            error = error.with_app_auth_code(oauth_error.clone());
            let details = match parsed.error_description {
                Some(description) => format!("{}: {}", oauth_error, description),
                None => oauth_error,
            };
            error = error.with_details(details);
        }

        if status >= 500 {
            if let (Some(area), Some(instance_id)) =
                (parsed.area, parsed.id.as_ref().and_then(parse_instance_id))
            {
                let utc_time = parsed.utc_time.as_deref().and_then(parse_utc_time);
                error.set_api_error_details(&area, instance_id, utc_time);
            }
        }

        error
    }

    /// The provider publishes no end-session endpoint.
    pub fn from_logout_not_supported() -> UIError {
        UIError::new(
            "Logout",
            error_codes::LOGOUT_NOT_SUPPORTED,
            "Logout is not supported by the authorization server",
        )
    }

    /// A company id that is not a positive integer, rejected before any request is sent.
    pub fn from_invalid_company_id(company_id: &str) -> UIError {
        UIError::new(
            "Mobile UI",
            error_codes::INVALID_COMPANY_ID,
            "The company id must be a positive integer",
        )
        .with_status(400)
        .with_details(format!("Received company id '{}'", company_id))
    }

    fn from_protocol(area: &str, error_code: &str, user_message: &str, err: &Error) -> UIError {
        let error = UIError::new(area, error_code, user_message);
        match err.protocol() {
            Some(protocol) => {
                let details = match &protocol.description {
                    Some(description) => format!("{}: {}", protocol.code, description),
                    None => protocol.code.clone(),
                };
                error
                    .with_status(protocol.status)
                    .with_app_auth_code(format!("{}/{}", protocol.category.as_str(), protocol.code))
                    .with_details(details)
            }
            None => error.with_details(describe_chain(err)),
        }
    }
}

fn describe_chain(err: &dyn StdError) -> String {
    let mut description = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        let text = inner.to_string();
        if !description.contains(&text) {
            description.push_str(": ");
            description.push_str(&text);
        }
        source = inner.source();
    }
    description
}

fn parse_instance_id(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn parse_utc_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{protocol_error, storage_error, ProtocolCategory, StorageErrorKind};

    #[test]
    fn test_from_exception_is_idempotent() {
        let first = ErrorFactory::from_exception("boom");
        let second = ErrorFactory::from_exception(first.clone());
        assert_eq!(first, second);
        assert_eq!(first.error_code(), error_codes::GENERAL_UI_ERROR);
        assert_eq!(first.details(), Some("boom"));
    }

    #[test]
    fn test_from_exception_returns_typed_errors_unchanged() {
        let original = ErrorFactory::from_login_required();
        assert_eq!(ErrorFactory::from_exception(original.clone()), original);
    }

    #[test]
    fn test_from_exception_translates_internal_errors() {
        let err = storage_error(StorageErrorKind::KeyUnavailable, "keystore corrupted");
        let ui_error = ErrorFactory::from_exception(err);
        assert_eq!(ui_error.area(), "Token Storage");
        assert!(ui_error.details().unwrap().contains("keystore corrupted"));
    }

    #[test]
    fn test_from_token_error_extracts_protocol_sub_code() {
        let err = protocol_error(
            ProtocolCategory::Token,
            "invalid_client",
            Some("Client authentication failed".to_string()),
            401,
        );
        let ui_error = ErrorFactory::from_token_error(&err, error_codes::TOKEN_RENEWAL_ERROR);
        assert_eq!(ui_error.error_code(), error_codes::TOKEN_RENEWAL_ERROR);
        assert_eq!(ui_error.app_auth_code(), "token/invalid_client");
        assert_eq!(ui_error.status_code(), 401);
        assert_eq!(
            ui_error.details(),
            Some("invalid_client: Client authentication failed")
        );
        assert_ne!(ui_error.user_message(), ui_error.details().unwrap());
    }

    #[test]
    fn test_from_login_operation_error_uses_login_area() {
        let err = protocol_error(ProtocolCategory::Authorization, "access_denied", None, 0);
        let ui_error = ErrorFactory::from_login_operation_error(&err, error_codes::LOGIN_RESPONSE_FAILED);
        assert_eq!(ui_error.area(), "Login");
        assert_eq!(ui_error.app_auth_code(), "authorization/access_denied");
    }

    #[test]
    fn test_api_error_body_code_passes_through() {
        let body = r#"{"code":"company_not_found","message":"Company 3 was not found"}"#;
        let ui_error = ErrorFactory::from_http_response_error(404, body, "https://api/companies/3", "Web API");
        assert_eq!(ui_error.error_code(), error_codes::COMPANY_NOT_FOUND);
        assert_eq!(ui_error.details(), Some("Company 3 was not found"));
        assert_eq!(ui_error.status_code(), 404);
        assert!(ui_error.is_expected_api_error());
    }

    #[test]
    fn test_api_body_cannot_raise_client_signals() {
        let body = r#"{"code":"login_required","message":"Session gone"}"#;
        let ui_error = ErrorFactory::from_http_response_error(403, body, "https://api/companies", "Web API");
        assert_eq!(ui_error.error_code(), error_codes::API_RESPONSE_ERROR);
        assert!(!ui_error.is_control_signal());
        assert_eq!(ui_error.details(), Some("login_required: Session gone"));

        let body = r#"{"code":"redirect_cancelled"}"#;
        let ui_error = ErrorFactory::from_http_response_error(400, body, "https://api/companies", "Web API");
        assert!(!ui_error.is_redirect_cancelled());
        assert_eq!(ui_error.details(), Some("redirect_cancelled"));
    }

    #[test]
    fn test_server_error_merges_correlation_details() {
        let body = r#"{"code":"database_error","message":"Connection lost","area":"SampleApi","id":73921,"utcTime":"2024-05-01T10:00:00Z"}"#;
        let ui_error = ErrorFactory::from_http_response_error(500, body, "https://api/companies", "Web API");
        assert_eq!(ui_error.error_code(), "database_error");
        assert_eq!(ui_error.area(), "SampleApi");
        assert_eq!(ui_error.instance_id(), 73921);
        assert_eq!(ui_error.utc_time().to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn test_client_error_ignores_correlation_details() {
        let body = r#"{"code":"invalid_company_id","message":"bad","area":"SampleApi","id":5}"#;
        let ui_error = ErrorFactory::from_http_response_error(400, body, "", "Web API");
        assert_eq!(ui_error.area(), "Web API");
        assert_eq!(ui_error.instance_id(), 0);
    }

    #[test]
    fn test_oauth_error_body_is_parsed() {
        let body = r#"{"error":"invalid_token","error_description":"Token expired"}"#;
        let ui_error = ErrorFactory::from_http_response_error(401, body, "", "User Info");
        assert_eq!(ui_error.error_code(), error_codes::API_RESPONSE_ERROR);
        assert_eq!(ui_error.app_auth_code(), "invalid_token");
        assert_eq!(ui_error.details(), Some("invalid_token: Token expired"));
    }

    #[test]
    fn test_non_json_body_becomes_details() {
        let ui_error = ErrorFactory::from_http_response_error(502, "Bad Gateway", "", "Web API");
        assert_eq!(ui_error.error_code(), error_codes::API_RESPONSE_ERROR);
        assert_eq!(ui_error.details(), Some("Bad Gateway"));
    }

    #[test]
    fn test_from_http_request_error() {
        let err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused");
        let ui_error = ErrorFactory::from_http_request_error(&err, "https://api/companies", "Web API");
        assert_eq!(ui_error.error_code(), error_codes::API_NETWORK_ERROR);
        assert_eq!(ui_error.url(), "https://api/companies");
        assert_eq!(ui_error.details(), Some("connection refused"));
    }

    #[test]
    fn test_every_constructor_sets_area_code_and_message() {
        let errors = vec![
            ErrorFactory::from_login_required(),
            ErrorFactory::from_redirect_cancelled(),
            ErrorFactory::from_logout_not_supported(),
            ErrorFactory::from_invalid_company_id("abc"),
            ErrorFactory::from_exception("x"),
        ];
        for error in errors {
            assert!(!error.area().is_empty());
            assert!(!error.error_code().is_empty());
            assert!(!error.user_message().is_empty());
        }
    }
}
