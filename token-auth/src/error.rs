//! Internal error types for the `token-auth` crate.
//!
//! Follows the same pattern as the rest of the workspace: a root `Error` struct holding
//! an error kind and an optional source. These errors never cross the public
//! `Authenticator` / `ApiClient` boundary; they are translated into a
//! [`UIError`](crate::ui_error::UIError) by the [`ErrorFactory`](crate::ui_error::ErrorFactory).

use std::error::Error as StdError;
use std::fmt;

/// Top-level internal error type for token-auth.
/// Holds error kind and optional source for error chaining.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of internal errors.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    Storage(StorageErrorKind),
    Protocol(ProtocolError),
    Http(HttpErrorKind),
}

/// Errors from key management, encryption and token persistence.
#[derive(Debug, PartialEq)]
pub enum StorageErrorKind {
    KeyUnavailable,
    EncryptionFailed,
    DecryptionFailed,
    Serialization,
    Io,
}

/// Which part of the authorization-code flow produced a protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolCategory {
    Authorization,
    Token,
    General,
}

impl ProtocolCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolCategory::Authorization => "authorization",
            ProtocolCategory::Token => "token",
            ProtocolCategory::General => "general",
        }
    }
}

/// An OAuth protocol failure reported by the authorization server or detected
/// while processing its responses.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolError {
    pub category: ProtocolCategory,
    /// OAuth error code such as `invalid_grant`, or a local code such as `network_error`.
    pub code: String,
    pub description: Option<String>,
    /// HTTP status of the response that carried the error, or 0.
    pub status: u16,
}

/// Errors from HTTP client operations.
#[derive(Debug, PartialEq)]
pub enum HttpErrorKind {
    BuilderFailed,
    RequestFailed,
    Network,
    InvalidResponse,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Storage(kind) => write!(f, "Storage error: {:?}", kind)?,
            ErrorKind::Protocol(err) => write!(
                f,
                "OAuth {} error: {}",
                err.category.as_str(),
                err.code
            )?,
            ErrorKind::Http(kind) => write!(f, "HTTP error: {:?}", kind)?,
        }
        if let Some(source) = &self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl Error {
    /// Returns the protocol error when this is an OAuth protocol failure.
    pub fn protocol(&self) -> Option<&ProtocolError> {
        match &self.error_kind {
            ErrorKind::Protocol(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let error_kind = if err.is_builder() {
            ErrorKind::Http(HttpErrorKind::BuilderFailed)
        } else if err.is_decode() {
            ErrorKind::Http(HttpErrorKind::InvalidResponse)
        } else if err.is_request() {
            ErrorKind::Http(HttpErrorKind::RequestFailed)
        } else {
            ErrorKind::Http(HttpErrorKind::Network)
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

impl From<reqwest_middleware::Error> for Error {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(err) => err.into(),
            other => Error {
                source: Some(Box::new(other)),
                error_kind: ErrorKind::Http(HttpErrorKind::Network),
            },
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Storage(StorageErrorKind::Serialization),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Storage(StorageErrorKind::Io),
        }
    }
}

/// Helper function to create storage errors.
pub fn storage_error(kind: StorageErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Storage(kind),
    }
}

/// Helper function to create OAuth protocol errors.
pub fn protocol_error(
    category: ProtocolCategory,
    code: &str,
    description: Option<String>,
    status: u16,
) -> Error {
    Error {
        source: None,
        error_kind: ErrorKind::Protocol(ProtocolError {
            category,
            code: code.to_string(),
            description,
            status,
        }),
    }
}

/// Helper function to create HTTP errors.
pub fn http_error(kind: HttpErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Http(kind),
    }
}
