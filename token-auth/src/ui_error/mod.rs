//! The canonical presentable error and its stable error-code taxonomy.
//!
//! Every failure leaving the [`Authenticator`](crate::oauth::Authenticator) or the
//! [`ApiClient`](crate::api::ApiClient) is a [`UIError`] built by the [`ErrorFactory`].

mod factory;

use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use factory::ErrorFactory;

/// Stable error codes. Codes returned by the API in error bodies pass through
/// unchanged unless they collide with a client signal, so this list is not
/// exhaustive.
pub mod error_codes {
    pub const GENERAL_UI_ERROR: &str = "general_ui_error";
    pub const LOGIN_REQUIRED: &str = "login_required";
    pub const METADATA_LOOKUP: &str = "metadata_lookup";
    pub const REDIRECT_CANCELLED: &str = "redirect_cancelled";
    pub const LOGIN_REQUEST_FAILED: &str = "login_request_failed";
    pub const LOGIN_RESPONSE_FAILED: &str = "login_response_failed";
    pub const AUTHORIZATION_CODE_GRANT_FAILED: &str = "authorization_code_grant_failed";
    pub const TOKEN_RENEWAL_ERROR: &str = "token_renewal_error";
    pub const LOGOUT_REQUEST_FAILED: &str = "logout_request_failed";
    pub const LOGOUT_NOT_SUPPORTED: &str = "logout_not_supported";
    pub const API_NETWORK_ERROR: &str = "api_network_error";
    pub const API_RESPONSE_ERROR: &str = "api_response_error";
    pub const COMPANY_NOT_FOUND: &str = "company_not_found";
    pub const INVALID_COMPANY_ID: &str = "invalid_company_id";

    /// Codes raised only by this client. An API body cannot claim them.
    pub(crate) const CLIENT_SIGNALS: [&str; 2] = [LOGIN_REQUIRED, REDIRECT_CANCELLED];
}

/// A structured error suitable both for decisions in the API layer and for display.
///
/// Fields are read-only to callers. The only mutation is the one-time enrichment
/// with server correlation data that the factory applies to 5xx responses.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UIError {
    area: String,
    error_code: String,
    user_message: String,
    utc_time: DateTime<Utc>,
    status_code: u16,
    app_auth_code: String,
    instance_id: i64,
    details: Option<String>,
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stack_trace: Option<String>,
}

impl UIError {
    pub(crate) fn new(area: &str, error_code: &str, user_message: &str) -> Self {
        Self {
            area: area.to_string(),
            error_code: error_code.to_string(),
            user_message: user_message.to_string(),
            utc_time: Utc::now(),
            status_code: 0,
            app_auth_code: String::new(),
            instance_id: 0,
            details: None,
            url: String::new(),
            stack_trace: capture_stack_trace(),
        }
    }

    pub(crate) fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    pub(crate) fn with_app_auth_code(mut self, app_auth_code: impl Into<String>) -> Self {
        self.app_auth_code = app_auth_code.into();
        self
    }

    pub(crate) fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub(crate) fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub(crate) fn with_error_code(mut self, error_code: impl Into<String>) -> Self {
        self.error_code = error_code.into();
        self
    }

    /// Merge the correlation fields a 5xx API response reports about itself.
    pub(crate) fn set_api_error_details(
        &mut self,
        area: &str,
        instance_id: i64,
        utc_time: Option<DateTime<Utc>>,
    ) {
        self.area = area.to_string();
        self.instance_id = instance_id;
        if let Some(utc_time) = utc_time {
            self.utc_time = utc_time;
        }
    }

    pub fn area(&self) -> &str {
        &self.area
    }

    pub fn error_code(&self) -> &str {
        &self.error_code
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn utc_time(&self) -> DateTime<Utc> {
        self.utc_time
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn app_auth_code(&self) -> &str {
        &self.app_auth_code
    }

    pub fn instance_id(&self) -> i64 {
        self.instance_id
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn stack_trace(&self) -> Option<&str> {
        self.stack_trace.as_deref()
    }

    /// The caller should start a fresh interactive login rather than show an error.
    pub fn is_login_required(&self) -> bool {
        self.error_code == error_codes::LOGIN_REQUIRED
    }

    /// The user closed the login or logout window.
    pub fn is_redirect_cancelled(&self) -> bool {
        self.error_code == error_codes::REDIRECT_CANCELLED
    }

    /// Control signals drive navigation and are never displayed as faults.
    pub fn is_control_signal(&self) -> bool {
        self.is_login_required() || self.is_redirect_cancelled()
    }

    /// The API rejected a resource id in a way the user can cause by editing a URL.
    pub fn is_expected_api_error(&self) -> bool {
        self.status_code < 500
            && (self.error_code == error_codes::COMPANY_NOT_FOUND
                || self.error_code == error_codes::INVALID_COMPANY_ID)
    }

    /// Label/value pairs for an expandable technical-detail view. Empty and zero
    /// fields are omitted.
    pub fn diagnostic_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("User Message", self.user_message.clone()),
            ("Area", self.area.clone()),
            ("Error Code", self.error_code.clone()),
            ("UTC Time", self.utc_time.to_rfc3339()),
        ];
        if self.status_code > 0 {
            fields.push(("Status Code", self.status_code.to_string()));
        }
        if !self.app_auth_code.is_empty() {
            fields.push(("AppAuth Code", self.app_auth_code.clone()));
        }
        if self.instance_id > 0 {
            fields.push(("Instance Id", self.instance_id.to_string()));
        }
        if let Some(details) = &self.details {
            fields.push(("Details", details.clone()));
        }
        if !self.url.is_empty() {
            fields.push(("URL", self.url.clone()));
        }
        if let Some(stack_trace) = &self.stack_trace {
            fields.push(("Stack", stack_trace.clone()));
        }
        fields
    }
}

fn capture_stack_trace() -> Option<String> {
    if !cfg!(debug_assertions) {
        return None;
    }
    let backtrace = Backtrace::capture();
    match backtrace.status() {
        BacktraceStatus::Captured => Some(backtrace.to_string()),
        _ => None,
    }
}

impl fmt::Display for UIError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({}): {}", self.area, self.error_code, self.user_message)?;
        if let Some(details) = &self.details {
            write!(f, " [{}]", details)?;
        }
        Ok(())
    }
}

impl StdError for UIError {}
