//! The boundary between the authenticator and whatever shows the browser.

use url::Url;

/// Which flow a redirect belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    Login,
    Logout,
}

/// A URL to open in the system browser, and the URI it will return to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectRequest {
    pub kind: RedirectKind,
    pub url: String,
    pub return_uri: String,
}

/// What the UI hands back once the browser returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectResponse {
    /// The user closed the window.
    Cancelled,
    /// The full callback URL including its query string.
    Callback(String),
}

/// Opens redirect requests. Implemented for plain closures.
pub trait RedirectLauncher: Send + Sync {
    fn launch(&self, request: RedirectRequest);
}

impl<F> RedirectLauncher for F
where
    F: Fn(RedirectRequest) + Send + Sync,
{
    fn launch(&self, request: RedirectRequest) {
        self(request)
    }
}

/// Parameters of an authorization callback.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Parse query parameters from a callback URL. Fragment parameters are also
    /// accepted since some providers return them there.
    pub fn parse(callback: &str) -> Option<Self> {
        let url = Url::parse(callback).ok()?;
        let mut params = CallbackParams::default();
        let fragment_pairs = url
            .fragment()
            .map(|f| url::form_urlencoded::parse(f.as_bytes()).into_owned().collect::<Vec<_>>())
            .unwrap_or_default();

        for (key, value) in url.query_pairs().into_owned().chain(fragment_pairs) {
            match key.as_str() {
                "code" => params.code = Some(value),
                "state" => params.state = Some(value),
                "error" => params.error = Some(value),
                "error_description" => params.error_description = Some(value),
                _ => {}
            }
        }
        Some(params)
    }
}
