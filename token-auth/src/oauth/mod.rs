//! OpenID Connect authorization code flow with PKCE for a public client.

mod authenticator;
pub mod config;
mod logout;
mod metadata;
mod pkce;
mod redirect;
mod state;
mod token_client;

pub use authenticator::{Authenticator, SessionState};
pub use config::{ConfigError, OAuthConfig, DEFAULT_SCOPE};
pub use logout::{end_session_builder, CognitoEndSession, EndSessionUrlBuilder, StandardEndSession};
pub use metadata::{fetch_metadata, Metadata};
pub use pkce::{PkceChallenge, PkceVerifier};
pub use redirect::{RedirectKind, RedirectLauncher, RedirectRequest, RedirectResponse};
pub use state::{PendingLogin, StateManager};
pub use token_client::{TokenClient, TokenResponse};
