//! # token-auth
//!
//! Client-side OAuth session core:
//! - OpenID Connect login and logout through a caller-supplied browser launcher
//! - Encrypted token persistence with a platform key store
//! - Single-flight refresh shared by concurrent callers
//! - Bearer API calls that renew the access token on 401
//! - One presentable error type, [`UIError`], for every failure
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use token_auth::{
//!     api::ApiClient,
//!     crypto::{EncryptionManager, KeyringKeyStore},
//!     http::AuthenticatedClientBuilder,
//!     oauth::{Authenticator, OAuthConfig},
//!     token::{FileStorage, TokenStore},
//! };
//!
//! let encryption = EncryptionManager::new(Arc::new(KeyringKeyStore::new("my-app")), "tokens");
//! let store = TokenStore::new(Arc::new(FileStorage::new("tokens.enc")), encryption);
//! let builder = AuthenticatedClientBuilder::new();
//! let authenticator = Arc::new(Authenticator::new(config, store, builder.build_plain()?));
//! let api = ApiClient::new("https://api.example.com", builder.build()?, authenticator.clone());
//! ```

pub mod api;
pub mod crypto;
pub mod error;
pub mod http;
pub mod oauth;
pub mod token;
pub mod ui_error;

pub use error::{Error, ErrorKind};
pub use ui_error::{error_codes, ErrorFactory, UIError};
