//! HTTP client construction.

mod client;
mod retry;

pub use client::{AuthenticatedClient, AuthenticatedClientBuilder, HttpClientConfig};
pub use retry::RetryAfterPolicy;
