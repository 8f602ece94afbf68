//! Bearer-authenticated calls to the backend API.

mod cache;
mod client;

pub use cache::ResponseCache;
pub use client::{ApiClient, ApiResponse, CallOptions, API_CLIENT_NAME};
