//! In-memory cache of successful GET responses.

use std::collections::HashMap;
use std::sync::Mutex;

use super::ApiResponse;

/// Responses keyed by a logical name such as `companies` or `transactions-2`.
#[derive(Default)]
pub struct ResponseCache {
    entries: Mutex<HashMap<String, ApiResponse>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<ApiResponse> {
        self.lock().get(key).cloned()
    }

    pub fn put(&self, key: &str, response: ApiResponse) {
        self.lock().insert(key.to_string(), response);
    }

    pub fn remove(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Drop everything, e.g. after logout.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ApiResponse>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
