//! The persisted credential set.

use serde::{Deserialize, Serialize};

/// Access, refresh and id tokens as persisted by the [`TokenStore`](super::TokenStore).
///
/// Serialized as `{"accessToken":…,"refreshToken":…,"idToken":…}`. All fields empty
/// means logged out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

impl TokenData {
    /// True when no token of any kind is held.
    pub fn is_empty(&self) -> bool {
        non_blank(&self.access_token).is_none()
            && non_blank(&self.refresh_token).is_none()
            && non_blank(&self.id_token).is_none()
    }

    /// The access token, if present and not blank.
    pub fn access_token(&self) -> Option<&str> {
        non_blank(&self.access_token)
    }

    /// The refresh token, if present and not blank.
    pub fn refresh_token(&self) -> Option<&str> {
        non_blank(&self.refresh_token)
    }

    /// The id token, if present and not blank.
    pub fn id_token(&self) -> Option<&str> {
        non_blank(&self.id_token)
    }

    /// Combine a freshly issued token set with the previously stored one.
    ///
    /// The access token always comes from `latest`. Authorization servers are not
    /// required to re-issue refresh or id tokens on every grant, so when `latest`
    /// omits one of them the previous value is carried forward.
    pub fn merge(previous: Option<&TokenData>, latest: TokenData) -> TokenData {
        let previous = previous.cloned().unwrap_or_default();
        TokenData {
            access_token: latest.access_token,
            refresh_token: latest.refresh_token.or(previous.refresh_token),
            id_token: latest.id_token.or(previous.id_token),
        }
    }
}
