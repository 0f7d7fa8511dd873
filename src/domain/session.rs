use crate::error::{PlatformError, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The signed-in user as cached next to the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedUser {
    pub id: u64,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Deserialize)]
struct Claims {
    #[serde(default)]
    exp: Option<i64>,
    #[serde(default)]
    id: Option<u64>,
}

/// Bearer JWT plus the claims the client cares about.
///
/// The signature is never checked here; the backend does that. Only the
/// payload is decoded to learn when the token stops being usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    raw: String,
    expires_at: Option<DateTime<Utc>>,
    subject: Option<u64>,
}

impl AuthToken {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let payload = raw
            .split('.')
            .nth(1)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| PlatformError::Unauthenticated("token is not a JWT".to_string()))?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| PlatformError::Unauthenticated(format!("token payload: {e}")))?;
        let claims: Claims = serde_json::from_slice(&bytes)
            .map_err(|e| PlatformError::Unauthenticated(format!("token claims: {e}")))?;

        let expires_at = match claims.exp {
            Some(exp) => Some(DateTime::from_timestamp(exp, 0).ok_or_else(|| {
                PlatformError::Unauthenticated("token expiry out of range".to_string())
            })?),
            None => None,
        };

        Ok(Self {
            raw: raw.to_string(),
            expires_at,
            subject: claims.id,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// User id embedded in the token, when the backend puts one there.
    pub fn subject(&self) -> Option<u64> {
        self.subject
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

/// What the credential store persists under its fixed key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    #[serde(default)]
    pub jwt: Option<String>,
    #[serde(default)]
    pub user: Option<CachedUser>,
}

#[cfg(test)]
pub(crate) fn forge_token(claims: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}
