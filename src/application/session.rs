use crate::domain::ports::CredentialStoreBox;
use crate::domain::session::{AuthToken, CachedUser, StoredCredentials};
use crate::error::{PlatformError, Result};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
struct SessionState {
    token: Option<AuthToken>,
    user: Option<CachedUser>,
}

/// The signed-in session: bearer token plus cached user.
///
/// Lifecycle is explicit. [`SessionContext::load`] reads the credential store
/// once at boot, [`SessionContext::bearer`] invalidates the session when the
/// token has expired, and [`SessionContext::logout`] clears it.
pub struct SessionContext {
    store: CredentialStoreBox,
    state: RwLock<SessionState>,
}

impl SessionContext {
    /// Loads persisted credentials. An unreadable or expired token is dropped.
    pub async fn load(store: CredentialStoreBox) -> Result<Self> {
        let stored = store.load().await?;
        let context = Self {
            store,
            state: RwLock::new(SessionState::default()),
        };

        if let Some(raw) = stored.jwt.as_deref() {
            match AuthToken::parse(raw) {
                Ok(token) if !token.is_expired_at(Utc::now()) => {
                    let mut state = context.state.write().await;
                    state.token = Some(token);
                    state.user = stored.user;
                }
                Ok(_) => {
                    info!("stored session has expired");
                    context.store.clear().await?;
                }
                Err(e) => {
                    warn!(error = %e, "discarding unreadable stored token");
                    context.store.clear().await?;
                }
            }
        }
        Ok(context)
    }

    pub async fn login(&self, raw_token: &str, user: Option<CachedUser>) -> Result<()> {
        let token = AuthToken::parse(raw_token)?;
        if token.is_expired_at(Utc::now()) {
            return Err(PlatformError::Unauthenticated(
                "token has already expired".to_string(),
            ));
        }
        self.store
            .save(&StoredCredentials {
                jwt: Some(token.as_str().to_string()),
                user: user.clone(),
            })
            .await?;
        let mut state = self.state.write().await;
        state.token = Some(token);
        state.user = user;
        info!("session started");
        Ok(())
    }

    pub async fn logout(&self) -> Result<()> {
        *self.state.write().await = SessionState::default();
        self.store.clear().await?;
        info!("session cleared");
        Ok(())
    }

    /// The bearer token, if present and unexpired.
    pub async fn bearer(&self) -> Result<String> {
        self.bearer_at(Utc::now()).await
    }

    pub async fn bearer_at(&self, now: DateTime<Utc>) -> Result<String> {
        let token = self.state.read().await.token.clone();
        match token {
            None => Err(PlatformError::Unauthenticated("please log in".to_string())),
            Some(token) if token.is_expired_at(now) => {
                warn!("session expired, logging out");
                self.logout().await?;
                Err(PlatformError::Unauthenticated(
                    "session expired, please log in again".to_string(),
                ))
            }
            Some(token) => Ok(token.as_str().to_string()),
        }
    }

    pub async fn user(&self) -> Option<CachedUser> {
        self.state.read().await.user.clone()
    }

    /// User id from the cached user, falling back to the token's claim.
    pub async fn user_id(&self) -> Result<u64> {
        let state = self.state.read().await;
        state
            .user
            .as_ref()
            .map(|u| u.id)
            .or_else(|| state.token.as_ref().and_then(AuthToken::subject))
            .ok_or_else(|| PlatformError::Unauthenticated("no user in session".to_string()))
    }

    pub async fn email(&self) -> Option<String> {
        self.state
            .read()
            .await
            .user
            .as_ref()
            .map(|u| u.email.clone())
            .filter(|e| !e.is_empty())
    }

    pub async fn is_authenticated(&self) -> bool {
        self.state
            .read()
            .await
            .token
            .as_ref()
            .is_some_and(|t| !t.is_expired_at(Utc::now()))
    }
}
