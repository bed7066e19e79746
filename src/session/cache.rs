use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::session::models::{Tenant, UserProfile};

/// In-memory view of one role's session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub profile: Option<UserProfile>,
    pub available_tenants: Vec<Tenant>,
    pub current_tenant: Option<Tenant>,
    pub current_tenant_id: Option<String>,
}

/// Session cache. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct SessionCache {
    state: Arc<RwLock<SessionState>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> SessionState {
        self.state.read().await.clone()
    }

    pub async fn access_token(&self) -> Option<String> {
        self.state.read().await.access_token.clone()
    }

    pub async fn refresh_token(&self) -> Option<String> {
        self.state.read().await.refresh_token.clone()
    }

    pub async fn profile(&self) -> Option<UserProfile> {
        self.state.read().await.profile.clone()
    }

    /// Replace the credentials; a `None` refresh credential keeps the current one.
    pub async fn set_tokens(&self, access: String, refresh: Option<String>) {
        let mut state = self.state.write().await;
        if state.access_token.as_deref() != Some(access.as_str()) {
            debug!(refresh_rotated = refresh.is_some(), "session credential rotated");
        }
        state.access_token = Some(access);
        if let Some(refresh) = refresh {
            state.refresh_token = Some(refresh);
        }
    }

    /// Overwrite both credentials exactly as given.
    pub async fn set_credentials(&self, access: Option<String>, refresh: Option<String>) {
        let mut state = self.state.write().await;
        state.access_token = access;
        state.refresh_token = refresh;
    }

    pub async fn set_profile(&self, profile: Option<UserProfile>) {
        self.state.write().await.profile = profile;
    }

    pub async fn set_tenants(
        &self,
        available: Vec<Tenant>,
        current: Option<Tenant>,
        current_id: Option<String>,
    ) {
        let mut state = self.state.write().await;
        state.available_tenants = available;
        state.current_tenant = current;
        state.current_tenant_id = current_id;
    }

    pub async fn replace(&self, next: SessionState) {
        *self.state.write().await = next;
    }

    pub async fn clear(&self) {
        *self.state.write().await = SessionState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_tokens_keeps_refresh_when_absent() {
        let cache = SessionCache::new();
        cache.set_tokens("T1".into(), Some("R1".into())).await;
        cache.set_tokens("T2".into(), None).await;

        assert_eq!(cache.access_token().await.as_deref(), Some("T2"));
        assert_eq!(cache.refresh_token().await.as_deref(), Some("R1"));
    }

    #[tokio::test]
    async fn test_set_credentials_overwrites_both() {
        let cache = SessionCache::new();
        cache.set_tokens("T1".into(), Some("R1".into())).await;
        cache.set_credentials(Some("T2".into()), None).await;

        assert_eq!(cache.access_token().await.as_deref(), Some("T2"));
        assert_eq!(cache.refresh_token().await, None);
    }

    #[tokio::test]
    async fn test_clear_resets_everything() {
        let cache = SessionCache::new();
        let shared = cache.clone();
        cache.set_tokens("T1".into(), Some("R1".into())).await;
        cache
            .set_profile(Some(UserProfile {
                username: Some("s1".into()),
                ..Default::default()
            }))
            .await;

        shared.clear().await;

        assert_eq!(cache.snapshot().await, SessionState::default());
    }
}
