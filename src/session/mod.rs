pub mod api;
pub mod cache;
pub mod models;
pub mod redirect;

use reqwest::Client;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{ApiError, ApiResult};
use crate::security::audit_log::AuditLogger;
use crate::security::role::{Namespace, Role};
use crate::security::token_refresh::{RefreshCoordinator, RefreshTicket};
use crate::storage::{self, KeyValueStore};
use crate::transport::{self, Dispatcher};

use api::AuthApi;
use cache::{SessionCache, SessionState};
use models::{LoginCredentials, LoginResponse, Tenant, TenantSwitch, TokenPair, UserProfile};
use redirect::LoginRedirect;

/// Session of one role, held in memory and mirrored to durable storage.
pub struct SessionStore {
    role: Role,
    http: Client,
    api_base: String,
    api: AuthApi,
    store: Arc<dyn KeyValueStore>,
    cache: SessionCache,
    refresh: RefreshCoordinator,
    audit: AuditLogger,
}

impl SessionStore {
    pub fn new(config: &ClientConfig, role: Role, store: Arc<dyn KeyValueStore>) -> ApiResult<Self> {
        let http = transport::build_client(config)?;
        Ok(Self::with_client(http, config.api_base(), role, store))
    }

    pub fn with_client(
        http: Client,
        api_base: impl Into<String>,
        role: Role,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let api_base = api_base.into();
        Self {
            role,
            api: AuthApi::new(http.clone(), api_base.clone(), role),
            http,
            api_base,
            store,
            cache: SessionCache::new(),
            refresh: RefreshCoordinator::new(),
            audit: AuditLogger::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    /// Refresh state shared by this store and every dispatcher it hands out.
    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.refresh
    }

    /// Dispatcher for this role sharing the same durable storage and refresh state.
    pub fn dispatcher(&self, redirect: Arc<dyn LoginRedirect>) -> Dispatcher {
        Dispatcher::with_client(
            self.http.clone(),
            self.api_base.clone(),
            self.role,
            self.store.clone(),
            redirect,
        )
        .with_coordinator(self.refresh.clone())
    }

    fn ns(&self) -> Namespace {
        self.role.namespace()
    }

    /// Load persisted state. Unparseable entries are dropped from storage.
    pub async fn restore(&self) -> ApiResult<()> {
        let ns = self.ns();
        if ns == Namespace::Student {
            storage::migrate_legacy(self.store.as_ref(), ns)?;
        }

        let state = SessionState {
            access_token: self.store.get(&ns.access_key()).filter(|t| !t.is_empty()),
            refresh_token: storage::refresh_token(self.store.as_ref(), ns),
            profile: self.load_json(&ns.profile_key())?,
            available_tenants: self.load_json(&ns.tenants_key())?.unwrap_or_default(),
            current_tenant: self.load_json(&ns.current_tenant_key())?,
            current_tenant_id: self
                .store
                .get(&ns.current_tenant_id_key())
                .filter(|t| !t.is_empty()),
        };
        debug!(
            role = %self.role,
            has_access = state.access_token.is_some(),
            has_profile = state.profile.is_some(),
            "restored session"
        );
        self.cache.replace(state).await;
        Ok(())
    }

    fn load_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> ApiResult<Option<T>> {
        let Some(raw) = self.store.get(key) else {
            return Ok(None);
        };
        match serde_json::from_str::<Option<T>>(&raw) {
            Ok(v) => Ok(v),
            Err(err) => {
                warn!(key, error = %err, "dropping unreadable session entry");
                self.store.remove(key)?;
                Ok(None)
            }
        }
    }

    fn save_json<T: serde::Serialize>(&self, key: &str, value: &T) -> ApiResult<()> {
        let raw = serde_json::to_string(value)
            .map_err(|e| ApiError::InvalidResponse(format!("encoding {key}: {e}")))?;
        self.store.set(key, &raw)?;
        Ok(())
    }

    /// Exchange user credentials for a new session and persist it.
    pub async fn login(&self, credentials: &LoginCredentials) -> ApiResult<LoginResponse> {
        let response = match self.api.login(credentials).await {
            Ok(r) => r,
            Err(err) => {
                self.audit.login_failure(self.role, &err.to_string());
                return Err(err);
            }
        };

        let ns = self.ns();
        let current_id = response
            .current_tenant
            .as_ref()
            .map(|t| t.tenant_id.clone())
            .or_else(|| response.user.as_ref().and_then(UserProfile::current_tenant_id));

        // a new login must not inherit the previous session's refresh credential
        storage::clear_namespace(self.store.as_ref(), ns)?;
        storage::store_tokens(
            self.store.as_ref(),
            ns,
            &response.access_token,
            response.refresh_token.as_deref(),
        )?;
        self.save_json(&ns.profile_key(), &response.user)?;
        if ns == Namespace::Student {
            self.save_json(&ns.tenants_key(), &response.available_tenants)?;
            self.save_json(&ns.current_tenant_key(), &response.current_tenant)?;
            self.store
                .set(&ns.current_tenant_id_key(), current_id.as_deref().unwrap_or(""))?;
        }

        self.cache
            .replace(SessionState {
                profile: response.user.clone(),
                available_tenants: response.available_tenants.clone(),
                current_tenant: response.current_tenant.clone(),
                current_tenant_id: current_id,
                ..SessionState::default()
            })
            .await;
        self.cache
            .set_credentials(
                Some(response.access_token.clone()),
                response.refresh_token.clone(),
            )
            .await;

        self.audit.login_success(
            self.role,
            response.user.as_ref().and_then(|u| u.username.as_deref()),
        );
        Ok(response)
    }

    /// Best-effort backend logout, then unconditional local teardown.
    pub async fn logout(&self) {
        self.sync_tokens().await;
        let mut notified = false;
        if let Some(token) = self.cache.access_token().await {
            match self.api.logout(&token).await {
                Ok(()) => notified = true,
                Err(err) => warn!(role = %self.role, error = %err, "logout call failed, clearing local session anyway"),
            }
        }

        self.cache.clear().await;
        if let Err(err) = storage::clear_namespace(self.store.as_ref(), self.ns()) {
            warn!(role = %self.role, error = %err, "failed to clear stored session");
        }
        self.audit.logout(self.role, notified);
    }

    /// Use the stored refresh credential to obtain a new access credential.
    /// Any failure logs the session out.
    pub async fn refresh(&self) -> ApiResult<TokenPair> {
        match self.try_refresh().await {
            Ok(pair) => Ok(pair),
            Err(err) => {
                self.audit.refresh_failed(self.role, &err.to_string());
                self.logout().await;
                Err(err)
            }
        }
    }

    async fn try_refresh(&self) -> ApiResult<TokenPair> {
        self.sync_tokens().await;
        let refresh_token = self
            .cache
            .refresh_token()
            .await
            .ok_or(ApiError::MissingRefreshCredential)?;

        let lease = match self.refresh.begin() {
            RefreshTicket::Leader(lease) => lease,
            RefreshTicket::Waiter(waiter) => {
                debug!(role = %self.role, "joining refresh already in flight");
                let access_token = waiter
                    .wait()
                    .await
                    .map_err(|failure| ApiError::RefreshFailed(failure.0))?;
                self.sync_tokens().await;
                return Ok(TokenPair {
                    access_token,
                    refresh_token: self.cache.refresh_token().await,
                    token_type: None,
                });
            }
        };

        let pair = match self.api.refresh(&refresh_token).await {
            Ok(pair) => pair,
            Err(err) => {
                lease.fail(err.to_string());
                return Err(err);
            }
        };
        if let Err(err) = storage::store_tokens(
            self.store.as_ref(),
            self.ns(),
            &pair.access_token,
            pair.refresh_token.as_deref(),
        ) {
            lease.fail(format!("persisting refreshed credential: {err}"));
            return Err(err.into());
        }
        self.cache
            .set_tokens(pair.access_token.clone(), pair.refresh_token.clone())
            .await;
        self.audit.token_rotated(self.role, pair.refresh_token.is_some());
        lease.publish(&pair.access_token);
        Ok(pair)
    }

    /// Fetch the current user. A 401 gets exactly one refresh and one retry;
    /// if that fails too the session is logged out.
    pub async fn fetch_profile(&self) -> ApiResult<UserProfile> {
        self.sync_tokens().await;
        let token = self.cache.access_token().await.ok_or(ApiError::NotLoggedIn)?;

        let profile = match self.api.current_user(&token).await {
            Ok(profile) => profile,
            Err(err) if err.is_unauthorized() => {
                debug!(role = %self.role, "profile fetch unauthorized, refreshing once");
                match self.refresh_and_refetch().await {
                    Ok(profile) => profile,
                    Err(err) => {
                        self.logout().await;
                        return Err(err);
                    }
                }
            }
            Err(err) => return Err(err),
        };

        self.save_json(&self.ns().profile_key(), &profile)?;
        self.cache.set_profile(Some(profile.clone())).await;
        Ok(profile)
    }

    /// The caller logs out on failure, so this must not.
    async fn refresh_and_refetch(&self) -> ApiResult<UserProfile> {
        let pair = match self.try_refresh().await {
            Ok(pair) => pair,
            Err(err) => {
                self.audit.refresh_failed(self.role, &err.to_string());
                return Err(err);
            }
        };
        self.api.current_user(&pair.access_token).await
    }

    /// Move the student session to another tenant; credentials are replaced.
    pub async fn switch_tenant(&self, tenant_id: &str) -> ApiResult<TenantSwitch> {
        if self.ns() != Namespace::Student {
            return Err(ApiError::NotPermitted {
                role: self.role,
                operation: "tenant switching",
            });
        }
        self.sync_tokens().await;
        let token = self.cache.access_token().await.ok_or(ApiError::NotLoggedIn)?;
        let switched = self.api.switch_tenant(&token, tenant_id).await?;

        let ns = self.ns();
        storage::store_tokens(
            self.store.as_ref(),
            ns,
            &switched.access_token,
            switched.refresh_token.as_deref(),
        )?;
        self.cache
            .set_tokens(switched.access_token.clone(), switched.refresh_token.clone())
            .await;

        let mut state = self.cache.snapshot().await;
        if let Some(profile) = state.profile.as_mut() {
            profile
                .extra
                .insert("current_tenant_id".to_string(), tenant_id.into());
        }
        self.save_json(&ns.profile_key(), &state.profile)?;
        self.save_json(&ns.current_tenant_key(), &switched.current_tenant)?;
        self.store.set(&ns.current_tenant_id_key(), tenant_id)?;
        self.cache.set_profile(state.profile).await;
        self.cache
            .set_tenants(
                state.available_tenants,
                switched.current_tenant.clone(),
                Some(tenant_id.to_string()),
            )
            .await;

        self.audit.tenant_switched(self.role, tenant_id);
        Ok(switched)
    }

    /// Pick up credentials another component (e.g. a dispatcher refresh) persisted.
    async fn sync_tokens(&self) {
        let ns = self.ns();
        let stored_access = self.store.get(&ns.access_key()).filter(|t| !t.is_empty());
        let stored_refresh = storage::refresh_token(self.store.as_ref(), ns);
        let state = self.cache.snapshot().await;
        if stored_access == state.access_token && stored_refresh == state.refresh_token {
            return;
        }
        if stored_access.is_none() {
            debug!(role = %self.role, "stored session gone, dropping cached state");
            self.cache.clear().await;
        } else {
            self.cache.set_credentials(stored_access, stored_refresh).await;
        }
    }

    pub async fn is_logged_in(&self) -> bool {
        let state = self.cache.snapshot().await;
        state.access_token.is_some() && state.profile.is_some()
    }

    pub async fn display_name(&self) -> Option<String> {
        self.cache
            .profile()
            .await
            .and_then(|p| p.display_name().map(String::from))
    }

    pub async fn user_role(&self) -> Option<String> {
        self.cache.profile().await.and_then(|p| p.role)
    }

    pub async fn is_multi_tenant(&self) -> bool {
        self.cache.snapshot().await.available_tenants.len() > 1
    }

    pub async fn current_tenant(&self) -> Option<Tenant> {
        self.cache.snapshot().await.current_tenant
    }
}
