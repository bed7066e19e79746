use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::security::role::Role;
use crate::session::models::{LoginCredentials, LoginResponse, TenantSwitch, TokenPair, UserProfile};
use crate::transport::{self, RequestDescriptor};

pub const SWITCH_TENANT_ENDPOINT: &str = "/student/auth/switch-tenant";

/// Raw calls to a role's authentication endpoints. No refresh handling.
#[derive(Debug, Clone)]
pub struct AuthApi {
    http: Client,
    api_base: String,
    role: Role,
}

impl AuthApi {
    pub fn new(http: Client, api_base: impl Into<String>, role: Role) -> Self {
        Self {
            http,
            api_base: api_base.into(),
            role,
        }
    }

    pub async fn login(&self, credentials: &LoginCredentials) -> ApiResult<LoginResponse> {
        let body = serde_json::to_value(credentials)
            .map_err(|e| ApiError::InvalidResponse(format!("encoding login body: {e}")))?;
        let req = RequestDescriptor::post(self.role.login_endpoint(), body);
        let data = self.call(&req, None).await?;
        parse(data, "login")
    }

    pub async fn refresh(&self, refresh_token: &str) -> ApiResult<TokenPair> {
        let req = RequestDescriptor::post(
            self.role.refresh_endpoint(),
            json!({ "refresh_token": refresh_token }),
        );
        let data = self.call(&req, None).await?;
        let pair: TokenPair = parse(data, "refresh")?;
        if pair.access_token.is_empty() {
            return Err(ApiError::InvalidResponse(
                "refresh response carried an empty access_token".to_string(),
            ));
        }
        Ok(pair)
    }

    pub async fn current_user(&self, access_token: &str) -> ApiResult<UserProfile> {
        let req = RequestDescriptor::get(self.role.profile_endpoint());
        let data = self.call(&req, Some(access_token)).await?;
        parse(data, "profile")
    }

    pub async fn logout(&self, access_token: &str) -> ApiResult<()> {
        let req = RequestDescriptor::post(self.role.logout_endpoint(), json!({}));
        self.call(&req, Some(access_token)).await?;
        Ok(())
    }

    pub async fn switch_tenant(&self, access_token: &str, tenant_id: &str) -> ApiResult<TenantSwitch> {
        let req = RequestDescriptor::post(SWITCH_TENANT_ENDPOINT, json!({ "tenant_id": tenant_id }));
        let data = self.call(&req, Some(access_token)).await?;
        parse(data, "tenant switch")
    }

    async fn call(&self, req: &RequestDescriptor, bearer: Option<&str>) -> ApiResult<Value> {
        let resp = transport::execute(&self.http, &self.api_base, req, bearer).await?;
        debug!(role = %self.role, path = %req.path, status = %resp.status.as_u16(), "auth endpoint answered");
        Ok(resp.into_result()?.into_data())
    }
}

fn parse<T: serde::de::DeserializeOwned>(data: Value, what: &str) -> ApiResult<T> {
    serde_json::from_value(data).map_err(|e| ApiError::InvalidResponse(format!("{what}: {e}")))
}
