use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{ApiError, ApiResult};
use crate::security::audit_log::AuditLogger;
use crate::security::role::Role;
use crate::security::token_refresh::{RefreshCoordinator, RefreshTicket};
use crate::session::api::AuthApi;
use crate::session::redirect::LoginRedirect;
use crate::storage::{self, KeyValueStore};
use crate::transport::{self, ApiResponse, RequestDescriptor};

/// Authenticated request dispatcher for one role.
///
/// Attaches the role's stored bearer credential, and on a 401 performs at
/// most one replay per request, sharing a single refresh exchange between
/// every request that fails while it is outstanding. Unrecoverable failures
/// wipe all stored sessions and send the user to the role's login page.
pub struct Dispatcher {
    role: Role,
    api_base: String,
    http: Client,
    auth: AuthApi,
    store: Arc<dyn KeyValueStore>,
    refresh: RefreshCoordinator,
    redirect: Arc<dyn LoginRedirect>,
    audit: AuditLogger,
}

impl Dispatcher {
    pub fn new(
        config: &ClientConfig,
        role: Role,
        store: Arc<dyn KeyValueStore>,
        redirect: Arc<dyn LoginRedirect>,
    ) -> ApiResult<Self> {
        let http = transport::build_client(config)?;
        Ok(Self::with_client(http, config.api_base(), role, store, redirect))
    }

    pub fn with_client(
        http: Client,
        api_base: impl Into<String>,
        role: Role,
        store: Arc<dyn KeyValueStore>,
        redirect: Arc<dyn LoginRedirect>,
    ) -> Self {
        let api_base = api_base.into();
        Self {
            role,
            auth: AuthApi::new(http.clone(), api_base.clone(), role),
            api_base,
            http,
            store,
            refresh: RefreshCoordinator::new(),
            redirect,
            audit: AuditLogger::new(),
        }
    }

    /// Share refresh state with other dispatchers of the same namespace.
    pub fn with_coordinator(mut self, coordinator: RefreshCoordinator) -> Self {
        self.refresh = coordinator;
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.refresh
    }

    pub async fn get(&self, path: &str) -> ApiResult<Value> {
        Ok(self.send(RequestDescriptor::get(path)).await?.into_data())
    }

    pub async fn get_as<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        self.send(RequestDescriptor::get(path)).await?.json()
    }

    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> ApiResult<Value> {
        let req = RequestDescriptor::post(path, encode(body)?);
        Ok(self.send(req).await?.into_data())
    }

    pub async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> ApiResult<Value> {
        let req = RequestDescriptor::put(path, encode(body)?);
        Ok(self.send(req).await?.into_data())
    }

    pub async fn delete(&self, path: &str) -> ApiResult<Value> {
        Ok(self.send(RequestDescriptor::delete(path)).await?.into_data())
    }

    /// Dispatch `req`, transparently recovering from one credential expiry.
    pub async fn send(&self, mut req: RequestDescriptor) -> ApiResult<ApiResponse> {
        let mut bearer = self.attach_credential();
        loop {
            let response = transport::execute(&self.http, &self.api_base, &req, bearer.as_deref()).await?;
            if response.status != StatusCode::UNAUTHORIZED {
                return response.into_result();
            }
            debug!(
                role = %self.role,
                path = %req.path,
                request_id = %response.request_id,
                retried = req.retried,
                "received 401"
            );
            bearer = Some(self.recover(&mut req, bearer.as_deref(), &response).await?);
        }
    }

    fn attach_credential(&self) -> Option<String> {
        storage::access_token(self.store.as_ref(), self.role.namespace())
    }

    /// Decide what a 401 means; returns the credential to replay with.
    async fn recover(
        &self,
        req: &mut RequestDescriptor,
        sent_with: Option<&str>,
        response: &ApiResponse,
    ) -> ApiResult<String> {
        if req.is_refresh_exchange() {
            let err = ApiError::from_status(response.status, &response.body);
            return Err(self.terminate("refresh exchange rejected", err));
        }
        if req.retried {
            let err = ApiError::from_status(response.status, &response.body);
            return Err(self.terminate("rejected again after retry", err));
        }
        req.retried = true;

        let ns = self.role.namespace();
        let Some(refresh_token) = storage::refresh_token(self.store.as_ref(), ns) else {
            return Err(self.terminate("no refresh credential", ApiError::MissingRefreshCredential));
        };

        // a refresh finished while this request was in flight
        if let Some(current) = storage::access_token(self.store.as_ref(), ns) {
            if sent_with != Some(current.as_str()) {
                debug!(role = %self.role, path = %req.path, "credential already rotated, replaying");
                return Ok(current);
            }
        }

        match self.refresh.begin() {
            RefreshTicket::Waiter(waiter) => match waiter.wait().await {
                Ok(token) => {
                    debug!(role = %self.role, path = %req.path, "replaying queued request");
                    Ok(token)
                }
                Err(failure) => Err(ApiError::RefreshFailed(failure.0)),
            },
            RefreshTicket::Leader(lease) => match self.auth.refresh(&refresh_token).await {
                Ok(pair) => {
                    if let Err(err) = storage::store_tokens(
                        self.store.as_ref(),
                        ns,
                        &pair.access_token,
                        pair.refresh_token.as_deref(),
                    ) {
                        lease.fail(format!("persisting refreshed credential: {err}"));
                        return Err(self.terminate("could not persist refreshed credential", err.into()));
                    }
                    self.audit.token_rotated(self.role, pair.refresh_token.is_some());
                    let released = lease.publish(&pair.access_token);
                    info!(role = %self.role, released, "credential refreshed");
                    Ok(pair.access_token)
                }
                Err(err) => {
                    let reason = err.to_string();
                    lease.fail(reason.clone());
                    self.audit.refresh_failed(self.role, &reason);
                    Err(self.terminate("credential refresh failed", ApiError::RefreshFailed(reason)))
                }
            },
        }
    }

    /// Wipe every stored session, redirect to login, hand back `err`.
    fn terminate(&self, reason: &str, err: ApiError) -> ApiError {
        if let Err(clear_err) = storage::clear_all(self.store.as_ref()) {
            warn!(role = %self.role, error = %clear_err, "failed to clear stored sessions");
        }
        let login_page = self.role.login_page();
        self.audit.session_terminated(self.role, reason, login_page);
        self.redirect.redirect_to_login(login_page);
        err
    }
}

fn encode<B: Serialize + ?Sized>(body: &B) -> ApiResult<Value> {
    serde_json::to_value(body).map_err(|e| ApiError::InvalidResponse(format!("encoding request body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::redirect::RecordingRedirect;
    use crate::storage::MemoryStore;
    use mockito::Server;
    use serde_json::json;

    fn dispatcher(
        server: &Server,
        role: Role,
        store: Arc<MemoryStore>,
        redirect: RecordingRedirect,
    ) -> Dispatcher {
        Dispatcher::with_client(
            Client::new(),
            format!("{}/api/v1", server.url()),
            role,
            store,
            Arc::new(redirect),
        )
    }

    #[tokio::test]
    async fn attaches_role_credential() {
        let mut server = Server::new_async().await;
        let store = Arc::new(MemoryStore::new());
        store.set("admin_access_token", "A1").unwrap();
        store.set("student_access_token", "S1").unwrap();

        let mock = server
            .mock("GET", "/api/v1/admin/courses")
            .match_header("authorization", "Bearer A1")
            .with_status(200)
            .with_body(r#"{"data":[{"id":1}]}"#)
            .create_async()
            .await;

        let d = dispatcher(&server, Role::InstitutionAdmin, store, RecordingRedirect::new());
        let data = d.get("/admin/courses").await.unwrap();
        assert_eq!(data, json!([{"id": 1}]));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn falls_back_to_legacy_credential() {
        let mut server = Server::new_async().await;
        let store = Arc::new(MemoryStore::new());
        store.set("access_token", "L1").unwrap();

        let mock = server
            .mock("GET", "/api/v1/projects")
            .match_header("authorization", "Bearer L1")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let d = dispatcher(&server, Role::Student, store.clone(), RecordingRedirect::new());
        d.get("/projects").await.unwrap();
        mock.assert_async().await;
        // fallback is read-only
        assert_eq!(store.get("student_access_token"), None);
    }

    #[tokio::test]
    async fn anonymous_request_has_no_authorization_header() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/public/schools")
            .match_header("authorization", mockito::Matcher::Missing)
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let d = dispatcher(
            &server,
            Role::Student,
            Arc::new(MemoryStore::new()),
            RecordingRedirect::new(),
        );
        d.get("/public/schools").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_401_errors_pass_through_without_refresh() {
        let mut server = Server::new_async().await;
        let store = Arc::new(MemoryStore::new());
        store.set("student_access_token", "T1").unwrap();
        store.set("student_refresh_token", "R1").unwrap();

        let _m = server
            .mock("GET", "/api/v1/tasks/9")
            .with_status(403)
            .with_body(r#"{"message":"not your task"}"#)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/api/v1/student/auth/refresh")
            .expect(0)
            .create_async()
            .await;

        let redirect = RecordingRedirect::new();
        let d = dispatcher(&server, Role::Student, store.clone(), redirect.clone());
        let err = d.get("/tasks/9").await.unwrap_err();

        assert_eq!(err.status(), Some(403));
        assert!(err.to_string().contains("not your task"));
        refresh.assert_async().await;
        assert_eq!(redirect.count(), 0);
        assert_eq!(store.get("student_access_token").as_deref(), Some("T1"));
    }

    #[tokio::test]
    async fn refresh_endpoint_401_is_terminal() {
        let mut server = Server::new_async().await;
        let store = Arc::new(MemoryStore::new());
        store.set("admin_access_token", "A1").unwrap();
        store.set("admin_refresh_token", "AR1").unwrap();
        store.set("student_access_token", "S1").unwrap();

        let mock = server
            .mock("POST", "/api/v1/admin/auth/refresh")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;

        let redirect = RecordingRedirect::new();
        let d = dispatcher(&server, Role::PlatformAdmin, store.clone(), redirect.clone());
        let err = d
            .send(RequestDescriptor::post("/admin/auth/refresh", json!({"refresh_token": "AR1"})))
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Unauthorized { .. }));
        mock.assert_async().await;
        assert_eq!(redirect.targets(), vec!["/admin/login".to_string()]);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn refresh_failure_wraps_backend_error() {
        let mut server = Server::new_async().await;
        let store = Arc::new(MemoryStore::new());
        store.set("student_access_token", "T1").unwrap();
        store.set("student_refresh_token", "R1").unwrap();

        let _m = server
            .mock("GET", "/api/v1/resource")
            .with_status(401)
            .create_async()
            .await;
        let _m = server
            .mock("POST", "/api/v1/student/auth/refresh")
            .with_status(401)
            .with_body(r#"{"message":"refresh token expired"}"#)
            .create_async()
            .await;

        let redirect = RecordingRedirect::new();
        let d = dispatcher(&server, Role::Student, store.clone(), redirect.clone());
        let err = d.get("/resource").await.unwrap_err();

        match err {
            ApiError::RefreshFailed(msg) => assert!(msg.contains("refresh token expired")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!d.coordinator().is_refreshing());
        assert_eq!(redirect.targets(), vec!["/login".to_string()]);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn rotated_refresh_credential_is_persisted() {
        let mut server = Server::new_async().await;
        let store = Arc::new(MemoryStore::new());
        store.set("student_access_token", "T1").unwrap();
        store.set("student_refresh_token", "R1").unwrap();

        let _m = server
            .mock("GET", "/api/v1/resource")
            .match_header("authorization", "Bearer T1")
            .with_status(401)
            .create_async()
            .await;
        let _m = server
            .mock("GET", "/api/v1/resource")
            .match_header("authorization", "Bearer T2")
            .with_status(200)
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;
        let _m = server
            .mock("POST", "/api/v1/student/auth/refresh")
            .with_status(200)
            .with_body(r#"{"data":{"access_token":"T2","refresh_token":"R2"}}"#)
            .create_async()
            .await;

        let d = dispatcher(&server, Role::Student, store.clone(), RecordingRedirect::new());
        assert_eq!(d.get("/resource").await.unwrap(), json!({"ok": true}));
        assert_eq!(store.get("student_access_token").as_deref(), Some("T2"));
        assert_eq!(store.get("student_refresh_token").as_deref(), Some("R2"));
    }

    #[tokio::test]
    async fn verbs_carry_credential_and_body() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Course {
            id: i64,
            title: String,
        }

        let mut server = Server::new_async().await;
        let store = Arc::new(MemoryStore::new());
        store.set("admin_access_token", "A1").unwrap();

        let put = server
            .mock("PUT", "/api/v1/admin/courses/3")
            .match_header("authorization", "Bearer A1")
            .match_body(mockito::Matcher::Json(json!({"title": "Robotics"})))
            .with_status(200)
            .with_body(r#"{"data":{"id":3,"title":"Robotics"}}"#)
            .create_async()
            .await;
        let get = server
            .mock("GET", "/api/v1/admin/courses/3")
            .with_status(200)
            .with_body(r#"{"data":{"id":3,"title":"Robotics"}}"#)
            .create_async()
            .await;
        let delete = server
            .mock("DELETE", "/api/v1/admin/courses/3")
            .match_header("authorization", "Bearer A1")
            .with_status(204)
            .create_async()
            .await;

        let d = dispatcher(&server, Role::PlatformAdmin, store, RecordingRedirect::new());
        d.put("/admin/courses/3", &json!({"title": "Robotics"}))
            .await
            .unwrap();
        let course: Course = d.get_as("/admin/courses/3").await.unwrap();
        assert_eq!(
            course,
            Course {
                id: 3,
                title: "Robotics".into()
            }
        );
        assert_eq!(d.delete("/admin/courses/3").await.unwrap(), Value::Null);

        put.assert_async().await;
        get.assert_async().await;
        delete.assert_async().await;
    }
}
