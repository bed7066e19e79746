pub mod dispatcher;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::{ApiError, ApiResult};

pub use dispatcher::Dispatcher;

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// One outbound API call, relative to the versioned API root.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Set once the request has been replayed after a 401.
    pub retried: bool,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PUT, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Whether this is a credential-refresh exchange; a 401 on it is never retried.
    pub fn is_refresh_exchange(&self) -> bool {
        self.path
            .split('?')
            .next()
            .map(|p| p.trim_end_matches('/').ends_with("/auth/refresh"))
            .unwrap_or(false)
    }
}

/// A received HTTP response with its body parsed as JSON where possible.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Value,
    pub request_id: String,
}

impl ApiResponse {
    /// Payload with the `{ "data": ... }` envelope removed.
    pub fn data(&self) -> &Value {
        unwrap_envelope(&self.body)
    }

    pub fn into_data(self) -> Value {
        match self.body {
            Value::Object(mut obj) if obj.get("data").is_some_and(|d| !d.is_null()) => {
                obj.remove("data").unwrap_or(Value::Null)
            }
            other => other,
        }
    }

    pub fn json<T: DeserializeOwned>(self) -> ApiResult<T> {
        serde_json::from_value(self.into_data())
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    /// Success passes through; anything else becomes the mapped error.
    pub fn into_result(self) -> ApiResult<ApiResponse> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(ApiError::from_status(self.status, &self.body))
        }
    }
}

/// Backend bodies are either `{ "data": payload, ... }` or the bare payload.
pub fn unwrap_envelope(body: &Value) -> &Value {
    match body.get("data") {
        Some(data) if !data.is_null() => data,
        _ => body,
    }
}

pub fn build_client(config: &ClientConfig) -> ApiResult<Client> {
    Client::builder()
        .timeout(config.timeout())
        .build()
        .map_err(|e| ApiError::Config(format!("building http client: {e}")))
}

/// Send `req` to `api_base` with an optional bearer credential.
///
/// Only transport failures are errors here; every HTTP status comes back as
/// an [`ApiResponse`] so callers decide how to treat 401s.
pub async fn execute(
    client: &Client,
    api_base: &str,
    req: &RequestDescriptor,
    bearer: Option<&str>,
) -> ApiResult<ApiResponse> {
    let url = format!("{}{}", api_base, req.path);
    let request_id = Uuid::new_v4().to_string();

    let mut builder = client
        .request(req.method.clone(), &url)
        .header(ACCEPT, "application/json")
        .header(REQUEST_ID_HEADER, &request_id);
    if !req.query.is_empty() {
        builder = builder.query(&req.query);
    }
    if let Some(body) = &req.body {
        builder = builder.json(body);
    }
    if let Some(token) = bearer {
        builder = builder.bearer_auth(token);
    }

    trace!(
        method = %req.method,
        url = %url,
        request_id = %request_id,
        authenticated = bearer.is_some(),
        retried = req.retried,
        "sending request"
    );

    let resp = builder.send().await.map_err(|err| {
        warn!(
            method = %req.method,
            path = %req.path,
            request_id = %request_id,
            timeout = err.is_timeout(),
            error = %err,
            "request failed without response"
        );
        ApiError::from(err)
    })?;

    let status = resp.status();
    let is_json = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("json"));
    let text = resp.text().await.map_err(ApiError::from)?;
    let body = parse_body(&text, is_json);

    debug!(
        method = %req.method,
        path = %req.path,
        status = %status.as_u16(),
        request_id = %request_id,
        "received response"
    );

    Ok(ApiResponse {
        status,
        body,
        request_id,
    })
}

fn parse_body(text: &str, is_json: bool) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    match serde_json::from_str(text) {
        Ok(v) => v,
        Err(err) => {
            if is_json {
                debug!(error = %err, "response declared JSON but did not parse");
            }
            Value::String(text.to_string())
        }
    }
}
