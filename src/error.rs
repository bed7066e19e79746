use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::security::role::Role;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Errors surfaced by the dispatcher and session stores.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No HTTP response was received.
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("request timed out, please try again later")]
    Timeout,

    /// Terminal authorization failure; local credentials have been wiped.
    #[error("{message}")]
    Unauthorized { message: String },

    #[error("no refresh credential stored, please log in again")]
    MissingRefreshCredential,

    #[error("credential refresh failed: {0}")]
    RefreshFailed(String),

    #[error("{message} (HTTP {status})")]
    Http { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("not logged in")]
    NotLoggedIn,

    /// Refused locally; the operation does not exist for this role.
    #[error("{operation} is not available to the {role} role")]
    NotPermitted { role: Role, operation: &'static str },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl ApiError {
    /// Map a non-success response to an error, preferring the backend's own
    /// `message` field over the generic text for the status code.
    pub fn from_status(status: StatusCode, body: &Value) -> Self {
        let message = backend_message(body)
            .unwrap_or_else(|| default_message(status.as_u16()).to_string());
        if status == StatusCode::UNAUTHORIZED {
            return ApiError::Unauthorized { message };
        }
        ApiError::Http {
            status: status.as_u16(),
            message,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            ApiError::Unauthorized { .. }
                | ApiError::Http { status: 401, .. }
                | ApiError::MissingRefreshCredential
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::Unauthorized { .. } => Some(401),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::Network(err)
        }
    }
}

fn backend_message(body: &Value) -> Option<String> {
    body.get("message")
        .or_else(|| body.get("detail"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from)
}

pub fn default_message(status: u16) -> &'static str {
    match status {
        400 => "validation failed, please check your input",
        401 => "session expired, please log in again",
        403 => "you do not have permission to perform this action",
        404 => "the requested resource does not exist",
        500 => "internal server error, please try again later",
        _ => "unknown error, please try again later",
    }
}
