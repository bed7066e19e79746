use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Body sent to a role's login endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum LoginCredentials {
    /// Institutional login: school code + student number + password.
    Student {
        school_code: String,
        number: String,
        password: String,
    },
    Admin { username: String, password: String },
}

impl LoginCredentials {
    pub fn student(
        school_code: impl Into<String>,
        student_number: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        LoginCredentials::Student {
            school_code: school_code.into(),
            number: student_number.into(),
            password: password.into(),
        }
    }

    pub fn admin(username: impl Into<String>, password: impl Into<String>) -> Self {
        LoginCredentials::Admin {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Identifier safe to log.
    pub fn login_name(&self) -> String {
        match self {
            LoginCredentials::Student {
                school_code,
                number,
                ..
            } => format!("{school_code}/{number}"),
            LoginCredentials::Admin { username, .. } => username.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    /// Present only when the backend rotated the refresh credential.
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Students get `user`, the admin endpoint answers with `admin`.
    #[serde(default, alias = "admin")]
    pub user: Option<UserProfile>,
    #[serde(default)]
    pub available_tenants: Vec<Tenant>,
    #[serde(default)]
    pub current_tenant: Option<Tenant>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TenantSwitch {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub current_tenant: Option<Tenant>,
}

/// Current-user record; unknown backend fields are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserProfile {
    pub fn display_name(&self) -> Option<&str> {
        self.full_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or(self.username.as_deref())
    }

    pub fn current_tenant_id(&self) -> Option<String> {
        self.extra.get("current_tenant_id").and_then(value_to_string)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    #[serde(deserialize_with = "string_or_number")]
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn value_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    value_to_string(&v).ok_or_else(|| serde::de::Error::custom("expected string or number"))
}
