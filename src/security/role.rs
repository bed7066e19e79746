use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// User class a dispatcher or session store acts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    InstitutionAdmin,
    PlatformAdmin,
}

/// Storage/endpoint namespace. Both admin roles share `Admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Student,
    Admin,
}

pub const ALL_NAMESPACES: [Namespace; 2] = [Namespace::Student, Namespace::Admin];

impl Role {
    /// Pick the role for a navigation path.
    ///
    /// `/admin...` is an admin route; `/student...` or an existing student
    /// credential means student; anything else defaults to student.
    pub fn resolve(path: &str, has_student_credential: bool) -> Role {
        let role = if path.starts_with("/admin") {
            Role::InstitutionAdmin
        } else {
            Role::Student
        };
        debug!(
            path = %path,
            student_route = path.starts_with("/student"),
            has_student_credential,
            role = %role,
            "resolved role from route"
        );
        role
    }

    pub fn namespace(self) -> Namespace {
        match self {
            Role::Student => Namespace::Student,
            Role::InstitutionAdmin | Role::PlatformAdmin => Namespace::Admin,
        }
    }

    pub fn login_endpoint(self) -> String {
        self.namespace().endpoint("login")
    }

    pub fn refresh_endpoint(self) -> String {
        self.namespace().endpoint("refresh")
    }

    pub fn profile_endpoint(self) -> String {
        self.namespace().endpoint("me")
    }

    pub fn logout_endpoint(self) -> String {
        self.namespace().endpoint("logout")
    }

    /// Front-end page a user of this role is sent to when the session dies.
    pub fn login_page(self) -> &'static str {
        match self.namespace() {
            Namespace::Student => "/login",
            Namespace::Admin => "/admin/login",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::InstitutionAdmin => "institution_admin",
            Role::PlatformAdmin => "platform_admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Role::Student),
            "institution_admin" | "institution-admin" | "teacher" | "admin" => {
                Ok(Role::InstitutionAdmin)
            }
            "platform_admin" | "platform-admin" => Ok(Role::PlatformAdmin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

impl Namespace {
    pub fn prefix(self) -> &'static str {
        match self {
            Namespace::Student => "student",
            Namespace::Admin => "admin",
        }
    }

    pub fn access_key(self) -> String {
        format!("{}_access_token", self.prefix())
    }

    pub fn refresh_key(self) -> String {
        format!("{}_refresh_token", self.prefix())
    }

    pub fn profile_key(self) -> String {
        format!("{}_user_info", self.prefix())
    }

    pub fn tenants_key(self) -> String {
        format!("{}_available_tenants", self.prefix())
    }

    pub fn current_tenant_key(self) -> String {
        format!("{}_current_tenant", self.prefix())
    }

    pub fn current_tenant_id_key(self) -> String {
        format!("{}_current_tenant_id", self.prefix())
    }

    /// Every key this namespace may write.
    pub fn keys(self) -> Vec<String> {
        vec![
            self.access_key(),
            self.refresh_key(),
            self.profile_key(),
            self.tenants_key(),
            self.current_tenant_key(),
            self.current_tenant_id_key(),
        ]
    }

    fn endpoint(self, action: &str) -> String {
        format!("/{}/auth/{}", self.prefix(), action)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}
