use tracing::{info, warn};

use crate::security::role::Role;

#[derive(Debug, Clone, Default)]
pub struct AuditLogger;

impl AuditLogger {
    pub fn new() -> Self {
        Self
    }

    pub fn login_success(&self, role: Role, username: Option<&str>) {
        info!(target: "audit", event = "login_success", role = %role, username = username.unwrap_or(""));
    }

    pub fn login_failure(&self, role: Role, reason: &str) {
        warn!(target: "audit", event = "login_failure", role = %role, reason);
    }

    pub fn token_rotated(&self, role: Role, refresh_rotated: bool) {
        info!(target: "audit", event = "token_rotated", role = %role, refresh_rotated);
    }

    pub fn refresh_failed(&self, role: Role, reason: &str) {
        warn!(target: "audit", event = "refresh_failed", role = %role, reason);
    }

    pub fn session_terminated(&self, role: Role, reason: &str, redirect_to: &str) {
        warn!(target: "audit", event = "session_terminated", role = %role, reason, redirect_to);
    }

    pub fn tenant_switched(&self, role: Role, tenant_id: &str) {
        info!(target: "audit", event = "tenant_switched", role = %role, tenant_id);
    }

    pub fn logout(&self, role: Role, backend_notified: bool) {
        info!(target: "audit", event = "logout", role = %role, backend_notified);
    }
}
