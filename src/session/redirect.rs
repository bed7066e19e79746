use std::sync::{Arc, Mutex};
use tracing::warn;

/// Receives the login page a user must be sent to after an unrecoverable
/// authorization failure.
pub trait LoginRedirect: Send + Sync {
    fn redirect_to_login(&self, login_page: &str);
}

/// Logs the redirect target; suited to headless callers such as the CLI.
#[derive(Debug, Clone, Default)]
pub struct LogRedirect;

impl LoginRedirect for LogRedirect {
    fn redirect_to_login(&self, login_page: &str) {
        warn!(login_page = %login_page, "session ended, please log in again");
    }
}

/// Remembers every redirect; clones share the record.
#[derive(Debug, Clone, Default)]
pub struct RecordingRedirect {
    targets: Arc<Mutex<Vec<String>>>,
}

impl RecordingRedirect {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn targets(&self) -> Vec<String> {
        match self.targets.lock() {
            Ok(g) => g.clone(),
            Err(e) => e.into_inner().clone(),
        }
    }

    pub fn count(&self) -> usize {
        self.targets().len()
    }
}

impl LoginRedirect for RecordingRedirect {
    fn redirect_to_login(&self, login_page: &str) {
        let mut targets = match self.targets.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        targets.push(login_page.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_redirect_shares_state() {
        let redirect = RecordingRedirect::new();
        let handle = redirect.clone();
        redirect.redirect_to_login("/admin/login");
        assert_eq!(handle.targets(), vec!["/admin/login".to_string()]);
        assert_eq!(handle.count(), 1);
    }
}
