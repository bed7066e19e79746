pub mod file;
pub mod memory;

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::security::role::{Namespace, ALL_NAMESPACES};

pub use file::FileStore;
pub use memory::MemoryStore;

/// Unscoped access credential written by older clients; read as a fallback only.
pub const LEGACY_ACCESS_KEY: &str = "access_token";
pub const LEGACY_KEYS: [&str; 4] = ["access_token", "refresh_token", "user_info", "admin_info"];

/// Durable string key-value storage backing every session namespace.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;

    fn remove_many(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.remove(key)?;
        }
        Ok(())
    }
}

/// Open the store described by `config`: a JSON file when `session_file` is set,
/// memory otherwise.
pub fn open(config: &ClientConfig) -> Result<Arc<dyn KeyValueStore>> {
    match &config.session_file {
        Some(path) => Ok(Arc::new(FileStore::open(path)?)),
        None => Ok(Arc::new(MemoryStore::new())),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Access credential for `ns`, falling back to the legacy unscoped key.
pub fn access_token(store: &dyn KeyValueStore, ns: Namespace) -> Option<String> {
    non_empty(store.get(&ns.access_key())).or_else(|| non_empty(store.get(LEGACY_ACCESS_KEY)))
}

pub fn refresh_token(store: &dyn KeyValueStore, ns: Namespace) -> Option<String> {
    non_empty(store.get(&ns.refresh_key()))
}

/// Persist a freshly issued credential pair; the refresh credential is only
/// replaced when the backend rotated it.
pub fn store_tokens(
    store: &dyn KeyValueStore,
    ns: Namespace,
    access: &str,
    refresh: Option<&str>,
) -> Result<()> {
    store.set(&ns.access_key(), access)?;
    if let Some(refresh) = refresh.filter(|r| !r.is_empty()) {
        store.set(&ns.refresh_key(), refresh)?;
    }
    Ok(())
}

pub fn clear_namespace(store: &dyn KeyValueStore, ns: Namespace) -> Result<()> {
    let mut keys = ns.keys();
    keys.extend(LEGACY_KEYS.iter().map(|k| k.to_string()));
    store.remove_many(&keys)?;
    debug!(namespace = %ns, "cleared session namespace");
    Ok(())
}

/// Wipe every namespace and the legacy keys.
pub fn clear_all(store: &dyn KeyValueStore) -> Result<()> {
    let mut keys: Vec<String> = ALL_NAMESPACES.iter().flat_map(|ns| ns.keys()).collect();
    keys.extend(LEGACY_KEYS.iter().map(|k| k.to_string()));
    store.remove_many(&keys)?;
    info!("cleared all stored sessions");
    Ok(())
}

/// Move a legacy unscoped access credential into `ns` when `ns` has none.
/// Returns whether anything was migrated.
pub fn migrate_legacy(store: &dyn KeyValueStore, ns: Namespace) -> Result<bool> {
    let Some(legacy) = non_empty(store.get(LEGACY_ACCESS_KEY)) else {
        return Ok(false);
    };
    let migrated = non_empty(store.get(&ns.access_key())).is_none();
    if migrated {
        store.set(&ns.access_key(), &legacy)?;
        info!(namespace = %ns, "migrated legacy access credential");
    }
    store.remove(LEGACY_ACCESS_KEY)?;
    Ok(migrated)
}
