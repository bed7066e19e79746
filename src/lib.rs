pub mod config;
pub mod error;
pub mod security;
pub mod session;
pub mod storage;
pub mod transport;
pub mod utils;

pub use config::ClientConfig;
pub use error::{ApiError, ApiResult};
pub use security::role::Role;
pub use session::SessionStore;
pub use transport::Dispatcher;

// Crate version exposed for runtime queries
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
