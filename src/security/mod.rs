pub mod audit_log;
pub mod role;
pub mod token_refresh;
