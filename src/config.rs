//! Process configuration, loaded once at startup.
//!
//! Follows this codebase's existing `Config::from_env()` shape: `dotenv`
//! loads a local `.env` if present, then every field is read from
//! `std::env::var` with an explicit default rather than failing to start.

use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub store_backend: StoreBackend,
    pub port: u16,
    pub slice_lock_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let database_path =
            env::var("ACB_DATABASE_PATH").unwrap_or_else(|_| "./acb_ledger.db".to_string());

        let store_backend = match env::var("ACB_STORE_BACKEND").as_deref() {
            Ok("memory") => StoreBackend::Memory,
            _ => StoreBackend::Sqlite,
        };

        let port = env::var("ACB_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let slice_lock_timeout_secs = env::var("ACB_SLICE_LOCK_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);

        Self {
            database_path,
            store_backend,
            port,
            slice_lock_timeout_secs,
        }
    }
}
