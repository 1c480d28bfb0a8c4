// config.rs
// Runtime configuration read from the environment (a .env file is honored).

use std::{env, net::SocketAddr};

use anyhow::{Context, Result};

pub const DEFAULT_SESSION_TTL_SECONDS: u64 = 60 * 60 * 24; // 1 day

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mongodb_uri: String,
    pub mongodb_db: String,
    pub bind_addr: String,
    /// Origin allowed to call the API with credentials; any origin when unset.
    pub cors_origin: Option<String>,
    pub users_file: String,
    pub session_ttl_seconds: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            mongodb_uri: env::var("MONGODB_URI")
                .unwrap_or_else(|_| "mongodb://localhost:27017".to_string()),
            mongodb_db: env::var("MONGODB_DB").unwrap_or_else(|_| "pharmaledger".to_string()),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            cors_origin: env::var("CORS_ORIGIN")
                .ok()
                .filter(|origin| !origin.trim().is_empty()),
            users_file: env::var("USERS_FILE")
                .unwrap_or_else(|_| "./data/users.json".to_string()),
            session_ttl_seconds: env::var("SESSION_TTL_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_SESSION_TTL_SECONDS),
        }
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind_addr
            .parse()
            .with_context(|| format!("invalid BIND_ADDR: {}", self.bind_addr))
    }
}
