use anyhow::Context;
use std::{net::SocketAddr, time::Duration};

/// Process settings read from the environment (and `.env`, if present).
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub db_path: String,
    /// Credential the gateway and operators must present. None accepts everyone.
    pub api_key: Option<String>,
    /// Whole-request timeout. Storage waits are bounded by `busy_timeout`.
    pub request_timeout: Duration,
    pub busy_timeout: Duration,
    /// JSON ledger rules; defaults apply when unset.
    pub rules_file: Option<String>,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let listen_addr: SocketAddr = env_or("LEDGER_LISTEN_ADDR", "0.0.0.0:8080")
            .parse()
            .context("Invalid LEDGER_LISTEN_ADDR")?;
        let db_path = env_or("LEDGER_DB_PATH", "./ledger.db");
        let api_key = std::env::var("LEDGER_API_KEY")
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        let timeout_ms: u64 = env_or("LEDGER_REQUEST_TIMEOUT_MS", "10000")
            .parse()
            .unwrap_or(10_000);
        let busy_ms: u64 = env_or("LEDGER_BUSY_TIMEOUT_MS", "5000").parse().unwrap_or(5_000);
        let rules_file = std::env::var("LEDGER_RULES_FILE").ok().filter(|p| !p.is_empty());
        Ok(Self {
            listen_addr,
            db_path,
            api_key,
            request_timeout: Duration::from_millis(timeout_ms),
            busy_timeout: Duration::from_millis(busy_ms),
            rules_file,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
