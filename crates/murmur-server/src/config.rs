use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use murmur_gateway::GatewayConfig;

pub const DEV_JWT_SECRET: &str = "dev-secret-change-me";

/// Server settings, read from `MURMUR_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub history_limit: u32,
    pub typing_idle: Duration,
    pub require_token: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let port = var("MURMUR_PORT", "3001")
            .parse()
            .context("MURMUR_PORT must be a port number")?;
        let history_limit = var("MURMUR_HISTORY_LIMIT", "100")
            .parse()
            .context("MURMUR_HISTORY_LIMIT must be a positive integer")?;
        let typing_idle_ms: u64 = var("MURMUR_TYPING_IDLE_MS", "2000")
            .parse()
            .context("MURMUR_TYPING_IDLE_MS must be milliseconds")?;
        let require_token = var("MURMUR_REQUIRE_TOKEN", "false").to_ascii_lowercase();
        let require_token = match require_token.as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" | "" => false,
            other => anyhow::bail!("MURMUR_REQUIRE_TOKEN: unrecognised value {:?}", other),
        };

        Ok(Self {
            host: var("MURMUR_HOST", "0.0.0.0"),
            port,
            db_path: PathBuf::from(var("MURMUR_DB_PATH", "murmur.db")),
            jwt_secret: var("MURMUR_JWT_SECRET", DEV_JWT_SECRET),
            history_limit,
            typing_idle: Duration::from_millis(typing_idle_ms),
            require_token,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }

    pub fn gateway(&self) -> GatewayConfig {
        GatewayConfig {
            history_limit: self.history_limit,
            typing_idle: self.typing_idle,
            token_secret: self.require_token.then(|| self.jwt_secret.clone()),
        }
    }
}
