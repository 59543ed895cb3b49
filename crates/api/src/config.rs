//! Process configuration, read from environment variables.

use std::net::SocketAddr;

use thiserror::Error;

use evently_infra::{DEFAULT_MAX_ATTEMPTS, EngineConfig};
use evently_observability::{LogConfig, LogFormat};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5000";
pub const DEV_JWT_SECRET: &str = "dev-secret";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} has invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    /// Postgres when set, in-memory otherwise.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub engine: EngineConfig,
    pub log: LogConfig,
}

// Keeps secrets out of logs.
impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database", &self.database_url.as_ref().map(|_| "postgres"))
            .field("database_max_connections", &self.database_max_connections)
            .field("engine", &self.engine)
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_addr = parse(
            "BIND_ADDR",
            var("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
        )?;

        let jwt_secret = var("JWT_SECRET").unwrap_or_else(|| DEV_JWT_SECRET.to_string());

        let database_max_connections = match var("DATABASE_MAX_CONNECTIONS") {
            Some(v) => positive("DATABASE_MAX_CONNECTIONS", v)?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let max_attempts = match var("REGISTRATION_MAX_ATTEMPTS") {
            Some(v) => positive("REGISTRATION_MAX_ATTEMPTS", v)?,
            None => DEFAULT_MAX_ATTEMPTS,
        };

        let format = match var("LOG_FORMAT") {
            Some(v) => v.parse::<LogFormat>().map_err(|e| ConfigError::Invalid {
                name: "LOG_FORMAT",
                value: v.clone(),
                reason: e.to_string(),
            })?,
            None => LogFormat::default(),
        };

        Ok(Self {
            bind_addr,
            jwt_secret,
            database_url: var("DATABASE_URL"),
            database_max_connections,
            engine: EngineConfig { max_attempts },
            log: LogConfig::default().with_format(format),
        })
    }
}

fn parse<T>(name: &'static str, value: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
        value,
    })
}

fn positive(name: &'static str, value: String) -> Result<u32, ConfigError> {
    let n: u32 = parse(name, value.clone())?;
    if n == 0 {
        return Err(ConfigError::Invalid {
            name,
            value,
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(n)
}
