// Typed, env-driven startup configuration (§4.12). Loading fails fast on a
// malformed-but-present value; only a genuinely absent variable falls back to
// its documented default.

use std::{env, net::SocketAddr, time::Duration};

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub frontend_origin: String,
    pub is_production: bool,
    pub auth_service_url: String,
    pub auth_verify_timeout: Duration,
    pub database_url: Option<String>,
    pub shutdown_drain: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

fn parse_env<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value.parse().map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from the process environment (after `.env`, if
    /// present, has already been merged in by the caller). Fails fast rather
    /// than silently substituting a default for a present-but-invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port: u16 = parse_env("GAME_SERVER_PORT", 3001)?;
        let host: std::net::IpAddr = match env::var("GAME_SERVER_HOST") {
            Ok(value) => value.parse().map_err(|_| ConfigError::Invalid {
                name: "GAME_SERVER_HOST",
                value,
            })?,
            Err(_) => std::net::IpAddr::from([0, 0, 0, 0]),
        };
        let bind_addr = SocketAddr::from((host, port));

        let frontend_origin =
            env::var("FRONTEND_ORIGIN").unwrap_or_else(|_| "http://localhost:5173".to_string());

        let is_production = match env::var("ENVIRONMENT") {
            Ok(value) => match value.as_str() {
                "production" => true,
                "development" | "test" => false,
                other => {
                    return Err(ConfigError::Invalid {
                        name: "ENVIRONMENT",
                        value: other.to_string(),
                    })
                }
            },
            Err(_) => false,
        };

        let auth_service_url =
            env::var("AUTH_SERVICE_URL").unwrap_or_else(|_| "http://127.0.0.1:3002".to_string());
        let auth_verify_timeout_ms: u64 = parse_env("AUTH_VERIFY_TIMEOUT_MS", 1500)?;
        let shutdown_drain_secs: u64 = parse_env("SHUTDOWN_DRAIN_SECS", 15)?;

        let database_url = env::var("DATABASE_URL").ok();

        Ok(Self {
            bind_addr,
            frontend_origin,
            is_production,
            auth_service_url,
            auth_verify_timeout: Duration::from_millis(auth_verify_timeout_ms),
            database_url,
            shutdown_drain: Duration::from_secs(shutdown_drain_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_env_falls_back_on_absent_var() {
        assert_eq!(parse_env::<u16>("CHESS_REALTIME_TEST_ABSENT_VAR", 42).unwrap(), 42);
    }
}
