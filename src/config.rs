//! Process-level configuration parsed from environment variables.
//!
//! DESIGN
//! ======
//! Every component owns its own `*Config::from_env()`; this module holds the
//! shared parsing helper and the settings only `main` cares about (listen
//! port, database, admin credential).

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

/// Parse `key` from the environment, falling back to `default` when the
/// variable is unset or does not parse.
pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Read a non-empty string variable.
pub(crate) fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    Missing(&'static str),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    /// Bearer token guarding admin routes. Admin routes are disabled when unset.
    pub admin_token: Option<String>,
}

impl AppConfig {
    /// Build the process config from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `DATABASE_URL` is not set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env_string("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        Ok(Self {
            port: env_parse("PORT", DEFAULT_PORT),
            database_url,
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            admin_token: env_string("ADMIN_TOKEN"),
        })
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
