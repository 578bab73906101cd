use anyhow::{Context, Result};

#[derive(Clone, Debug)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub redis: RedisConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub url: String,
    pub enabled: bool,
}

/// Load configuration from the environment. `bootstrap::init_env` must run
/// first so that `.env` values are visible.
pub fn load() -> Result<Config> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
        .unwrap_or_else(|_| "10".to_string())
        .parse::<u32>()
        .context("DATABASE_MAX_CONNECTIONS must be a valid number")?;

    let host = std::env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("SERVER_PORT")
        .unwrap_or_else(|_| "3000".to_string())
        .parse::<u16>()
        .context("SERVER_PORT must be a valid number")?;

    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/".to_string());
    let redis_enabled = std::env::var("REDIS_ENABLED")
        .map(|v| v != "false")
        .unwrap_or(true);

    Ok(Config {
        database: DatabaseConfig {
            url: database_url,
            max_connections,
        },
        server: ServerConfig { host, port },
        redis: RedisConfig {
            url: redis_url,
            enabled: redis_enabled,
        },
    })
}
