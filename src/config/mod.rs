//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Simulation ticks per second
    pub tick_rate: u8,
    /// Player cap per room
    pub max_players_per_room: usize,
    /// Room cap per server process
    pub max_rooms: usize,
    /// Rewind window for lag-compensated hit validation
    pub max_lag_compensation_ms: f64,
    /// Seed for deterministic map generation (shared with clients)
    pub map_seed: u32,

    /// Stats service base URL; None selects the in-memory fallback
    pub database_url: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = parse_or("PORT", 9001)?;
        let server_addr = format!("{host}:{port}")
            .parse()
            .map_err(|_| ConfigError::InvalidAddress)?;

        let tick_rate: u8 = parse_or("TICK_RATE", 60)?;
        if tick_rate == 0 {
            return Err(ConfigError::Invalid {
                key: "TICK_RATE",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            server_addr,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            tick_rate,
            max_players_per_room: parse_or("MAX_PLAYERS_PER_ROOM", 16)?,
            max_rooms: parse_or("MAX_ROOMS", 10)?,
            max_lag_compensation_ms: parse_or("MAX_LAG_COMPENSATION", 400.0)?,
            map_seed: parse_or("MAP_SEED", 12345)?,
            database_url: env::var("DATABASE_URL").ok(),
        })
    }
}

/// Parse an env var, falling back to the default when unset. A present
/// but unparseable value is a startup error, not a silent default.
fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("Invalid server address format")]
    InvalidAddress,
}
