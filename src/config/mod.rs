//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::game::ping::{
    PredictionConfig, DEFAULT_CLIENT_BIAS_PCT, DEFAULT_LATENCY_REDUCTION_MS,
    DEFAULT_MAX_PREDICTION_PING_MS,
};
use crate::game::ArenaConfig;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS, comma-separated
    pub client_origin: String,
    /// Settings every new arena starts with
    pub arena: ArenaConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which returns a variable's raw value
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        let prediction = PredictionConfig {
            latency_reduction_ms: parse_or(
                &lookup,
                "PREDICTION_LATENCY_REDUCTION_MS",
                DEFAULT_LATENCY_REDUCTION_MS,
            )?,
            client_bias_pct: parse_or(&lookup, "PREDICTION_CLIENT_BIAS", DEFAULT_CLIENT_BIAS_PCT)?,
            max_prediction_ping_ms: parse_or(
                &lookup,
                "MAX_PREDICTION_PING_MS",
                DEFAULT_MAX_PREDICTION_PING_MS,
            )?,
        };
        if !(0.0..=1.0).contains(&prediction.client_bias_pct) {
            return Err(ConfigError::Invalid("PREDICTION_CLIENT_BIAS"));
        }
        if !is_non_negative(prediction.latency_reduction_ms) {
            return Err(ConfigError::Invalid("PREDICTION_LATENCY_REDUCTION_MS"));
        }
        if !is_non_negative(prediction.max_prediction_ping_ms) {
            return Err(ConfigError::Invalid("MAX_PREDICTION_PING_MS"));
        }

        let defaults = ArenaConfig::default();
        let arena = ArenaConfig {
            prediction,
            max_net_prediction_error: parse_or(
                &lookup,
                "MAX_NET_PREDICTION_ERROR",
                defaults.max_net_prediction_error,
            )?,
            move_queue_capacity: parse_or(&lookup, "MOVE_QUEUE_CAPACITY", defaults.move_queue_capacity)?,
            max_players: parse_or(&lookup, "ARENA_MAX_PLAYERS", defaults.max_players)?,
            ability_timeout: Duration::from_millis(parse_or(
                &lookup,
                "ABILITY_TIMEOUT_MS",
                defaults.ability_timeout.as_millis() as u64,
            )?),
            ..defaults
        };
        if !arena.max_net_prediction_error.is_finite() || arena.max_net_prediction_error <= 0.0 {
            return Err(ConfigError::Invalid("MAX_NET_PREDICTION_ERROR"));
        }
        if arena.move_queue_capacity == 0 {
            return Err(ConfigError::Invalid("MOVE_QUEUE_CAPACITY"));
        }
        if arena.max_players == 0 {
            return Err(ConfigError::Invalid("ARENA_MAX_PLAYERS"));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),

            client_origin: lookup("CLIENT_ORIGIN")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),

            arena,
        })
    }
}

/// Finite and at least zero; NaN fails
fn is_non_negative(value: f32) -> bool {
    value.is_finite() && value >= 0.0
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
