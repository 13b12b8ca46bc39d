//! Server configuration module.
//!
//! Parses configuration from environment variables for the BidRoom server.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `PORT` | No | 8080 | HTTP server port |
//! | `BIDROOM_BIND_ADDR` | No | `0.0.0.0` | Interface to bind |
//! | `BIDROOM_MAX_TEAMS` | No | 10 | Team slots per room (1-64) |
//! | `BIDROOM_DEFAULT_TIMER` | No | 30 | Countdown of a fresh room, in seconds |
//! | `BIDROOM_NOTIFY_REJECTIONS` | No | true | Send `operation-rejected` to senders |
//! | `BIDROOM_ALLOWED_ORIGINS` | No | - | Comma-separated CORS origins (permissive if unset) |

use std::env;
use std::net::IpAddr;

use thiserror::Error;
use tracing::warn;

use crate::types::DEFAULT_TIMER_SECS;

/// Default HTTP server port.
const DEFAULT_PORT: u16 = 8080;

/// Default bind address.
const DEFAULT_BIND_ADDR: &str = "0.0.0.0";

/// Default number of team slots per room.
pub const DEFAULT_MAX_TEAMS: usize = 10;

/// Upper bound accepted for `BIDROOM_MAX_TEAMS`.
const MAX_TEAMS_LIMIT: usize = 64;

/// Errors that can occur when parsing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable has invalid format.
    #[error("invalid format for {var}: {message}")]
    InvalidFormat { var: String, message: String },

    /// Port number is invalid.
    #[error("invalid port number: {0}")]
    InvalidPort(#[from] std::num::ParseIntError),

    /// Configuration validation failed.
    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

/// Server configuration parsed from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// HTTP server port.
    pub port: u16,

    /// Interface the listener binds to.
    pub bind_addr: IpAddr,

    /// Maximum number of team sessions per room.
    pub max_teams: usize,

    /// Countdown value of a freshly created room.
    pub default_timer: u32,

    /// Whether refused operations are reported back to the sender.
    pub notify_rejections: bool,

    /// Allowed CORS origins. Empty means any origin.
    pub allowed_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_addr: IpAddr::from([0, 0, 0, 0]),
            max_teams: DEFAULT_MAX_TEAMS,
            default_timer: DEFAULT_TIMER_SECS,
            notify_rejections: true,
            allowed_origins: Vec::new(),
        }
    }
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid format or a value
    /// falls outside its accepted range.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use bidroom_server::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Server will listen on port {}", config.port);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            port: parse_port()?,
            bind_addr: parse_bind_addr()?,
            max_teams: parse_number_env("BIDROOM_MAX_TEAMS", DEFAULT_MAX_TEAMS)?,
            default_timer: parse_number_env("BIDROOM_DEFAULT_TIMER", DEFAULT_TIMER_SECS)?,
            notify_rejections: parse_bool_env("BIDROOM_NOTIFY_REJECTIONS", true),
            allowed_origins: parse_list_env("BIDROOM_ALLOWED_ORIGINS"),
        };

        config.validate()?;

        if !config.notify_rejections {
            warn!("BIDROOM_NOTIFY_REJECTIONS is disabled - refused operations are dropped silently");
        }

        Ok(config)
    }

    /// Validate value ranges.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_teams == 0 || self.max_teams > MAX_TEAMS_LIMIT {
            return Err(ConfigError::ValidationError(format!(
                "BIDROOM_MAX_TEAMS must be between 1 and {MAX_TEAMS_LIMIT}, got {}",
                self.max_teams
            )));
        }

        Ok(())
    }
}

/// Parse a boolean environment variable.
///
/// Accepts "true"/"false" (case-insensitive); anything else, or an unset
/// variable, yields `default`.
fn parse_bool_env(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) if v.eq_ignore_ascii_case("true") => true,
        Ok(v) if v.eq_ignore_ascii_case("false") => false,
        _ => default,
    }
}

/// Parse the PORT environment variable.
///
/// Returns the default port if not set.
fn parse_port() -> Result<u16, ConfigError> {
    match env::var("PORT") {
        Ok(port_str) => Ok(port_str.trim().parse()?),
        Err(env::VarError::NotPresent) => Ok(DEFAULT_PORT),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidFormat {
            var: "PORT".to_string(),
            message: "contains invalid unicode".to_string(),
        }),
    }
}

fn parse_bind_addr() -> Result<IpAddr, ConfigError> {
    let raw = env::var("BIDROOM_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    raw.trim().parse().map_err(|_| ConfigError::InvalidFormat {
        var: "BIDROOM_BIND_ADDR".to_string(),
        message: format!("expected an IP address, got '{raw}'"),
    })
}

/// Parse an unsigned numeric environment variable, falling back to `default`.
fn parse_number_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidFormat {
            var: name.to_string(),
            message: format!("expected a non-negative integer, got '{raw}'"),
        }),
        Err(_) => Ok(default),
    }
}

/// Parse a comma-separated list, dropping empty entries.
fn parse_list_env(name: &str) -> Vec<String> {
    env::var(name)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
