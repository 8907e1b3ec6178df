use std::{env, fmt, net::SocketAddr, time::Duration};

use url::Url;

use super::server_bind_address;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://fis.db?mode=rwc";

const DEFAULT_PARTNER_TIMEOUT_SECS: u64 = 5;
const DEFAULT_OUTBOX_INTERVAL_SECS: u64 = 10;
const DEFAULT_OUTBOX_MAX_ATTEMPTS: u32 = 8;
const DEFAULT_OUTBOX_RETENTION_HOURS: u64 = 72;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns `true` when the current environment should behave as development.
    pub fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Endpoints of the downstream partners. A partner without a URL is not notified.
#[derive(Debug, Clone, Default)]
pub struct PartnerConfig {
    pub passenger_messaging_url: Option<Url>,
    pub baggage_handling_url: Option<Url>,
    pub signing_secret: Option<String>,
    pub timeout: Duration,
}

/// Tuning for the notification outbox worker.
#[derive(Debug, Clone, Copy)]
pub struct OutboxConfig {
    pub interval: Duration,
    pub max_attempts: u32,
    pub retention: Duration,
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    pub partners: PartnerConfig,
    pub outbox: OutboxConfig,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;
        let database_url = non_empty("DATABASE_URL")
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let partners = PartnerConfig {
            passenger_messaging_url: partner_url("PASSENGER_MESSAGING_URL")?,
            baggage_handling_url: partner_url("BAGGAGE_HANDLING_URL")?,
            signing_secret: non_empty("PARTNER_SIGNING_SECRET"),
            timeout: Duration::from_secs(positive(
                "PARTNER_TIMEOUT_SECS",
                DEFAULT_PARTNER_TIMEOUT_SECS,
            )?),
        };

        let max_attempts = positive("OUTBOX_MAX_ATTEMPTS", u64::from(DEFAULT_OUTBOX_MAX_ATTEMPTS))?;
        let outbox = OutboxConfig {
            interval: Duration::from_secs(positive(
                "OUTBOX_INTERVAL_SECS",
                DEFAULT_OUTBOX_INTERVAL_SECS,
            )?),
            max_attempts: u32::try_from(max_attempts).map_err(|_| ConfigError::InvalidNumber {
                key: "OUTBOX_MAX_ATTEMPTS",
                value: max_attempts.to_string(),
            })?,
            retention: Duration::from_secs(
                positive("OUTBOX_RETENTION_HOURS", DEFAULT_OUTBOX_RETENTION_HOURS)? * 3600,
            ),
        };

        Ok(Self {
            bind_addr,
            environment,
            database_url,
            partners,
            outbox,
        })
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn partner_url(key: &'static str) -> Result<Option<Url>, ConfigError> {
    let Some(raw) = non_empty(key) else {
        return Ok(None);
    };
    // Relative joins drop the last path segment unless it ends with a slash.
    let normalized = if raw.ends_with('/') {
        raw
    } else {
        format!("{raw}/")
    };
    Url::parse(&normalized)
        .map(Some)
        .map_err(|source| ConfigError::InvalidUrl { key, source })
}

fn positive(key: &'static str, default: u64) -> Result<u64, ConfigError> {
    let Some(raw) = non_empty(key) else {
        return Ok(default);
    };
    match raw.parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::InvalidNumber { key, value: raw }),
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    InvalidUrl {
        key: &'static str,
        source: url::ParseError,
    },
    InvalidNumber {
        key: &'static str,
        value: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::InvalidUrl { key, source } => write!(f, "invalid {key} value: {source}"),
            Self::InvalidNumber { key, value } => {
                write!(f, "{key} must be a positive integer (got {value})")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
