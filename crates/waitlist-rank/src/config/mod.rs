use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::waitlist::settings::ReferralSettings;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub engine: EngineConfig,
    pub default_referral: ReferralSettings,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let engine = EngineConfig {
            conflict_retries: parse_var("WAITLIST_CONFLICT_RETRIES", 5)?,
            retry_backoff_ms: parse_var("WAITLIST_RETRY_BACKOFF_MS", 10)?,
            reward_timeout_ms: parse_var("WAITLIST_REWARD_TIMEOUT_MS", 2_000)?,
            code_length: parse_var("WAITLIST_CODE_LENGTH", 8)?,
            code_attempts: parse_var("WAITLIST_CODE_ATTEMPTS", 5)?,
        };
        if engine.code_length < 4 {
            return Err(ConfigError::InvalidValue {
                name: "WAITLIST_CODE_LENGTH",
                value: engine.code_length.to_string(),
            });
        }

        let default_referral = ReferralSettings {
            enabled: parse_flag("WAITLIST_REFERRALS_ENABLED", true)?,
            points_per_referral: parse_var("WAITLIST_POINTS_PER_REFERRAL", 1)?,
            verified_only: parse_flag("WAITLIST_VERIFIED_ONLY", true)?,
            positions_to_jump: parse_var("WAITLIST_POSITIONS_TO_JUMP", 0)?,
            referrer_positions_to_jump: parse_var("WAITLIST_REFERRER_POSITIONS_TO_JUMP", 1)?,
            reward_referred: parse_flag("WAITLIST_REWARD_REFERRED", false)?,
            sharing_channels: vec!["email".to_string(), "copy_link".to_string()],
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            engine,
            default_referral,
        })
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        Err(_) => Ok(default),
    }
}

fn parse_flag(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    let Ok(raw) = env::var(name) else {
        return Ok(default);
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue { name, value: raw }),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Tuning knobs for the ranking engine and referral code registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Commit attempts made when the repository reports a position conflict.
    pub conflict_retries: u32,
    pub retry_backoff_ms: u64,
    pub reward_timeout_ms: u64,
    pub code_length: usize,
    pub code_attempts: u32,
}

impl EngineConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn reward_timeout(&self) -> Duration {
        Duration::from_millis(self.reward_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            conflict_retries: 5,
            retry_backoff_ms: 10,
            reward_timeout_ms: 2_000,
            code_length: 8,
            code_attempts: 5,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidValue { name: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidValue { name, value } => {
                write!(f, "{name} has an invalid value '{value}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidValue { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for name in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "APP_LOG_LEVEL",
            "WAITLIST_CONFLICT_RETRIES",
            "WAITLIST_CODE_LENGTH",
            "WAITLIST_VERIFIED_ONLY",
            "WAITLIST_REFERRER_POSITIONS_TO_JUMP",
        ] {
            env::remove_var(name);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.engine, EngineConfig::default());
        assert!(config.default_referral.verified_only);
        assert_eq!(config.default_referral.referrer_positions_to_jump, 1);
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
        reset_env();
    }

    #[test]
    fn engine_overrides_are_parsed() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("WAITLIST_CONFLICT_RETRIES", "9");
        env::set_var("WAITLIST_VERIFIED_ONLY", "no");
        env::set_var("WAITLIST_REFERRER_POSITIONS_TO_JUMP", "4");
        let config = AppConfig::load().expect("config loads");
        assert_eq!(config.engine.conflict_retries, 9);
        assert!(!config.default_referral.verified_only);
        assert_eq!(config.default_referral.referrer_positions_to_jump, 4);
        reset_env();
    }

    #[test]
    fn rejects_unparseable_engine_values() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("WAITLIST_CODE_LENGTH", "two");
        match AppConfig::load() {
            Err(ConfigError::InvalidValue { name, .. }) => {
                assert_eq!(name, "WAITLIST_CODE_LENGTH")
            }
            other => panic!("expected invalid value error, got {other:?}"),
        }
        reset_env();
    }
}
