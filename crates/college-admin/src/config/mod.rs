use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

const DEFAULT_ACADEMY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_IDENTIFIER_ATTEMPTS: u32 = 32;

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
    pub academy: AcademyConfig,
    pub onboarding: OnboardingConfig,
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

        let base_url = env::var("APP_ACADEMY_URL")
            .ok()
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty());
        let token = env::var("APP_ACADEMY_TOKEN").unwrap_or_default();
        let timeout_secs = match env::var("APP_ACADEMY_TIMEOUT_SECS") {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::InvalidAcademyTimeout)?,
            Err(_) => DEFAULT_ACADEMY_TIMEOUT_SECS,
        };

        let identifier_attempts = match env::var("APP_IDENTIFIER_ATTEMPTS") {
            Ok(raw) => raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|attempts| *attempts > 0)
                .ok_or(ConfigError::InvalidIdentifierAttempts)?,
            Err(_) => DEFAULT_IDENTIFIER_ATTEMPTS,
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            academy: AcademyConfig {
                base_url,
                token,
                timeout: Duration::from_secs(timeout_secs),
            },
            onboarding: OnboardingConfig {
                identifier_attempts,
            },
        })
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

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Connection settings for the remote learning-management system.
#[derive(Debug, Clone)]
pub struct AcademyConfig {
    /// Site root of the LMS; `None` leaves provisioning pending until one is configured.
    pub base_url: Option<String>,
    pub token: String,
    pub timeout: Duration,
}

impl Default for AcademyConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token: String::new(),
            timeout: Duration::from_secs(DEFAULT_ACADEMY_TIMEOUT_SECS),
        }
    }
}

/// Knobs for the student onboarding pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnboardingConfig {
    /// Upper bound on identifier draws before onboarding fails.
    pub identifier_attempts: u32,
}

impl Default for OnboardingConfig {
    fn default() -> Self {
        Self {
            identifier_attempts: DEFAULT_IDENTIFIER_ATTEMPTS,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidAcademyTimeout,
    InvalidIdentifierAttempts,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidAcademyTimeout => {
                write!(f, "APP_ACADEMY_TIMEOUT_SECS must be a positive number of seconds")
            }
            ConfigError::InvalidIdentifierAttempts => {
                write!(f, "APP_IDENTIFIER_ATTEMPTS must be a positive integer")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidAcademyTimeout
            | ConfigError::InvalidIdentifierAttempts => None,
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
        env::remove_var("APP_ENV");
        env::remove_var("APP_HOST");
        env::remove_var("APP_PORT");
        env::remove_var("APP_LOG_LEVEL");
        env::remove_var("APP_ACADEMY_URL");
        env::remove_var("APP_ACADEMY_TOKEN");
        env::remove_var("APP_ACADEMY_TIMEOUT_SECS");
        env::remove_var("APP_IDENTIFIER_ATTEMPTS");
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
        assert!(config.academy.base_url.is_none());
        assert_eq!(config.academy.timeout, Duration::from_secs(10));
        assert_eq!(config.onboarding.identifier_attempts, 32);
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
    fn academy_url_is_normalized() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_ACADEMY_URL", " https://lms.example.edu/ ");
        env::set_var("APP_ACADEMY_TIMEOUT_SECS", "4");
        let config = AppConfig::load().expect("config loads");
        assert_eq!(
            config.academy.base_url.as_deref(),
            Some("https://lms.example.edu")
        );
        assert_eq!(config.academy.timeout, Duration::from_secs(4));
        reset_env();
    }

    #[test]
    fn rejects_zero_identifier_attempts() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_IDENTIFIER_ATTEMPTS", "0");
        let err = AppConfig::load().expect_err("zero attempts rejected");
        assert!(matches!(err, ConfigError::InvalidIdentifierAttempts));
        reset_env();
    }
}
