use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

const DEV_JWT_SECRET: &str = "dev-only-signing-secret-change-before-deploying";
const MIN_JWT_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub store_backend: StoreBackend,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub otp: OtpConfig,
    pub pin: PinConfig,
    pub notifier: NotifierConfig,
    pub admin: AdminBootstrapConfig,
    pub security: SecurityConfig,
    pub swagger: SwaggerConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

/// Where users and ephemeral state live.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// PostgreSQL + Redis.
    External,
    /// Process-local maps; state is lost on restart.
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtpConfig {
    pub code_length: usize,
    pub register_ttl_seconds: u64,
    pub login_ttl_seconds: u64,
    /// Requests allowed per identifier inside `request_window_seconds`.
    pub max_requests: u64,
    pub request_window_seconds: u64,
    /// Wrong codes tolerated before the record is discarded.
    pub max_attempts: u32,
    pub delivery_timeout_seconds: u64,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            code_length: 4,
            register_ttl_seconds: 300,
            login_ttl_seconds: 120,
            max_requests: 3,
            request_window_seconds: 300,
            max_attempts: 3,
            delivery_timeout_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PinConfig {
    pub max_attempts: u32,
    pub lockout_seconds: u64,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lockout_seconds: 900,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    /// Gateway endpoint. Codes are only logged when unset.
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub channel: String,
    pub timeout_seconds: u64,
}

/// Administrator seeded at startup when absent.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AdminBootstrapConfig {
    pub phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwaggerConfig {
    pub enabled: SwaggerMode,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SwaggerMode {
    Public,
    Disabled,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = AppConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("onboarding-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: get_optional_env("OTLP_ENDPOINT"),
            store_backend: get_env(
                "STORE_BACKEND",
                Some(if is_prod { "external" } else { "memory" }),
                false,
            )?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            database: DatabaseConfig {
                url: get_optional_env("DATABASE_URL"),
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10")?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1")?,
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", Some("redis://127.0.0.1:6379"), is_prod)?,
            },
            jwt: JwtConfig {
                secret: get_env("JWT_SECRET", Some(DEV_JWT_SECRET), is_prod)?,
                issuer: get_env("JWT_ISSUER", Some("onboarding-service"), false)?,
                access_token_expiry_minutes: parse_env("JWT_ACCESS_TOKEN_EXPIRY_MINUTES", "15")?,
                refresh_token_expiry_days: parse_env("JWT_REFRESH_TOKEN_EXPIRY_DAYS", "7")?,
            },
            otp: {
                let defaults = OtpConfig::default();
                OtpConfig {
                    code_length: parse_env("OTP_CODE_LENGTH", &defaults.code_length.to_string())?,
                    register_ttl_seconds: parse_env(
                        "OTP_REGISTER_TTL_SECONDS",
                        &defaults.register_ttl_seconds.to_string(),
                    )?,
                    login_ttl_seconds: parse_env(
                        "OTP_LOGIN_TTL_SECONDS",
                        &defaults.login_ttl_seconds.to_string(),
                    )?,
                    max_requests: parse_env(
                        "OTP_MAX_REQUESTS",
                        &defaults.max_requests.to_string(),
                    )?,
                    request_window_seconds: parse_env(
                        "OTP_REQUEST_WINDOW_SECONDS",
                        &defaults.request_window_seconds.to_string(),
                    )?,
                    max_attempts: parse_env(
                        "OTP_MAX_ATTEMPTS",
                        &defaults.max_attempts.to_string(),
                    )?,
                    delivery_timeout_seconds: parse_env(
                        "OTP_DELIVERY_TIMEOUT_SECONDS",
                        &defaults.delivery_timeout_seconds.to_string(),
                    )?,
                }
            },
            pin: PinConfig {
                max_attempts: parse_env("PIN_MAX_ATTEMPTS", "5")?,
                lockout_seconds: parse_env("PIN_LOCKOUT_SECONDS", "900")?,
            },
            notifier: NotifierConfig {
                url: get_optional_env("OTP_GATEWAY_URL"),
                api_key: get_optional_env("OTP_GATEWAY_API_KEY"),
                channel: get_env("OTP_GATEWAY_CHANNEL", Some("whatsapp"), false)?,
                timeout_seconds: parse_env("OTP_GATEWAY_TIMEOUT_SECONDS", "5")?,
            },
            admin: AdminBootstrapConfig {
                phone: get_optional_env("ADMIN_BOOTSTRAP_PHONE"),
                email: get_optional_env("ADMIN_BOOTSTRAP_EMAIL"),
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            },
            swagger: SwaggerConfig {
                enabled: get_env(
                    "ENABLE_SWAGGER",
                    Some(if is_prod { "disabled" } else { "public" }),
                    false,
                )?
                .parse()
                .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            },
            rate_limit: RateLimitConfig {
                global_ip_limit: parse_env("RATE_LIMIT_GLOBAL_IP_LIMIT", "100")?,
                global_ip_window_seconds: parse_env("RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS", "60")?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Settings for a process-local instance: memory stores, log notifier,
    /// dev signing secret.
    pub fn development() -> Self {
        Self {
            common: core_config::Config::default(),
            environment: Environment::Dev,
            service_name: "onboarding-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            store_backend: StoreBackend::Memory,
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
                min_connections: 1,
            },
            redis: RedisConfig {
                url: "redis://127.0.0.1:6379".to_string(),
            },
            jwt: JwtConfig {
                secret: DEV_JWT_SECRET.to_string(),
                issuer: "onboarding-service".to_string(),
                access_token_expiry_minutes: 15,
                refresh_token_expiry_days: 7,
            },
            otp: OtpConfig::default(),
            pin: PinConfig::default(),
            notifier: NotifierConfig {
                url: None,
                api_key: None,
                channel: "whatsapp".to_string(),
                timeout_seconds: 5,
            },
            admin: AdminBootstrapConfig::default(),
            security: SecurityConfig {
                allowed_origins: vec!["http://localhost:3000".to_string()],
            },
            swagger: SwaggerConfig {
                enabled: SwaggerMode::Public,
            },
            rate_limit: RateLimitConfig {
                global_ip_limit: 100,
                global_ip_window_seconds: 60,
            },
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(config_error("PORT must be greater than 0"));
        }

        if self.jwt.access_token_expiry_minutes <= 0 {
            return Err(config_error("JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be positive"));
        }

        if self.jwt.refresh_token_expiry_days <= 0 {
            return Err(config_error("JWT_REFRESH_TOKEN_EXPIRY_DAYS must be positive"));
        }

        if self.jwt.secret.len() < MIN_JWT_SECRET_LEN {
            return Err(config_error(&format!(
                "JWT_SECRET must be at least {} bytes",
                MIN_JWT_SECRET_LEN
            )));
        }

        if !(4..=8).contains(&self.otp.code_length) {
            return Err(config_error("OTP_CODE_LENGTH must be between 4 and 8"));
        }

        if self.otp.max_attempts == 0 || self.otp.max_requests == 0 {
            return Err(config_error("OTP attempt and request limits must be positive"));
        }

        if self.pin.max_attempts == 0 {
            return Err(config_error("PIN_MAX_ATTEMPTS must be positive"));
        }

        if self.store_backend == StoreBackend::External && self.database.url.is_none() {
            return Err(config_error("DATABASE_URL is required for the external store backend"));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(config_error("Wildcard CORS origin not allowed in production"));
            }

            if self.jwt.secret == DEV_JWT_SECRET {
                return Err(config_error("JWT_SECRET must be set in production"));
            }

            if self.store_backend == StoreBackend::Memory {
                tracing::warn!("In-memory store backend in production - state is lost on restart");
            }

            if self.swagger.enabled == SwaggerMode::Public {
                tracing::error!("Swagger is publicly accessible in production - consider 'disabled'");
            }
        }

        Ok(())
    }
}

fn config_error(message: &str) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(message.to_string()))
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn get_optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Tunables always have a default, even in production.
fn parse_env<T>(key: &str, default: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), false)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "external" | "postgres" => Ok(StoreBackend::External),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Invalid store backend: {}", s)),
        }
    }
}

impl FromStr for SwaggerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" | "true" => Ok(SwaggerMode::Public),
            "disabled" | "false" => Ok(SwaggerMode::Disabled),
            _ => Err(format!("Invalid swagger mode: {}", s)),
        }
    }
}
