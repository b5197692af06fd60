//! Configuration loaded from environment variables.

use std::env;
use std::time::Duration;

/// Which document store backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub api_url: String,
    pub api_key: String,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct SmsConfig {
    pub api_url: String,
    pub api_key: String,
    pub sender: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store_backend: StoreBackend,
    /// Required when the store backend is Postgres
    pub database_url: Option<String>,
    /// In-memory cache is used when absent
    pub redis_url: Option<String>,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_ttl: Duration,
    pub dedup_ttl: Duration,
    pub deadline_scan_interval: Duration,
    pub email: Option<EmailConfig>,
    pub telegram: Option<TelegramConfig>,
    pub sms: Option<SmsConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let store_backend = match env::var("STORE_BACKEND").as_deref() {
            Ok("memory") => StoreBackend::Memory,
            Ok("postgres") | Err(_) => StoreBackend::Postgres,
            Ok(_) => return Err(ConfigError::Invalid("STORE_BACKEND")),
        };

        let database_url = env::var("DATABASE_URL").ok();
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingEnvVar("DATABASE_URL"));
        }

        let port: u16 = env::var("PORT")
            .unwrap_or_else(|_| "8081".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("PORT"))?;

        let jwt_secret =
            env::var("JWT_SECRET").map_err(|_| ConfigError::MissingEnvVar("JWT_SECRET"))?;

        Ok(Self {
            store_backend,
            database_url,
            redis_url: env::var("REDIS_URL").ok(),
            port,
            jwt_secret,
            jwt_ttl: secs_var("JWT_TTL_SECS", 86_400)?,
            dedup_ttl: secs_var("NOTIFICATION_DEDUP_TTL_SECS", 3_600)?,
            deadline_scan_interval: secs_var("DEADLINE_SCAN_INTERVAL_SECS", 86_400)?,
            email: email_from_env(),
            telegram: telegram_from_env(),
            sms: sms_from_env(),
        })
    }
}

fn secs_var(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    match env::var(name) {
        Ok(v) => v
            .parse()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(Duration::from_secs(default)),
    }
}

fn email_from_env() -> Option<EmailConfig> {
    Some(EmailConfig {
        api_url: env::var("EMAIL_API_URL").ok()?,
        api_key: env::var("EMAIL_API_KEY").ok()?,
        from: env::var("EMAIL_FROM").unwrap_or_else(|_| "no-reply@lms.local".to_string()),
    })
}

fn telegram_from_env() -> Option<TelegramConfig> {
    Some(TelegramConfig {
        bot_token: env::var("TELEGRAM_BOT_TOKEN").ok()?,
        api_base: env::var("TELEGRAM_API_BASE")
            .unwrap_or_else(|_| "https://api.telegram.org".to_string()),
    })
}

fn sms_from_env() -> Option<SmsConfig> {
    Some(SmsConfig {
        api_url: env::var("SMS_API_URL").ok()?,
        api_key: env::var("SMS_API_KEY").ok()?,
        sender: env::var("SMS_SENDER").unwrap_or_else(|_| "LMS".to_string()),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    #[error("invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
