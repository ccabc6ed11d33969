use std::str::FromStr;

use anyhow::{bail, Context, Result};

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Absent → socket fan-out stays in-process (single instance).
    pub redis_url: Option<String>,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    /// Absent → keyword-only skill extraction.
    pub openai_api_key: Option<String>,
    pub jwt_secret: String,
    pub jwt_ttl_hours: i64,
    pub port: u16,
    pub rust_log: String,
    pub recovery: RecoveryConfig,
    pub rate_limit: RateLimitConfig,
    pub max_resume_bytes: usize,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub claim_ttl_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
            claim_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_period: u32,
    pub period_secs: u64,
    /// Key clients by `X-Forwarded-For`. Only safe behind a proxy that overwrites it.
    pub trust_proxy: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_period: 100,
            period_secs: 60,
            trust_proxy: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let bootstrap_admin = match (optional_env("ADMIN_EMAIL"), optional_env("ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(BootstrapAdmin { email, password }),
            (None, None) => None,
            _ => bail!("ADMIN_EMAIL and ADMIN_PASSWORD must be set together"),
        };

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            redis_url: optional_env("REDIS_URL"),
            s3_bucket: require_env("S3_BUCKET")?,
            s3_endpoint: require_env("S3_ENDPOINT")?,
            aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            openai_api_key: optional_env("OPENAI_API_KEY"),
            jwt_secret: require_env("JWT_SECRET")?,
            jwt_ttl_hours: parse_env("JWT_TTL_HOURS", 24)?,
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            recovery: RecoveryConfig {
                workers: parse_env("RECOVERY_WORKERS", 4)?,
                queue_capacity: parse_env("RECOVERY_QUEUE_CAPACITY", 256)?,
                claim_ttl_secs: parse_env("RECOVERY_CLAIM_TTL_SECS", 300)?,
            },
            rate_limit: RateLimitConfig {
                requests_per_period: parse_env("RATE_LIMIT_RPM", 100)?,
                period_secs: parse_env("RATE_LIMIT_PERIOD_SECS", 60)?,
                trust_proxy: parse_env("TRUST_PROXY", false)?,
            },
            max_resume_bytes: parse_env("MAX_RESUME_BYTES", 5 * 1024 * 1024)?,
            bootstrap_admin,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_env(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("{key} must be a valid {}", std::any::type_name::<T>()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value_accepts_padded_number() {
        let port: u16 = parse_value("PORT", " 9090 ").unwrap();
        assert_eq!(port, 9090);
    }

    #[test]
    fn test_parse_value_error_names_variable() {
        let err = parse_value::<u16>("PORT", "eighty").unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn test_parse_value_rejects_out_of_range_port() {
        assert!(parse_value::<u16>("PORT", "70000").is_err());
    }

    #[test]
    fn test_recovery_defaults() {
        let rc = RecoveryConfig::default();
        assert_eq!(rc.workers, 4);
        assert_eq!(rc.queue_capacity, 256);
        assert_eq!(rc.claim_ttl_secs, 300);
    }
}
