use std::{env, fmt::Display, str::FromStr};

use anyhow::{ensure, Context, Result};
use url::Url;

use crate::db::DEFAULT_MAX_POOL_SIZE;

/// Process configuration, read once from the environment (and `.env`).
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub server_host: String,
    pub server_port: u16,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub jwt_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
    pub refresh_cookie_secure: bool,
    pub refresh_cookie_domain: Option<String>,
    pub cors_allowed_origin: Option<String>,
    /// When false, self-signup is closed once the first admin exists and new
    /// accounts come only from invites.
    pub allow_open_signup: bool,
    pub file_url_expiry_seconds: u64,
    pub reminder_interval_minutes: i64,
    pub aws_endpoint_url: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub aws_region: String,
    pub s3_bucket: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            database_url: required("DATABASE_URL")?,
            database_max_pool_size: parsed("DATABASE_MAX_POOL_SIZE", DEFAULT_MAX_POOL_SIZE)?,
            server_host: text("SERVER_HOST", "127.0.0.1"),
            server_port: parsed("SERVER_PORT", 3000)?,
            jwt_secret: required("JWT_SECRET")?,
            jwt_issuer: text("JWT_ISSUER", "orchestrator"),
            jwt_audience: text("JWT_AUDIENCE", "orchestrator-clients"),
            jwt_expiry_minutes: parsed("JWT_EXPIRY_MINUTES", 60)?,
            refresh_token_expiry_days: parsed("REFRESH_TOKEN_EXPIRY_DAYS", 30)?,
            refresh_cookie_secure: flag("REFRESH_COOKIE_SECURE", false),
            refresh_cookie_domain: optional("REFRESH_COOKIE_DOMAIN"),
            cors_allowed_origin: optional("CORS_ALLOWED_ORIGIN"),
            allow_open_signup: flag("ALLOW_OPEN_SIGNUP", true),
            file_url_expiry_seconds: parsed("FILE_URL_EXPIRY_SECONDS", 300)?,
            reminder_interval_minutes: parsed("REMINDER_INTERVAL_MINUTES", 60)?,
            aws_endpoint_url: optional("AWS_ENDPOINT_URL"),
            aws_access_key_id: optional("AWS_ACCESS_KEY_ID"),
            aws_secret_access_key: optional("AWS_SECRET_ACCESS_KEY"),
            aws_region: text("AWS_REGION", "us-east-1"),
            s3_bucket: required("S3_BUCKET")?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.jwt_expiry_minutes > 0, "JWT_EXPIRY_MINUTES must be positive");
        ensure!(
            self.refresh_token_expiry_days > 0,
            "REFRESH_TOKEN_EXPIRY_DAYS must be positive"
        );
        ensure!(
            self.reminder_interval_minutes > 0,
            "REMINDER_INTERVAL_MINUTES must be positive"
        );
        ensure!(self.file_url_expiry_seconds > 0, "FILE_URL_EXPIRY_SECONDS must be positive");
        Ok(())
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }
}

fn required(key: &str) -> Result<String> {
    env::var(key).with_context(|| format!("{key} must be set"))
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn text(key: &str, default: &str) -> String {
    optional(key).unwrap_or_else(|| default.to_string())
}

fn parsed<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match optional(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|err| anyhow::anyhow!("{key} is invalid: {err}")),
        None => Ok(default),
    }
}

fn flag(key: &str, default: bool) -> bool {
    optional(key).map_or(default, |value| parse_flag(&value))
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("*****"));
            }
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}
