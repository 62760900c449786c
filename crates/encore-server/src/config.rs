use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Bearer token lifetime bounds, in days.
const TOKEN_DAYS_DEFAULT: i64 = 30;
const TOKEN_DAYS_MAX: i64 = 3650;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_days: i64,
}

impl Config {
    /// Read from the environment (after `.env` has been loaded).
    pub fn from_env() -> Result<Self> {
        let jwt_secret = std::env::var("ENCORE_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("ENCORE_JWT_SECRET is unset or still a placeholder");
        }

        let host = std::env::var("ENCORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = std::env::var("ENCORE_PORT")
            .unwrap_or_else(|_| "5001".into())
            .parse()
            .context("ENCORE_PORT must be a port number")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .context("ENCORE_HOST must be an IP address")?;

        let db_path: PathBuf = std::env::var("ENCORE_DB_PATH")
            .unwrap_or_else(|_| "encore.db".into())
            .into();

        let token_days = parse_token_days(std::env::var("ENCORE_TOKEN_DAYS").ok().as_deref())?;

        Ok(Self {
            addr,
            db_path,
            jwt_secret,
            token_days,
        })
    }
}

fn parse_token_days(raw: Option<&str>) -> Result<i64> {
    let Some(raw) = raw else {
        return Ok(TOKEN_DAYS_DEFAULT);
    };
    let days: i64 = raw
        .trim()
        .parse()
        .with_context(|| format!("ENCORE_TOKEN_DAYS must be a whole number of days, got {:?}", raw))?;
    if !(1..=TOKEN_DAYS_MAX).contains(&days) {
        bail!("ENCORE_TOKEN_DAYS must be between 1 and {}, got {}", TOKEN_DAYS_MAX, days);
    }
    Ok(days)
}
