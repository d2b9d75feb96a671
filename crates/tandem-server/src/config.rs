use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub media_dir: PathBuf,
    /// Base URL clients reach this server at; upload links are built on it.
    pub public_url: String,
    pub upload_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let jwt_secret = lookup("TANDEM_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("TANDEM_JWT_SECRET is unset or still a placeholder");
        }

        let port = var("TANDEM_PORT", "3000")
            .parse()
            .context("TANDEM_PORT must be a port number")?;
        let upload_ttl_secs: u64 = var("TANDEM_UPLOAD_TTL_SECS", "900")
            .parse()
            .context("TANDEM_UPLOAD_TTL_SECS must be a number of seconds")?;

        Ok(Self {
            host: var("TANDEM_HOST", "0.0.0.0"),
            port,
            db_path: var("TANDEM_DB_PATH", "tandem.db").into(),
            jwt_secret,
            media_dir: var("TANDEM_MEDIA_DIR", "./media").into(),
            public_url: var("TANDEM_PUBLIC_URL", "http://localhost:3000"),
            upload_ttl: Duration::from_secs(upload_ttl_secs),
        })
    }
}
