//! # Configuration
//!
//! Plain settings come from environment variables with defaults; anything
//! secret is read from `/run/secrets/<NAME>` (docker secrets mount), with an
//! environment variable of the same name accepted as a development fallback.
use std::{env, fmt::Display, fs::read_to_string, str::FromStr};

use tracing::{info, warn};

pub struct Config {
    pub port: u16,
    pub redis_url: String,
    /// Exact origin allowed by CORS; credentials are enabled so `*` is not an option.
    pub public_origin: String,
    pub uploads_dir: String,
    pub admin_user: String,
    pub session_ttl_secs: i64,
    pub rate_limit_per_minute: u32,
    pub secure_cookies: bool,
    pub session_secret: String,
    /// Hex sha256 of the admin password.
    pub admin_password_hash: String,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: try_load("RUST_PORT", "1111"),
            redis_url: try_load("REDIS_URL", "redis://127.0.0.1:6379"),
            public_origin: try_load("PUBLIC_ORIGIN", "http://localhost:5173"),
            uploads_dir: try_load("UPLOADS_DIR", "./uploads"),
            admin_user: try_load("ADMIN_USER", "admin"),
            session_ttl_secs: try_load("SESSION_TTL_SECS", "604800"),
            rate_limit_per_minute: try_load("RATE_LIMIT_PER_MINUTE", "5"),
            secure_cookies: try_load("SECURE_COOKIES", "true"),
            session_secret: read_secret("SESSION_SECRET"),
            admin_password_hash: read_secret("ADMIN_PASSWORD_HASH"),
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
        })
        .expect("Environment misconfigured!")
}

fn read_secret(secret_name: &str) -> String {
    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .or_else(|e| {
            warn!("Failed to read {secret_name} from file: {e}");
            env::var(secret_name)
        })
        .expect("Secrets misconfigured!")
}
