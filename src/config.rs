use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result};

const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:3001";
const DEFAULT_UPLOAD_DIR: &str = "public/upload";
const DEFAULT_JWT_EXPIRY_DAYS: i64 = 90;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_expiry_days: i64,
    pub bind_address: SocketAddr,
    pub upload_dir: PathBuf,
    pub request_timeout: Duration,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

/// Credentials for an admin account created at startup when the email is not registered yet.
#[derive(Debug, Clone)]
pub struct BootstrapAdmin {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let jwt_secret = std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let bind_address: SocketAddr = env_or("BIND_ADDRESS", DEFAULT_BIND_ADDRESS.parse()?)?;
        let jwt_expiry_days = env_or("JWT_EXPIRY_DAYS", DEFAULT_JWT_EXPIRY_DAYS)?;
        let request_timeout_secs = env_or("REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?;
        let upload_dir = std::env::var("UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_UPLOAD_DIR));

        let bootstrap_admin = match (
            std::env::var("ADMIN_EMAIL").ok(),
            std::env::var("ADMIN_PASSWORD").ok(),
        ) {
            (Some(email), Some(password)) => Some(BootstrapAdmin {
                name: std::env::var("ADMIN_NAME").unwrap_or_else(|_| "Administrator".to_owned()),
                email,
                password,
            }),
            _ => None,
        };

        Ok(Config {
            database_url,
            jwt_secret,
            jwt_expiry_days,
            bind_address,
            upload_dir,
            request_timeout: Duration::from_secs(request_timeout_secs),
            bootstrap_admin,
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("{key} has an invalid value: {value}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_falls_back_when_unset() {
        let value: u64 = env_or("BLOG_API_TEST_SURELY_UNSET_KEY", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn env_or_rejects_garbage() {
        std::env::set_var("BLOG_API_TEST_BAD_NUMBER", "ten");
        let result: Result<u64> = env_or("BLOG_API_TEST_BAD_NUMBER", 7);
        assert!(result.is_err());
    }
}
