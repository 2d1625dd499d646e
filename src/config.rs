use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use thiserror::Error;

use crate::blob::BlobConfig;

const INSECURE_JWT_SECRET: &str = "default_jwt_secret_change_me";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{name} must be a valid number, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),
}

/// Runtime settings, read from the environment (and `.env` if present)
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
    pub database_path: String,
    pub jwt_secret: String,
    pub token_ttl_days: i64,
    pub message_page_size: i64,
    pub upload_url_ttl_secs: i64,
    pub max_upload_bytes: usize,
    pub public_base_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();

        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            log::warn!("JWT_SECRET not set, using default (not secure for production!)");
            INSECURE_JWT_SECRET.to_string()
        });

        let config = Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_var("PORT", 8070)?,
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "chat.db".to_string()),
            jwt_secret,
            token_ttl_days: parse_var("TOKEN_TTL_DAYS", 7)?,
            message_page_size: parse_var("MESSAGE_PAGE_SIZE", 50)?,
            upload_url_ttl_secs: parse_var("UPLOAD_URL_TTL_SECS", 3600)?,
            max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", 10 * 1024 * 1024)?,
            public_base_url: env::var("PUBLIC_BASE_URL").unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.token_ttl_days <= 0 {
            return Err(ConfigError::NotPositive("TOKEN_TTL_DAYS"));
        }
        if self.message_page_size <= 0 {
            return Err(ConfigError::NotPositive("MESSAGE_PAGE_SIZE"));
        }
        if self.upload_url_ttl_secs <= 0 {
            return Err(ConfigError::NotPositive("UPLOAD_URL_TTL_SECS"));
        }
        if self.max_upload_bytes == 0 {
            return Err(ConfigError::NotPositive("MAX_UPLOAD_BYTES"));
        }
        Ok(())
    }

    pub fn blob_config(&self) -> BlobConfig {
        BlobConfig {
            public_base_url: self.public_base_url.clone(),
            upload_ttl_secs: self.upload_url_ttl_secs,
            max_upload_bytes: self.max_upload_bytes,
        }
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => parse_value(name, &value),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        name,
        value: value.to_string(),
    })
}
