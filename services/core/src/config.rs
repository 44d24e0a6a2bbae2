//! Runtime settings read from the environment (`.env` is loaded by the binaries).

use crate::ingest::DEFAULT_BATCH_SIZE;
use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_BIND: &str = "127.0.0.1:8080";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub db_url: String,
    pub max_connections: u32,
    pub batch_size: usize,
    pub bind: String,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. `DB_URL` is required, the rest have defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_url = lookup("DB_URL").context("DB_URL env var missing")?;

        Ok(Self {
            db_url,
            max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?,
            batch_size: parse_or(&lookup, "INGEST_BATCH_SIZE", DEFAULT_BATCH_SIZE)?.max(1),
            bind: lookup("API_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
            max_upload_bytes: parse_or(&lookup, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {} value '{}'", key, raw)),
        None => Ok(default),
    }
}
