use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;
use std::sync::OnceLock;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub database_url: String,
    pub webhook_secret: String,
    pub notification_webhook_url: String,
    pub collaborator_base_url: String,
    pub api_rps: u32,
    pub scheduler_poll_ms: u64,
    pub elapsed_scan_secs: u64,
    pub escalation_scan_secs: u64,
    pub max_cascade_depth: usize,
    pub delivery_max_attempts: i32,
    pub scheduler_batch: i64,
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        Ok(Self {
            server_address: get_env("SERVER_ADDRESS")?,
            database_url: get_env("DATABASE_URL")?,
            webhook_secret: get_env("WEBHOOK_SECRET")?,
            notification_webhook_url: get_env("NOTIFICATION_WEBHOOK_URL")?,
            collaborator_base_url: get_env("COLLABORATOR_BASE_URL")?,
            api_rps: get_env_or("API_RPS", 50)?,
            scheduler_poll_ms: get_env_or("SCHEDULER_POLL_MS", 500)?,
            elapsed_scan_secs: get_env_or("ELAPSED_SCAN_SECS", 60)?,
            escalation_scan_secs: get_env_or("ESCALATION_SCAN_SECS", 60)?,
            max_cascade_depth: get_env_or("MAX_CASCADE_DEPTH", 8)?,
            delivery_max_attempts: get_env_or("DELIVERY_MAX_ATTEMPTS", 5)?,
            scheduler_batch: get_env_or("SCHEDULER_BATCH", 10)?,
        })
    }
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

fn get_env_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> &'static Config {
    CONFIG
        .get()
        .expect("Configuration has not been initialized")
}
