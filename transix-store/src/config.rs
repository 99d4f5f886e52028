use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub locks: LocksConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
}

/// Which seat lock backend this deployment runs.
///
/// `postgres` keeps lock rows in the reservation database with the full
/// audit trail and per-user policy; `redis` trades that for SET NX EX
/// speed and broker-side expiry.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LockBackend {
    Postgres,
    Redis,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocksConfig {
    pub backend: LockBackend,
    #[serde(default = "default_hold_ttl")]
    pub hold_ttl_seconds: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

fn default_hold_ttl() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    60
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(config::File::with_name("config/default"))
            // Add in the current environment file
            // Default to 'development' env
            // Note that this file is _optional_
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add in a local configuration file
            // This file shouldn't be checked in to git
            .add_source(config::File::with_name("config/local").required(false))
            // Add in settings from the environment (with a prefix of TRANSIX)
            // Eg.. `TRANSIX_DATABASE__URL=...` would set `database.url`
            .add_source(config::Environment::with_prefix("TRANSIX").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
